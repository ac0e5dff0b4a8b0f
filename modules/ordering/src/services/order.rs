use crate::config::DispatchConfig;
use crate::entities::Database;
use crate::entities::delivery::{Delivery, DeliveryStatus, FindDeliveryByOrderId};
use crate::entities::delivery_tracking::RecordDeliveryStatus;
use crate::entities::order::{
    CancelOrder, CancelOutcome, CreateOrder, ListOrderItems, ListOrdersByCustomer, ListOrdersByStore, NewOrderItem, Order,
    OrderItem, OrderStatus, PaymentMethod, PlacedOrder, TransitionOrderStatus,
};
use crate::entities::store::FindStoreById;
use crate::events::DomainEvent;
use crate::events::order::{OrderPlacedEvent, OrderStatusChangedEvent};
use crate::role_gate;
use crate::services::assignment::AssignmentService;
use crate::services::lifecycle::check_order_transition;
use crate::services::{ensure_order_party, load_order};
use crate::services::notification::NotificationService;
use crate::utils::actor::{Actor, Role, RoleGated};
use crate::utils::geo::GeoPoint;
use crate::utils::pricing::line_total;
use framework::now_time;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct OrderService {
    pub db: Database,
    pub config: Arc<DispatchConfig>,
    pub assignment: AssignmentService,
    pub notifications: NotificationService,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItem {
    pub product_id: i32,
    pub quantity: i32,
    pub price: Decimal,
}

/// Check out a cart from one store.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub actor: Actor,
    pub store_id: i32,
    pub items: Vec<CartItem>,
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub discount_amount: Option<Decimal>,
    pub special_instructions: Option<String>,
}

role_gate! {PlaceOrder | [Role::Customer]}

impl PlaceOrder {
    fn validate(&self) -> Result<(), framework::Error> {
        if self.items.is_empty() {
            return Err(framework::Error::invalid_input("order has no items"));
        }
        if self.shipping_address.trim().is_empty() {
            return Err(framework::Error::invalid_input("shipping address is required"));
        }
        if let Some(item) = self.items.iter().find(|item| item.quantity <= 0) {
            return Err(framework::Error::invalid_input(format!(
                "quantity of product {} must be positive",
                item.product_id
            )));
        }
        if let Some(item) = self.items.iter().find(|item| item.price.is_sign_negative()) {
            return Err(framework::Error::invalid_input(format!(
                "price of product {} must not be negative",
                item.product_id
            )));
        }
        if self.discount_amount.is_some_and(|d| d.is_sign_negative()) {
            return Err(framework::Error::invalid_input("discount must not be negative"));
        }
        match (self.latitude, self.longitude) {
            (None, None) => Ok(()),
            (Some(lat), Some(lng)) if GeoPoint::new(lat, lng).is_valid() => Ok(()),
            _ => Err(framework::Error::invalid_input("invalid delivery coordinates")),
        }
    }
}

impl Processor<PlaceOrder> for OrderService {
    type Output = PlacedOrder;
    type Error = framework::Error;
    #[instrument(skip_all, fields(store_id = input.store_id), err)]
    async fn process(&self, input: PlaceOrder) -> Result<PlacedOrder, framework::Error> {
        let actor = input.authorize()?;
        input.validate()?;
        let store = self
            .db
            .process(FindStoreById { id: input.store_id })
            .await?
            .ok_or(framework::Error::NotFound)?;

        let items: Vec<NewOrderItem> = input
            .items
            .iter()
            .map(|item| NewOrderItem {
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
                total_price: line_total(item.price, item.quantity),
            })
            .collect();
        let subtotal: Decimal = items.iter().map(|item| item.total_price).sum();
        let pickup = GeoPoint::from_parts(store.latitude, store.longitude);
        let dropoff = GeoPoint::from_parts(input.latitude, input.longitude);
        let distance = pickup.zip(dropoff).map(|(a, b)| a.distance_km(&b));
        let pricing = &self.config.pricing;
        let totals = pricing.totals(
            subtotal,
            pricing.delivery_fee(distance),
            input.discount_amount.unwrap_or(Decimal::ZERO),
        );
        if totals.total_amount.is_sign_negative() {
            return Err(framework::Error::invalid_input("discount exceeds the order total"));
        }

        let placed = self
            .db
            .process(CreateOrder {
                customer_id: actor.user_id,
                store_id: store.id,
                items,
                total_amount: totals.total_amount,
                delivery_fee: totals.delivery_fee,
                tax_amount: totals.tax_amount,
                discount_amount: totals.discount_amount,
                payment_method: input.payment_method,
                shipping_address: input.shipping_address,
                latitude: input.latitude,
                longitude: input.longitude,
                special_instructions: input.special_instructions,
                now: now_time(),
            })
            .await?;
        info!(
            monotonic_counter.order_placed = 1,
            order_id = placed.order.id,
            "Order placed"
        );
        let _ = self
            .notifications
            .process(DomainEvent::OrderPlaced(OrderPlacedEvent {
                order_id: placed.order.id,
                customer_id: placed.order.customer_id,
                shopkeeper_id: store.owner_id,
                total_amount: placed.order.total_amount,
                placed_at: placed.order.created_at,
            }))
            .await;
        Ok(placed)
    }
}

/// Store-side moves (`confirmed`, `ready_for_pickup`) and cancellation.
#[derive(Debug, Clone, Copy)]
pub struct UpdateOrderStatus {
    pub actor: Actor,
    pub order_id: i32,
    pub status: OrderStatus,
}

impl Processor<UpdateOrderStatus> for OrderService {
    type Output = Order;
    type Error = framework::Error;
    #[instrument(skip_all, fields(order_id = input.order_id, status = input.status.as_str()), err)]
    async fn process(&self, input: UpdateOrderStatus) -> Result<Order, framework::Error> {
        let actor = input.actor;
        let (order, store) = load_order(&self.db, input.order_id).await?;
        let is_owner = actor.role == Role::Shopkeeper && store.owner_id == actor.user_id;

        let not_past = match input.status {
            status if status.is_store_driven() => {
                if !(is_owner || actor.is_admin()) {
                    warn!(user_id = actor.user_id, "Order status change by a non-owner");
                    return Err(framework::Error::PermissionsDenied);
                }
                None
            }
            OrderStatus::Cancelled if is_owner || actor.is_admin() => None,
            OrderStatus::Cancelled
                if actor.role == Role::Customer && order.customer_id == actor.user_id =>
            {
                if !order.status.is_terminal() && order.status > OrderStatus::Confirmed {
                    return Err(framework::Error::conflict(
                        "order can no longer be cancelled by the customer",
                    ));
                }
                Some(OrderStatus::Confirmed)
            }
            OrderStatus::Cancelled => {
                warn!(user_id = actor.user_id, "Order cancellation by an outsider");
                return Err(framework::Error::PermissionsDenied);
            }
            _ => {
                warn!(
                    user_id = actor.user_id,
                    "Order status driven by the delivery flow requested directly"
                );
                return Err(framework::Error::PermissionsDenied);
            }
        };
        check_order_transition(order.status, input.status)?;

        let now = now_time();
        let updated = if input.status == OrderStatus::Cancelled {
            self.cancel_with_delivery(order.id, not_past, actor).await?
        } else {
            self.db
                .process(TransitionOrderStatus {
                    id: order.id,
                    to: input.status,
                    not_past,
                    now,
                })
                .await?
        };
        let updated = match updated {
            Some(updated) => updated,
            None => {
                let (current, _) = load_order(&self.db, order.id).await?;
                check_order_transition(current.status, input.status)?;
                return Err(framework::Error::conflict("order changed concurrently"));
            }
        };
        info!(
            monotonic_counter.order_transition = 1,
            from = order.status.as_str(),
            "Order status changed"
        );
        let _ = self
            .notifications
            .process(DomainEvent::OrderStatusChanged(OrderStatusChangedEvent {
                order_id: updated.id,
                customer_id: updated.customer_id,
                shopkeeper_id: store.owner_id,
                new_status: updated.status,
                changed_at: now,
            }))
            .await;

        if updated.status == OrderStatus::ReadyForPickup
            && self.config.assignment.auto_assign_on_ready
        {
            if let Err(e) = self.assignment.auto_assign(&updated, &store).await {
                warn!("Automatic assignment failed: {e}");
            }
        }
        Ok(updated)
    }
}

impl OrderService {
    /// Cancel the order and its delivery together. An order whose delivery is past the
    /// point of cancelling stays as it is. `None` means the order itself had moved on.
    async fn cancel_with_delivery(
        &self,
        order_id: i32,
        not_past: Option<OrderStatus>,
        actor: Actor,
    ) -> Result<Option<Order>, framework::Error> {
        let now = now_time();
        let (order, delivery) = match self
            .db
            .process(CancelOrder {
                id: order_id,
                not_past,
                now,
            })
            .await?
        {
            CancelOutcome::Cancelled { order, delivery } => (order, delivery),
            CancelOutcome::OrderUnchanged => return Ok(None),
            CancelOutcome::DeliveryInProgress(status) => {
                return Err(framework::Error::conflict(format!(
                    "delivery is already {}",
                    status.as_str()
                )));
            }
        };
        if let Some(delivery) = delivery {
            if let Err(e) = self
                .db
                .process(RecordDeliveryStatus {
                    delivery_id: delivery.id,
                    status: DeliveryStatus::Cancelled,
                    description: Some("Order cancelled".to_owned()),
                    latitude: None,
                    longitude: None,
                    updated_by: Some(actor.user_id),
                    now,
                })
                .await
            {
                warn!("Failed to record cancellation history: {e}");
            }
        }
        Ok(Some(order))
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub delivery: Option<Delivery>,
}

#[derive(Debug, Clone, Copy)]
pub struct GetOrder {
    pub actor: Actor,
    pub order_id: i32,
}

impl Processor<GetOrder> for OrderService {
    type Output = OrderDetails;
    type Error = framework::Error;
    #[instrument(skip_all, fields(order_id = input.order_id), err)]
    async fn process(&self, input: GetOrder) -> Result<OrderDetails, framework::Error> {
        let (order, store) = load_order(&self.db, input.order_id).await?;
        let delivery = self
            .db
            .process(FindDeliveryByOrderId { order_id: order.id })
            .await?;
        ensure_order_party(&self.db, input.actor, &order, &store, delivery.as_ref()).await?;
        let items = self
            .db
            .process(ListOrderItems { order_id: order.id })
            .await?;
        Ok(OrderDetails {
            order,
            items,
            delivery,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListCustomerOrders {
    pub actor: Actor,
    pub customer_id: i32,
}

impl Processor<ListCustomerOrders> for OrderService {
    type Output = Vec<Order>;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: ListCustomerOrders) -> Result<Vec<Order>, framework::Error> {
        if !input.actor.is_self_or_admin(input.customer_id) {
            return Err(framework::Error::PermissionsDenied);
        }
        self.db
            .process(ListOrdersByCustomer {
                customer_id: input.customer_id,
            })
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListStoreOrders {
    pub actor: Actor,
    pub store_id: i32,
}

role_gate! {ListStoreOrders | [Role::Shopkeeper, Role::Admin]}

impl Processor<ListStoreOrders> for OrderService {
    type Output = Vec<Order>;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: ListStoreOrders) -> Result<Vec<Order>, framework::Error> {
        let actor = input.authorize()?;
        let store = self
            .db
            .process(FindStoreById { id: input.store_id })
            .await?
            .ok_or(framework::Error::NotFound)?;
        if !actor.is_self_or_admin(store.owner_id) {
            return Err(framework::Error::PermissionsDenied);
        }
        self.db
            .process(ListOrdersByStore { store_id: store.id })
            .await
    }
}
