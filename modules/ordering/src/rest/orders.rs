use super::AppState;
use super::extract::{Validate, ValidatedJson, require};
use crate::entities::order::{Order, OrderStatus, PaymentMethod, PlacedOrder};
use crate::services::order::{
    CartItem, GetOrder, ListCustomerOrders, ListStoreOrders, OrderDetails, PlaceOrder,
    UpdateOrderStatus,
};
use crate::utils::actor::Actor;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use kanau::processor::Processor;
use rust_decimal::Decimal;

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemBody {
    product_id: i32,
    quantity: i32,
    price: Decimal,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderBody {
    store_id: i32,
    items: Vec<CartItemBody>,
    shipping_address: String,
    payment_method: PaymentMethod,
    latitude: Option<f64>,
    longitude: Option<f64>,
    discount_amount: Option<Decimal>,
    special_instructions: Option<String>,
}

impl Validate for PlaceOrderBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(!self.items.is_empty(), "items must not be empty")?;
        require(
            self.items.iter().all(|item| item.quantity > 0),
            "quantity must be positive",
        )?;
        require(
            !self.shipping_address.trim().is_empty(),
            "shippingAddress is required",
        )?;
        require(
            self.latitude.is_some() == self.longitude.is_some(),
            "latitude and longitude go together",
        )
    }
}

pub async fn place_order(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(body): ValidatedJson<PlaceOrderBody>,
) -> Result<(StatusCode, Json<PlacedOrder>), framework::Error> {
    let placed = state
        .orders
        .process(PlaceOrder {
            actor,
            store_id: body.store_id,
            items: body
                .items
                .into_iter()
                .map(|item| CartItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
            shipping_address: body.shipping_address,
            payment_method: body.payment_method,
            latitude: body.latitude,
            longitude: body.longitude,
            discount_amount: body.discount_amount,
            special_instructions: body.special_instructions,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

pub async fn get_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<i32>,
) -> Result<Json<OrderDetails>, framework::Error> {
    let details = state.orders.process(GetOrder { actor, order_id }).await?;
    Ok(Json(details))
}

#[derive(Debug, serde::Deserialize)]
pub struct OrderStatusBody {
    status: OrderStatus,
}

impl Validate for OrderStatusBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(
            self.status != OrderStatus::Pending,
            "an order cannot be moved back to pending",
        )
    }
}

pub async fn update_order_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<OrderStatusBody>,
) -> Result<Json<Order>, framework::Error> {
    let order = state
        .orders
        .process(UpdateOrderStatus {
            actor,
            order_id,
            status: body.status,
        })
        .await?;
    Ok(Json(order))
}

pub async fn list_customer_orders(
    State(state): State<AppState>,
    actor: Actor,
    Path(customer_id): Path<i32>,
) -> Result<Json<Vec<Order>>, framework::Error> {
    let orders = state
        .orders
        .process(ListCustomerOrders { actor, customer_id })
        .await?;
    Ok(Json(orders))
}

pub async fn list_store_orders(
    State(state): State<AppState>,
    actor: Actor,
    Path(store_id): Path<i32>,
) -> Result<Json<Vec<Order>>, framework::Error> {
    let orders = state
        .orders
        .process(ListStoreOrders { actor, store_id })
        .await?;
    Ok(Json(orders))
}
