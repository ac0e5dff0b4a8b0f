use super::delivery::{Delivery, DeliveryStatus, delivery_columns};
use super::memory::MemoryDatabase;
use kanau::processor::Processor;
use framework::sqlx::DatabaseProcessor;
use rust_decimal::Decimal;
use time::PrimitiveDateTime;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i32,
    pub customer_id: i32,
    pub store_id: i32,
    pub status: OrderStatus,

    pub total_amount: Decimal,
    pub delivery_fee: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,

    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,

    pub shipping_address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub special_instructions: Option<String>,

    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
    pub confirmed_at: Option<PrimitiveDateTime>,
    pub ready_at: Option<PrimitiveDateTime>,
    pub picked_up_at: Option<PrimitiveDateTime>,
    pub out_for_delivery_at: Option<PrimitiveDateTime>,
    pub delivered_at: Option<PrimitiveDateTime>,
    pub cancelled_at: Option<PrimitiveDateTime>,
}

/// Declaration order is the lifecycle order; the Postgres enum is declared the same way
/// so `status < $1` compares ranks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    sqlx::Type,
    serde::Serialize,
    serde::Deserialize,
)]
#[sqlx(type_name = "marketplace.order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    ReadyForPickup,
    PickedUp,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "marketplace.payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card,
    Upi,
    Wallet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "marketplace.payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: i32,
    pub order_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub price: Decimal,
    pub total_price: Decimal,
}

macro_rules! order_columns {
    () => {
        "id, customer_id, store_id, status, total_amount, delivery_fee, tax_amount, \
         discount_amount, payment_method, payment_status, shipping_address, latitude, longitude, \
         special_instructions, created_at, updated_at, confirmed_at, ready_at, picked_up_at, \
         out_for_delivery_at, delivered_at, cancelled_at"
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: i32,
    pub quantity: i32,
    pub price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub customer_id: i32,
    pub store_id: i32,
    pub items: Vec<NewOrderItem>,
    pub total_amount: Decimal,
    pub delivery_fee: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub shipping_address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub special_instructions: Option<String>,
    pub now: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

impl Processor<CreateOrder> for DatabaseProcessor {
    type Output = PlacedOrder;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:CreateOrder", err)]
    async fn process(&self, input: CreateOrder) -> Result<PlacedOrder, sqlx::Error> {
        let mut tx = self.db().begin().await?;
        let order = sqlx::query_as::<_, Order>(concat!(
            r#"
            INSERT INTO marketplace.orders (
                customer_id, store_id, status, total_amount, delivery_fee, tax_amount,
                discount_amount, payment_method, payment_status, shipping_address,
                latitude, longitude, special_instructions, created_at, updated_at
            )
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $11, $12, $12)
            RETURNING "#,
            order_columns!()
        ))
        .bind(input.customer_id)
        .bind(input.store_id)
        .bind(input.total_amount)
        .bind(input.delivery_fee)
        .bind(input.tax_amount)
        .bind(input.discount_amount)
        .bind(input.payment_method)
        .bind(&input.shipping_address)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(&input.special_instructions)
        .bind(input.now)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let row = sqlx::query_as::<_, OrderItem>(
                r#"
                INSERT INTO marketplace.order_items (order_id, product_id, quantity, price, total_price)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, order_id, product_id, quantity, price, total_price
                "#,
            )
            .bind(order.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.price)
            .bind(item.total_price)
            .fetch_one(&mut *tx)
            .await?;
            items.push(row);
        }
        tx.commit().await?;
        Ok(PlacedOrder { order, items })
    }
}

impl Processor<CreateOrder> for MemoryDatabase {
    type Output = PlacedOrder;
    type Error = framework::Error;
    async fn process(&self, input: CreateOrder) -> Result<PlacedOrder, framework::Error> {
        let mut tables = self.tables();
        let order = Order {
            id: tables.next_serial("orders"),
            customer_id: input.customer_id,
            store_id: input.store_id,
            status: OrderStatus::Pending,
            total_amount: input.total_amount,
            delivery_fee: input.delivery_fee,
            tax_amount: input.tax_amount,
            discount_amount: input.discount_amount,
            payment_method: input.payment_method,
            payment_status: PaymentStatus::Pending,
            shipping_address: input.shipping_address,
            latitude: input.latitude,
            longitude: input.longitude,
            special_instructions: input.special_instructions,
            created_at: input.now,
            updated_at: input.now,
            confirmed_at: None,
            ready_at: None,
            picked_up_at: None,
            out_for_delivery_at: None,
            delivered_at: None,
            cancelled_at: None,
        };
        let mut items = Vec::with_capacity(input.items.len());
        for item in input.items {
            let row = OrderItem {
                id: tables.next_serial("order_items"),
                order_id: order.id,
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
                total_price: item.total_price,
            };
            tables.order_items.insert(row.id, row.clone());
            items.push(row);
        }
        tables.orders.insert(order.id, order.clone());
        Ok(PlacedOrder { order, items })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindOrderById {
    pub id: i32,
}

impl Processor<FindOrderById> for DatabaseProcessor {
    type Output = Option<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindOrderById", err)]
    async fn process(&self, input: FindOrderById) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM marketplace.orders WHERE id = $1"
        ))
        .bind(input.id)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<FindOrderById> for MemoryDatabase {
    type Output = Option<Order>;
    type Error = framework::Error;
    async fn process(&self, input: FindOrderById) -> Result<Option<Order>, framework::Error> {
        Ok(self.tables().orders.get(&input.id).cloned())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListOrdersByCustomer {
    pub customer_id: i32,
}

impl Processor<ListOrdersByCustomer> for DatabaseProcessor {
    type Output = Vec<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListOrdersByCustomer", err)]
    async fn process(&self, input: ListOrdersByCustomer) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM marketplace.orders WHERE customer_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(input.customer_id)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListOrdersByCustomer> for MemoryDatabase {
    type Output = Vec<Order>;
    type Error = framework::Error;
    async fn process(&self, input: ListOrdersByCustomer) -> Result<Vec<Order>, framework::Error> {
        let tables = self.tables();
        Ok(newest_first(
            tables
                .orders
                .values()
                .filter(|o| o.customer_id == input.customer_id),
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListOrdersByStore {
    pub store_id: i32,
}

impl Processor<ListOrdersByStore> for DatabaseProcessor {
    type Output = Vec<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListOrdersByStore", err)]
    async fn process(&self, input: ListOrdersByStore) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM marketplace.orders WHERE store_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(input.store_id)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListOrdersByStore> for MemoryDatabase {
    type Output = Vec<Order>;
    type Error = framework::Error;
    async fn process(&self, input: ListOrdersByStore) -> Result<Vec<Order>, framework::Error> {
        let tables = self.tables();
        Ok(newest_first(
            tables
                .orders
                .values()
                .filter(|o| o.store_id == input.store_id),
        ))
    }
}

fn newest_first<'a>(orders: impl Iterator<Item = &'a Order>) -> Vec<Order> {
    let mut orders: Vec<Order> = orders.cloned().collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    orders
}

#[derive(Debug, Clone, Copy)]
pub struct ListOrderItems {
    pub order_id: i32,
}

impl Processor<ListOrderItems> for DatabaseProcessor {
    type Output = Vec<OrderItem>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListOrderItems", err)]
    async fn process(&self, input: ListOrderItems) -> Result<Vec<OrderItem>, sqlx::Error> {
        sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT id, order_id, product_id, quantity, price, total_price
            FROM marketplace.order_items
            WHERE order_id = $1
            ORDER BY id
            "#,
        )
        .bind(input.order_id)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListOrderItems> for MemoryDatabase {
    type Output = Vec<OrderItem>;
    type Error = framework::Error;
    async fn process(&self, input: ListOrderItems) -> Result<Vec<OrderItem>, framework::Error> {
        Ok(self
            .tables()
            .order_items
            .values()
            .filter(|item| item.order_id == input.order_id)
            .cloned()
            .collect())
    }
}

/// Move an order forward, or cancel it.
///
/// Applies only when the order is not terminal and `to` is ahead of the current status
/// (cancelling is allowed from anywhere non-terminal). `not_past` narrows the statuses
/// the order may currently be in. Returns `None` when the condition did not hold.
#[derive(Debug, Clone, Copy)]
pub struct TransitionOrderStatus {
    pub id: i32,
    pub to: OrderStatus,
    pub not_past: Option<OrderStatus>,
    pub now: PrimitiveDateTime,
}

impl Processor<TransitionOrderStatus> for DatabaseProcessor {
    type Output = Option<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:TransitionOrderStatus", err)]
    async fn process(&self, input: TransitionOrderStatus) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(concat!(
            r#"
            UPDATE marketplace.orders SET
                status = $2,
                updated_at = $4,
                confirmed_at = CASE WHEN $2 = 'confirmed' THEN $4 ELSE confirmed_at END,
                ready_at = CASE WHEN $2 = 'ready_for_pickup' THEN $4 ELSE ready_at END,
                picked_up_at = CASE WHEN $2 = 'picked_up' THEN $4 ELSE picked_up_at END,
                out_for_delivery_at = CASE WHEN $2 = 'out_for_delivery' THEN $4 ELSE out_for_delivery_at END,
                delivered_at = CASE WHEN $2 = 'delivered' THEN $4 ELSE delivered_at END,
                cancelled_at = CASE WHEN $2 = 'cancelled' THEN $4 ELSE cancelled_at END
            WHERE id = $1
              AND status NOT IN ('delivered', 'cancelled')
              AND ($2 = 'cancelled' OR status < $2)
              AND ($3::marketplace.order_status IS NULL OR status <= $3)
            RETURNING "#,
            order_columns!()
        ))
        .bind(input.id)
        .bind(input.to)
        .bind(input.not_past)
        .bind(input.now)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<TransitionOrderStatus> for MemoryDatabase {
    type Output = Option<Order>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: TransitionOrderStatus,
    ) -> Result<Option<Order>, framework::Error> {
        let mut tables = self.tables();
        let Some(order) = tables.orders.get_mut(&input.id) else {
            return Ok(None);
        };
        if !advance(order, input.to, input.not_past, input.now) {
            return Ok(None);
        }
        Ok(Some(order.clone()))
    }
}

/// Apply the guard of [`TransitionOrderStatus`] to an in-memory row and move it if it holds.
fn advance(
    order: &mut Order,
    to: OrderStatus,
    not_past: Option<OrderStatus>,
    now: PrimitiveDateTime,
) -> bool {
    let terminal = matches!(
        order.status,
        OrderStatus::Delivered | OrderStatus::Cancelled
    );
    let ahead = to == OrderStatus::Cancelled || order.status < to;
    let within = not_past.is_none_or(|limit| order.status <= limit);
    if terminal || !ahead || !within {
        return false;
    }
    order.status = to;
    order.updated_at = now;
    let stamp = match to {
        OrderStatus::Pending => None,
        OrderStatus::Confirmed => Some(&mut order.confirmed_at),
        OrderStatus::ReadyForPickup => Some(&mut order.ready_at),
        OrderStatus::PickedUp => Some(&mut order.picked_up_at),
        OrderStatus::OutForDelivery => Some(&mut order.out_for_delivery_at),
        OrderStatus::Delivered => Some(&mut order.delivered_at),
        OrderStatus::Cancelled => Some(&mut order.cancelled_at),
    };
    if let Some(stamp) = stamp {
        *stamp = Some(now);
    }
    true
}

/// Cancel an order together with its delivery. Either both change or neither does.
#[derive(Debug, Clone, Copy)]
pub struct CancelOrder {
    pub id: i32,
    pub not_past: Option<OrderStatus>,
    pub now: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// `delivery` is the delivery that was cancelled along with the order, if any.
    Cancelled {
        order: Order,
        delivery: Option<Delivery>,
    },
    /// The order is terminal, missing, or past `not_past`.
    OrderUnchanged,
    /// The delivery has gone too far to be called off.
    DeliveryInProgress(DeliveryStatus),
}

impl Processor<CancelOrder> for DatabaseProcessor {
    type Output = CancelOutcome;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:CancelOrder", err)]
    async fn process(&self, input: CancelOrder) -> Result<CancelOutcome, sqlx::Error> {
        let mut tx = self.db().begin().await?;
        let order = sqlx::query_as::<_, Order>(concat!(
            r#"
            UPDATE marketplace.orders SET
                status = 'cancelled',
                updated_at = $3,
                cancelled_at = $3
            WHERE id = $1
              AND status NOT IN ('delivered', 'cancelled')
              AND ($2::marketplace.order_status IS NULL OR status <= $2)
            RETURNING "#,
            order_columns!()
        ))
        .bind(input.id)
        .bind(input.not_past)
        .bind(input.now)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(order) = order else {
            return Ok(CancelOutcome::OrderUnchanged);
        };

        let current = sqlx::query_as::<_, (i32, DeliveryStatus)>(
            "SELECT id, status FROM marketplace.deliveries WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order.id)
        .fetch_optional(&mut *tx)
        .await?;
        let delivery = match current {
            Some((_, status)) if status.is_terminal() => None,
            Some((_, status)) if !status.can_cancel() => {
                tx.rollback().await?;
                return Ok(CancelOutcome::DeliveryInProgress(status));
            }
            Some((delivery_id, _)) => Some(
                sqlx::query_as::<_, Delivery>(concat!(
                    r#"
                    UPDATE marketplace.deliveries SET
                        status = 'cancelled',
                        updated_at = $2,
                        cancelled_at = $2
                    WHERE id = $1
                    RETURNING "#,
                    delivery_columns!()
                ))
                .bind(delivery_id)
                .bind(input.now)
                .fetch_one(&mut *tx)
                .await?,
            ),
            None => None,
        };
        tx.commit().await?;
        Ok(CancelOutcome::Cancelled { order, delivery })
    }
}

impl Processor<CancelOrder> for MemoryDatabase {
    type Output = CancelOutcome;
    type Error = framework::Error;
    async fn process(&self, input: CancelOrder) -> Result<CancelOutcome, framework::Error> {
        let mut tables = self.tables();
        let delivery_id = tables
            .deliveries
            .values()
            .find(|d| d.order_id == input.id)
            .map(|d| (d.id, d.status));
        if let Some((_, status)) = delivery_id {
            if !status.is_terminal() && !status.can_cancel() {
                return Ok(CancelOutcome::DeliveryInProgress(status));
            }
        }
        let Some(order) = tables.orders.get_mut(&input.id) else {
            return Ok(CancelOutcome::OrderUnchanged);
        };
        if !advance(order, OrderStatus::Cancelled, input.not_past, input.now) {
            return Ok(CancelOutcome::OrderUnchanged);
        }
        let order = order.clone();
        let delivery = match delivery_id {
            Some((id, status)) if !status.is_terminal() => {
                tables.deliveries.get_mut(&id).map(|delivery| {
                    delivery.status = DeliveryStatus::Cancelled;
                    delivery.updated_at = input.now;
                    delivery.cancelled_at = Some(input.now);
                    delivery.clone()
                })
            }
            _ => None,
        };
        Ok(CancelOutcome::Cancelled { order, delivery })
    }
}
