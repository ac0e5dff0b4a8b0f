use crate::entities::order::OrderStatus;
use rust_decimal::Decimal;
use time::PrimitiveDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlacedEvent {
    pub order_id: i32,
    pub customer_id: i32,
    pub shopkeeper_id: i32,
    pub total_amount: Decimal,
    pub placed_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStatusChangedEvent {
    pub order_id: i32,
    pub customer_id: i32,
    pub shopkeeper_id: i32,
    pub new_status: OrderStatus,
    pub changed_at: PrimitiveDateTime,
}
