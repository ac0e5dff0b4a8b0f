use crate::entities::delivery::DeliveryStatus;
use time::PrimitiveDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAssignedEvent {
    pub delivery_id: i32,
    pub order_id: i32,
    pub customer_id: i32,
    pub partner_id: i32,
    pub partner_user_id: i32,
    pub assigned_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStatusChangedEvent {
    pub delivery_id: i32,
    pub order_id: i32,
    pub customer_id: i32,
    pub shopkeeper_id: i32,
    pub new_status: DeliveryStatus,
    pub changed_at: PrimitiveDateTime,
}

/// The partner did not accept in time and the delivery went back to matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentExpiredEvent {
    pub delivery_id: i32,
    pub order_id: i32,
    pub partner_user_id: i32,
    /// When the lapsed assignment was made.
    pub assigned_at: PrimitiveDateTime,
    pub expired_at: PrimitiveDateTime,
}
