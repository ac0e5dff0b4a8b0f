use crate::entities::delivery_partner::PartnerStatus;
use time::PrimitiveDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerReviewedEvent {
    pub partner_id: i32,
    pub user_id: i32,
    pub decision: PartnerStatus,
    pub rejection_reason: Option<String>,
    pub reviewed_at: PrimitiveDateTime,
}
