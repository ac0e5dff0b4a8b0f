//! Domain events emitted after a state change has been committed, and the
//! notifications each one fans out to.

pub mod delivery;
pub mod order;
pub mod partner;

use crate::entities::delivery::DeliveryStatus;
use crate::entities::delivery_partner::PartnerStatus;
use crate::entities::notification::NotificationKind;
use crate::entities::order::OrderStatus;
use delivery::{AssignmentExpiredEvent, DeliveryAssignedEvent, DeliveryStatusChangedEvent};
use order::{OrderPlacedEvent, OrderStatusChangedEvent};
use partner::PartnerReviewedEvent;
use time::PrimitiveDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    OrderPlaced(OrderPlacedEvent),
    OrderStatusChanged(OrderStatusChangedEvent),
    DeliveryAssigned(DeliveryAssignedEvent),
    DeliveryStatusChanged(DeliveryStatusChangedEvent),
    AssignmentExpired(AssignmentExpiredEvent),
    PartnerReviewed(PartnerReviewedEvent),
}

/// One notification a recipient should get for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub user_id: i32,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub order_id: Option<i32>,
    pub dedupe_key: String,
}

impl Notice {
    fn new(
        user_id: i32,
        kind: NotificationKind,
        subject: Subject,
        marker: &str,
        title: &str,
        message: String,
    ) -> Self {
        let (order_id, subject_key) = match subject {
            Subject::Order(id) => (Some(id), format!("order-{id}")),
            Subject::Partner(id) => (None, format!("partner-{id}")),
        };
        Self {
            user_id,
            kind,
            title: title.to_owned(),
            message,
            order_id,
            dedupe_key: format!("{user_id}:{}:{subject_key}:{marker}", kind.as_str()),
        }
    }
}

/// Names one assignment of a delivery, so a partner bound again later is told again.
fn assignment_stamp(at: PrimitiveDateTime) -> i128 {
    at.assume_utc().unix_timestamp_nanos() / 1_000
}

#[derive(Debug, Clone, Copy)]
enum Subject {
    Order(i32),
    Partner(i32),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::OrderPlaced(_) => "order_placed",
            DomainEvent::OrderStatusChanged(_) => "order_status_changed",
            DomainEvent::DeliveryAssigned(_) => "delivery_assigned",
            DomainEvent::DeliveryStatusChanged(_) => "delivery_status_changed",
            DomainEvent::AssignmentExpired(_) => "assignment_expired",
            DomainEvent::PartnerReviewed(_) => "partner_reviewed",
        }
    }

    pub fn notices(&self) -> Vec<Notice> {
        use NotificationKind::{Account, Delivery, Order};
        match self {
            DomainEvent::OrderPlaced(e) => vec![Notice::new(
                e.shopkeeper_id,
                Order,
                Subject::Order(e.order_id),
                "placed",
                "New order received",
                format!("Order #{} was placed for {}.", e.order_id, e.total_amount),
            )],
            DomainEvent::OrderStatusChanged(e) => {
                let subject = Subject::Order(e.order_id);
                let marker = e.new_status.as_str();
                match e.new_status {
                    OrderStatus::Confirmed => vec![Notice::new(
                        e.customer_id,
                        Order,
                        subject,
                        marker,
                        "Order confirmed",
                        format!("The store confirmed your order #{}.", e.order_id),
                    )],
                    OrderStatus::ReadyForPickup => vec![Notice::new(
                        e.customer_id,
                        Order,
                        subject,
                        marker,
                        "Order ready",
                        format!("Your order #{} is packed and waiting for pickup.", e.order_id),
                    )],
                    OrderStatus::Cancelled => vec![
                        Notice::new(
                            e.customer_id,
                            Order,
                            subject,
                            marker,
                            "Order cancelled",
                            format!("Your order #{} was cancelled.", e.order_id),
                        ),
                        Notice::new(
                            e.shopkeeper_id,
                            Order,
                            subject,
                            marker,
                            "Order cancelled",
                            format!("Order #{} was cancelled.", e.order_id),
                        ),
                    ],
                    _ => Vec::new(),
                }
            }
            DomainEvent::DeliveryAssigned(e) => {
                let subject = Subject::Order(e.order_id);
                let marker = format!(
                    "assigned-{}-{}",
                    e.partner_id,
                    assignment_stamp(e.assigned_at)
                );
                vec![
                    Notice::new(
                        e.customer_id,
                        Delivery,
                        subject,
                        &marker,
                        "Delivery partner assigned",
                        format!("A delivery partner is on the way for order #{}.", e.order_id),
                    ),
                    Notice::new(
                        e.partner_user_id,
                        Delivery,
                        subject,
                        &marker,
                        "New delivery assignment",
                        format!(
                            "Delivery #{} for order #{} is assigned to you.",
                            e.delivery_id, e.order_id
                        ),
                    ),
                ]
            }
            DomainEvent::DeliveryStatusChanged(e) => {
                let subject = Subject::Order(e.order_id);
                let marker = e.new_status.as_str();
                let to_customer = |title: &str, message: String| {
                    Notice::new(e.customer_id, Delivery, subject, marker, title, message)
                };
                match e.new_status {
                    DeliveryStatus::PickedUp => vec![to_customer(
                        "Order picked up",
                        format!("Your order #{} has been picked up.", e.order_id),
                    )],
                    DeliveryStatus::InTransit => vec![to_customer(
                        "Out for delivery",
                        format!("Your order #{} is on its way.", e.order_id),
                    )],
                    DeliveryStatus::Delivered => vec![
                        to_customer(
                            "Order delivered",
                            format!("Your order #{} has been delivered.", e.order_id),
                        ),
                        Notice::new(
                            e.shopkeeper_id,
                            Delivery,
                            subject,
                            marker,
                            "Order delivered",
                            format!("Order #{} reached the customer.", e.order_id),
                        ),
                    ],
                    DeliveryStatus::Cancelled => vec![
                        to_customer(
                            "Delivery cancelled",
                            format!("The delivery of order #{} was cancelled.", e.order_id),
                        ),
                        Notice::new(
                            e.shopkeeper_id,
                            Delivery,
                            subject,
                            marker,
                            "Delivery cancelled",
                            format!("The delivery of order #{} was cancelled.", e.order_id),
                        ),
                    ],
                    DeliveryStatus::Pending | DeliveryStatus::Assigned => Vec::new(),
                }
            }
            DomainEvent::AssignmentExpired(e) => vec![Notice::new(
                e.partner_user_id,
                Delivery,
                Subject::Order(e.order_id),
                &format!("expired-{}-{}", e.delivery_id, assignment_stamp(e.assigned_at)),
                "Assignment expired",
                format!(
                    "Delivery #{} was offered to another partner because it was not accepted in time.",
                    e.delivery_id
                ),
            )],
            DomainEvent::PartnerReviewed(e) => {
                let subject = Subject::Partner(e.partner_id);
                let marker = e.decision.as_str();
                match e.decision {
                    PartnerStatus::Approved => vec![Notice::new(
                        e.user_id,
                        Account,
                        subject,
                        marker,
                        "Application approved",
                        "You can now receive delivery assignments.".to_owned(),
                    )],
                    PartnerStatus::Rejected => vec![Notice::new(
                        e.user_id,
                        Account,
                        subject,
                        marker,
                        "Application rejected",
                        match &e.rejection_reason {
                            Some(reason) => format!("Your application was rejected: {reason}"),
                            None => "Your application was rejected.".to_owned(),
                        },
                    )],
                    PartnerStatus::Pending => Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framework::now_time;

    fn delivery_changed(status: DeliveryStatus) -> DomainEvent {
        DomainEvent::DeliveryStatusChanged(DeliveryStatusChangedEvent {
            delivery_id: 7,
            order_id: 100,
            customer_id: 11,
            shopkeeper_id: 22,
            new_status: status,
            changed_at: now_time(),
        })
    }

    fn recipients(event: &DomainEvent) -> Vec<i32> {
        event.notices().iter().map(|n| n.user_id).collect()
    }

    #[test]
    fn delivery_transitions_reach_the_right_people() {
        assert_eq!(recipients(&delivery_changed(DeliveryStatus::PickedUp)), vec![11]);
        assert_eq!(recipients(&delivery_changed(DeliveryStatus::InTransit)), vec![11]);
        assert_eq!(
            recipients(&delivery_changed(DeliveryStatus::Delivered)),
            vec![11, 22]
        );
        assert_eq!(
            recipients(&delivery_changed(DeliveryStatus::Cancelled)),
            vec![11, 22]
        );
        assert!(recipients(&delivery_changed(DeliveryStatus::Assigned)).is_empty());
    }

    #[test]
    fn order_events_reach_the_right_people() {
        let placed = DomainEvent::OrderPlaced(OrderPlacedEvent {
            order_id: 100,
            customer_id: 11,
            shopkeeper_id: 22,
            total_amount: rust_decimal::Decimal::new(25000, 2),
            placed_at: now_time(),
        });
        assert_eq!(recipients(&placed), vec![22]);

        let changed = |status| {
            DomainEvent::OrderStatusChanged(OrderStatusChangedEvent {
                order_id: 100,
                customer_id: 11,
                shopkeeper_id: 22,
                new_status: status,
                changed_at: now_time(),
            })
        };
        assert_eq!(recipients(&changed(OrderStatus::Confirmed)), vec![11]);
        assert_eq!(recipients(&changed(OrderStatus::ReadyForPickup)), vec![11]);
        assert_eq!(recipients(&changed(OrderStatus::Cancelled)), vec![11, 22]);
        assert!(recipients(&changed(OrderStatus::OutForDelivery)).is_empty());
    }

    #[test]
    fn dedupe_keys_identify_user_kind_order_and_status() {
        let notices = delivery_changed(DeliveryStatus::Delivered).notices();
        assert_eq!(notices[0].dedupe_key, "11:delivery:order-100:delivered");
        assert_eq!(notices[1].dedupe_key, "22:delivery:order-100:delivered");
        assert_eq!(notices[0].order_id, Some(100));
    }

    #[test]
    fn assignment_reaches_customer_and_partner() {
        let event = DomainEvent::DeliveryAssigned(DeliveryAssignedEvent {
            delivery_id: 7,
            order_id: 100,
            customer_id: 11,
            partner_id: 5,
            partner_user_id: 55,
            assigned_at: now_time(),
        });
        assert_eq!(recipients(&event), vec![11, 55]);
    }

    #[test]
    fn each_assignment_gets_its_own_dedupe_key() {
        let first = time::macros::datetime!(2026-10-17 09:30:00);
        let assigned = |assigned_at| {
            DomainEvent::DeliveryAssigned(DeliveryAssignedEvent {
                delivery_id: 7,
                order_id: 100,
                customer_id: 11,
                partner_id: 5,
                partner_user_id: 55,
                assigned_at,
            })
            .notices()
        };
        let again = assigned(first + time::Duration::seconds(90));
        let first = assigned(first);
        assert_eq!(
            first[1].dedupe_key,
            "55:delivery:order-100:assigned-5-1792229400000000"
        );
        assert_ne!(first[0].dedupe_key, again[0].dedupe_key);
        assert_ne!(first[1].dedupe_key, again[1].dedupe_key);

        let expired = |assigned_at| {
            DomainEvent::AssignmentExpired(AssignmentExpiredEvent {
                delivery_id: 7,
                order_id: 100,
                partner_user_id: 55,
                assigned_at,
                expired_at: now_time(),
            })
            .notices()
        };
        let at = time::macros::datetime!(2026-10-17 09:30:00);
        assert_ne!(
            expired(at)[0].dedupe_key,
            expired(at + time::Duration::seconds(90))[0].dedupe_key
        );
    }
}
