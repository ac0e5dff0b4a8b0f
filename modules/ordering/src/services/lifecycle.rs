//! Status rules shared by orders and deliveries.

use crate::entities::delivery::DeliveryStatus;
use crate::entities::order::OrderStatus;

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Statuses the store moves an order into. The rest follow the delivery.
    pub fn is_store_driven(self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::ReadyForPickup)
    }
}

impl DeliveryStatus {
    pub fn can_cancel(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Pending | DeliveryStatus::Assigned | DeliveryStatus::PickedUp
        )
    }

    /// The order status a delivery status drags its order into.
    pub fn order_status(self) -> Option<OrderStatus> {
        match self {
            DeliveryStatus::PickedUp => Some(OrderStatus::PickedUp),
            DeliveryStatus::InTransit => Some(OrderStatus::OutForDelivery),
            DeliveryStatus::Delivered => Some(OrderStatus::Delivered),
            DeliveryStatus::Cancelled => Some(OrderStatus::Cancelled),
            DeliveryStatus::Pending | DeliveryStatus::Assigned => None,
        }
    }
}

/// Why a requested transition cannot apply to the current status.
pub fn check_order_transition(from: OrderStatus, to: OrderStatus) -> Result<(), framework::Error> {
    if from.is_terminal() {
        return Err(framework::Error::AlreadyTerminal);
    }
    if to == OrderStatus::Cancelled || to > from {
        Ok(())
    } else {
        Err(framework::Error::conflict(format!(
            "order cannot move from {} to {}",
            from.as_str(),
            to.as_str()
        )))
    }
}

pub fn check_delivery_transition(
    from: DeliveryStatus,
    to: DeliveryStatus,
) -> Result<(), framework::Error> {
    if from.is_terminal() {
        return Err(framework::Error::AlreadyTerminal);
    }
    let allowed = match to {
        DeliveryStatus::Cancelled => from.can_cancel(),
        DeliveryStatus::Pending | DeliveryStatus::Assigned => false,
        _ => from != DeliveryStatus::Pending && to > from,
    };
    if allowed {
        Ok(())
    } else {
        Err(framework::Error::conflict(format!(
            "delivery cannot move from {} to {}",
            from.as_str(),
            to.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framework::Error;

    #[test]
    fn orders_only_move_forward() {
        assert!(check_order_transition(OrderStatus::Pending, OrderStatus::Confirmed).is_ok());
        assert!(
            check_order_transition(OrderStatus::Pending, OrderStatus::ReadyForPickup).is_ok()
        );
        assert!(matches!(
            check_order_transition(OrderStatus::ReadyForPickup, OrderStatus::Confirmed),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            check_order_transition(OrderStatus::Confirmed, OrderStatus::Confirmed),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn terminal_orders_accept_nothing() {
        assert!(matches!(
            check_order_transition(OrderStatus::Delivered, OrderStatus::Cancelled),
            Err(Error::AlreadyTerminal)
        ));
        assert!(matches!(
            check_order_transition(OrderStatus::Cancelled, OrderStatus::Confirmed),
            Err(Error::AlreadyTerminal)
        ));
    }

    #[test]
    fn delivery_cancel_window() {
        for from in [
            DeliveryStatus::Pending,
            DeliveryStatus::Assigned,
            DeliveryStatus::PickedUp,
        ] {
            assert!(check_delivery_transition(from, DeliveryStatus::Cancelled).is_ok());
        }
        assert!(matches!(
            check_delivery_transition(DeliveryStatus::InTransit, DeliveryStatus::Cancelled),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn deliveries_need_a_partner_before_moving() {
        assert!(matches!(
            check_delivery_transition(DeliveryStatus::Pending, DeliveryStatus::PickedUp),
            Err(Error::Conflict(_))
        ));
        assert!(
            check_delivery_transition(DeliveryStatus::Assigned, DeliveryStatus::PickedUp).is_ok()
        );
        assert!(
            check_delivery_transition(DeliveryStatus::Assigned, DeliveryStatus::Delivered).is_ok()
        );
        assert!(matches!(
            check_delivery_transition(DeliveryStatus::InTransit, DeliveryStatus::PickedUp),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            check_delivery_transition(DeliveryStatus::Delivered, DeliveryStatus::InTransit),
            Err(Error::AlreadyTerminal)
        ));
    }

    #[test]
    fn delivery_statuses_map_onto_order_statuses() {
        assert_eq!(
            DeliveryStatus::InTransit.order_status(),
            Some(OrderStatus::OutForDelivery)
        );
        assert_eq!(
            DeliveryStatus::PickedUp.order_status(),
            Some(OrderStatus::PickedUp)
        );
        assert_eq!(DeliveryStatus::Assigned.order_status(), None);
    }
}
