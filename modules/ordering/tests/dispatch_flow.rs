mod common;

use common::*;
use framework::cron::cron_one_go;
use framework::now_time;
use kanau::processor::Processor;
use ordering::config::{DispatchConfig, FcmConfig};
use ordering::entities::delivery::DeliveryStatus;
use ordering::entities::delivery_partner::FindPartnerById;
use ordering::entities::notification::{ListUserNotifications, RegisterPushToken, PushPlatform};
use ordering::entities::order::{
    CancelOrder, CancelOutcome, FindOrderById, ListOrderItems, OrderStatus,
};
use ordering::services::assignment::{AssignmentOutcome, DeclineAssignment, AcceptAssignment};
use ordering::services::order::UpdateOrderStatus;
use ordering::services::push::PushGateway;
use ordering::services::scheduler::{ExpiredAssignmentSweep, UnassignedRetrySweep};
use ordering::services::tracking::{
    DropReason, GetDelivery, GetLocationTrail, GetTrackingSnapshot, RateDeliveredOrder,
    ReportLocation, UpdateDeliveryStatus,
};
use ordering::utils::actor::Actor;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

fn move_to(actor: Actor, delivery_id: i32, status: DeliveryStatus) -> UpdateDeliveryStatus {
    UpdateDeliveryStatus {
        actor,
        delivery_id,
        status,
        partner_id: None,
        updated_by: None,
        description: None,
        latitude: None,
        longitude: None,
        proof_of_delivery: None,
    }
}

fn sample(actor: Actor, delivery_id: i32, latitude: f64, longitude: f64) -> ReportLocation {
    ReportLocation {
        actor,
        delivery_id,
        partner_id: None,
        latitude,
        longitude,
        heading: None,
        speed: None,
        accuracy: Some(8.0),
        recorded_at: None,
    }
}

#[tokio::test]
async fn order_is_bound_to_the_only_eligible_partner() {
    let fixture = Fixture::new();
    fixture.db.restart_sequence("orders", 100);
    fixture.db.restart_sequence("delivery_partners", 5);
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    assert_eq!(order.id, 100);
    let partner = fixture.partner(50).await;
    assert_eq!(partner.id, 5);

    let outcome = fixture.assign(&order, None).await;
    let AssignmentOutcome::Assigned { delivery } = outcome else {
        panic!("expected an assignment, got {outcome:?}");
    };
    assert_eq!(delivery.order_id, 100);
    assert_eq!(delivery.delivery_partner_id, Some(5));
    assert_eq!(delivery.status, DeliveryStatus::Assigned);
    assert!(delivery.assigned_at.is_some());
    assert!(delivery.estimated_distance.is_some());

    let partner_inbox = fixture
        .db
        .process(ListUserNotifications { user_id: 50 })
        .await
        .unwrap();
    assert!(partner_inbox.iter().any(|n| n.order_id == Some(100)));
}

#[tokio::test]
async fn no_partner_is_not_an_error() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    let outcome = fixture.assign(&order, None).await;
    assert!(matches!(outcome, AssignmentOutcome::NoPartnerAvailable { .. }));
    assert_eq!(outcome.delivery().status, DeliveryStatus::Pending);

    // Capacity of one: a busy partner is not offered a second order.
    let partner = fixture.partner(50).await;
    let first = fixture.assign(&order, None).await;
    assert_eq!(first.delivery().delivery_partner_id, Some(partner.id));
    let second_order = fixture.confirmed_order(&store).await;
    let second = fixture.assign(&second_order, None).await;
    assert!(matches!(second, AssignmentOutcome::NoPartnerAvailable { .. }));
}

#[tokio::test]
async fn pickup_is_stamped_and_tells_the_customer_once() {
    let fixture = Fixture::new();
    fixture.db.restart_sequence("deliveries", 7);
    fixture.db.restart_sequence("delivery_partners", 9);
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    let partner = fixture.partner(90).await;
    let delivery = fixture.assigned(&order, partner.id).await;
    assert_eq!((delivery.id, partner.id), (7, 9));

    let customer_before = fixture
        .db
        .process(ListUserNotifications { user_id: CUSTOMER.user_id })
        .await
        .unwrap()
        .len();
    let shopkeeper_before = fixture
        .db
        .process(ListUserNotifications { user_id: SHOPKEEPER.user_id })
        .await
        .unwrap()
        .len();

    let picked = fixture
        .services
        .tracking
        .process(move_to(partner_actor(90), 7, DeliveryStatus::PickedUp))
        .await
        .unwrap();
    assert_eq!(picked.status, DeliveryStatus::PickedUp);
    assert!(picked.picked_up_at.is_some());
    assert!(picked.accepted_at.is_some());

    let customer_after = fixture
        .db
        .process(ListUserNotifications { user_id: CUSTOMER.user_id })
        .await
        .unwrap();
    assert_eq!(customer_after.len(), customer_before + 1);
    let shopkeeper_after = fixture
        .db
        .process(ListUserNotifications { user_id: SHOPKEEPER.user_id })
        .await
        .unwrap();
    assert_eq!(shopkeeper_after.len(), shopkeeper_before);

    let order = fixture
        .db
        .process(FindOrderById { id: order.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::PickedUp);
    assert!(order.picked_up_at.is_some());
}

#[tokio::test]
async fn late_location_after_delivery_changes_nothing() {
    let fixture = Fixture::new();
    fixture.db.restart_sequence("deliveries", 7);
    fixture.db.restart_sequence("delivery_partners", 9);
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    let partner = fixture.partner(90).await;
    fixture.assigned(&order, partner.id).await;
    let actor = partner_actor(90);

    let applied = fixture
        .services
        .tracking
        .process(sample(actor, 7, 12.95, 77.60))
        .await
        .unwrap();
    assert!(applied.applied);
    let delivered = fixture
        .services
        .tracking
        .process(move_to(actor, 7, DeliveryStatus::Delivered))
        .await
        .unwrap();

    let late = fixture
        .services
        .tracking
        .process(sample(actor, 7, 12.99, 77.70))
        .await
        .unwrap();
    assert!(!late.applied);
    assert_eq!(late.reason, Some(DropReason::AlreadyTerminal));

    let after = fixture
        .services
        .tracking
        .process(GetDelivery {
            actor: ADMIN,
            delivery_id: 7,
        })
        .await
        .unwrap();
    assert_eq!(after.current_latitude, delivered.current_latitude);
    assert_eq!(after.location_recorded_at, delivered.location_recorded_at);

    let again = fixture
        .services
        .tracking
        .process(move_to(actor, 7, DeliveryStatus::InTransit))
        .await;
    assert!(matches!(again, Err(framework::Error::AlreadyTerminal)));
}

#[tokio::test]
async fn partner_cannot_touch_another_partners_delivery() {
    let fixture = Fixture::new();
    fixture.db.restart_sequence("deliveries", 8);
    fixture.db.restart_sequence("delivery_partners", 3);
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    let owner = fixture.partner(30).await;
    fixture.db.restart_sequence("delivery_partners", 9);
    let intruder = fixture.partner(90).await;
    assert_eq!((owner.id, intruder.id), (3, 9));
    let delivery = fixture.assigned(&order, 3).await;
    assert_eq!(delivery.id, 8);

    let status = fixture
        .services
        .tracking
        .process(move_to(partner_actor(90), 8, DeliveryStatus::PickedUp))
        .await;
    assert!(matches!(status, Err(framework::Error::PermissionsDenied)));

    let location = fixture
        .services
        .tracking
        .process(sample(partner_actor(90), 8, 12.95, 77.60))
        .await;
    assert!(matches!(location, Err(framework::Error::PermissionsDenied)));

    // Claiming to be the owner does not help either.
    let mut claimed = move_to(partner_actor(90), 8, DeliveryStatus::PickedUp);
    claimed.partner_id = Some(3);
    let claimed = fixture.services.tracking.process(claimed).await;
    assert!(matches!(claimed, Err(framework::Error::PermissionsDenied)));

    let unchanged = fixture
        .services
        .tracking
        .process(GetDelivery {
            actor: ADMIN,
            delivery_id: 8,
        })
        .await
        .unwrap();
    assert_eq!(unchanged.status, DeliveryStatus::Assigned);
}

#[tokio::test]
async fn racing_transitions_apply_once() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    let partner = fixture.partner(90).await;
    let delivery = fixture.assigned(&order, partner.id).await;
    let actor = partner_actor(90);
    let tracking = &fixture.services.tracking;

    let (a, b) = tokio::join!(
        tracking.process(move_to(actor, delivery.id, DeliveryStatus::PickedUp)),
        tracking.process(move_to(actor, delivery.id, DeliveryStatus::PickedUp)),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert!(matches!(a.err().or(b.err()), Some(framework::Error::Conflict(_))));

    tracking
        .process(move_to(actor, delivery.id, DeliveryStatus::InTransit))
        .await
        .unwrap();
    let backwards = tracking
        .process(move_to(actor, delivery.id, DeliveryStatus::PickedUp))
        .await;
    assert!(matches!(backwards, Err(framework::Error::Conflict(_))));

    let current = tracking
        .process(GetDelivery {
            actor: ADMIN,
            delivery_id: delivery.id,
        })
        .await
        .unwrap();
    assert_eq!(current.status, DeliveryStatus::InTransit);
    let order = fixture
        .db
        .process(FindOrderById { id: order.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::OutForDelivery);
}

#[tokio::test]
async fn pickup_racing_transit_ends_in_transit() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let partner = fixture.partner(90).await;
    let actor = partner_actor(90);
    let tracking = &fixture.services.tracking;

    for transit_first in [false, true] {
        let order = fixture.confirmed_order(&store).await;
        let delivery = fixture.assigned(&order, partner.id).await;
        let pickup = tracking.process(move_to(actor, delivery.id, DeliveryStatus::PickedUp));
        let transit = tracking.process(move_to(actor, delivery.id, DeliveryStatus::InTransit));
        let (picked, moving) = if transit_first {
            let (moving, picked) = tokio::join!(transit, pickup);
            (picked, moving)
        } else {
            tokio::join!(pickup, transit)
        };
        assert!(moving.is_ok());
        if let Err(e) = picked {
            assert!(matches!(e, framework::Error::Conflict(_)));
        }

        let current = tracking
            .process(GetDelivery {
                actor: ADMIN,
                delivery_id: delivery.id,
            })
            .await
            .unwrap();
        assert_eq!(current.status, DeliveryStatus::InTransit);
        let order = fixture
            .db
            .process(FindOrderById { id: order.id })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::OutForDelivery);
    }
}

#[tokio::test]
async fn delivered_notifies_customer_and_shopkeeper_with_push_down() {
    let mut config = DispatchConfig::default();
    let mut fcm = FcmConfig::new("test-key");
    fcm.endpoint = "http://127.0.0.1:1/fcm/send".to_owned();
    fcm.timeout_secs = 1;
    config.push.fcm = Some(fcm);
    let push = PushGateway::from_config(&config.push).unwrap();
    let fixture = Fixture::with_push(config, push);

    fixture
        .db
        .process(RegisterPushToken {
            user_id: CUSTOMER.user_id,
            token: "customer-device".to_owned(),
            platform: PushPlatform::Android,
            now: now_time(),
        })
        .await
        .unwrap();
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    let partner = fixture.partner(90).await;
    let delivery = fixture.assigned(&order, partner.id).await;

    let delivered = fixture
        .services
        .tracking
        .process(move_to(partner_actor(90), delivery.id, DeliveryStatus::Delivered))
        .await
        .unwrap();
    assert!(delivered.delivered_at.is_some());

    let mut delivered_notices = 0;
    for user_id in [CUSTOMER.user_id, SHOPKEEPER.user_id] {
        let inbox = fixture
            .db
            .process(ListUserNotifications { user_id })
            .await
            .unwrap();
        delivered_notices += inbox
            .iter()
            .filter(|n| {
                n.dedupe_key
                    .as_deref()
                    .is_some_and(|key| key.ends_with(":delivered"))
            })
            .count();
    }
    assert_eq!(delivered_notices, 2);

    let partner = fixture
        .db
        .process(FindPartnerById { id: partner.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(partner.total_deliveries, 1);
    assert_eq!(partner.total_earnings, delivered.delivery_fee);
}

#[tokio::test]
async fn order_totals_balance() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let order = fixture.order(&store).await;
    let items = fixture
        .db
        .process(ListOrderItems { order_id: order.id })
        .await
        .unwrap();
    let subtotal: Decimal = items.iter().map(|item| item.total_price).sum();
    assert_eq!(subtotal, dec!(219.00));
    assert_eq!(order.delivery_fee, dec!(30.00));
    assert_eq!(order.discount_amount, dec!(10.00));
    assert_eq!(
        subtotal,
        order.total_amount - order.delivery_fee - order.tax_amount + order.discount_amount
    );
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn customer_may_cancel_only_early() {
    let fixture = Fixture::new();
    let store = fixture.store().await;

    let early = fixture.confirmed_order(&store).await;
    let cancelled = fixture
        .services
        .orders
        .process(UpdateOrderStatus {
            actor: CUSTOMER,
            order_id: early.id,
            status: OrderStatus::Cancelled,
        })
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    let late = fixture.confirmed_order(&store).await;
    fixture
        .services
        .orders
        .process(UpdateOrderStatus {
            actor: SHOPKEEPER,
            order_id: late.id,
            status: OrderStatus::ReadyForPickup,
        })
        .await
        .unwrap();
    let refused = fixture
        .services
        .orders
        .process(UpdateOrderStatus {
            actor: CUSTOMER,
            order_id: late.id,
            status: OrderStatus::Cancelled,
        })
        .await;
    assert!(matches!(refused, Err(framework::Error::Conflict(_))));

    let backwards = fixture
        .services
        .orders
        .process(UpdateOrderStatus {
            actor: SHOPKEEPER,
            order_id: late.id,
            status: OrderStatus::Confirmed,
        })
        .await;
    assert!(matches!(backwards, Err(framework::Error::Conflict(_))));

    let delivery_driven = fixture
        .services
        .orders
        .process(UpdateOrderStatus {
            actor: SHOPKEEPER,
            order_id: late.id,
            status: OrderStatus::Delivered,
        })
        .await;
    assert!(matches!(
        delivery_driven,
        Err(framework::Error::PermissionsDenied)
    ));
}

#[tokio::test]
async fn order_cancel_follows_the_delivery() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let partner = fixture.partner(90).await;

    let order = fixture.confirmed_order(&store).await;
    let delivery = fixture.assigned(&order, partner.id).await;
    fixture
        .services
        .orders
        .process(UpdateOrderStatus {
            actor: SHOPKEEPER,
            order_id: order.id,
            status: OrderStatus::Cancelled,
        })
        .await
        .unwrap();
    let cancelled = fixture
        .services
        .tracking
        .process(GetDelivery {
            actor: ADMIN,
            delivery_id: delivery.id,
        })
        .await
        .unwrap();
    assert_eq!(cancelled.status, DeliveryStatus::Cancelled);

    let order = fixture.confirmed_order(&store).await;
    let delivery = fixture.assigned(&order, partner.id).await;
    let actor = partner_actor(90);
    for status in [DeliveryStatus::PickedUp, DeliveryStatus::InTransit] {
        fixture
            .services
            .tracking
            .process(move_to(actor, delivery.id, status))
            .await
            .unwrap();
    }
    let refused = fixture
        .services
        .orders
        .process(UpdateOrderStatus {
            actor: ADMIN,
            order_id: order.id,
            status: OrderStatus::Cancelled,
        })
        .await;
    assert!(matches!(refused, Err(framework::Error::Conflict(_))));
    let order = fixture
        .db
        .process(FindOrderById { id: order.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::OutForDelivery);
}

#[tokio::test]
async fn refused_cancel_leaves_order_and_delivery_alone() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let partner = fixture.partner(90).await;
    let order = fixture.confirmed_order(&store).await;
    let delivery = fixture.assigned(&order, partner.id).await;

    // The order is already past what the caller may cancel.
    let outcome = fixture
        .db
        .process(CancelOrder {
            id: order.id,
            not_past: Some(OrderStatus::Pending),
            now: now_time(),
        })
        .await
        .unwrap();
    assert_eq!(outcome, CancelOutcome::OrderUnchanged);
    let untouched = fixture
        .db
        .process(ordering::entities::delivery::FindDeliveryById { id: delivery.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, DeliveryStatus::Assigned);
    assert_eq!(untouched.cancelled_at, None);

    let actor = partner_actor(90);
    for status in [DeliveryStatus::PickedUp, DeliveryStatus::InTransit] {
        fixture
            .services
            .tracking
            .process(move_to(actor, delivery.id, status))
            .await
            .unwrap();
    }
    let outcome = fixture
        .db
        .process(CancelOrder {
            id: order.id,
            not_past: None,
            now: now_time(),
        })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CancelOutcome::DeliveryInProgress(DeliveryStatus::InTransit)
    );
    let order = fixture
        .db
        .process(FindOrderById { id: order.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::OutForDelivery);
    assert_eq!(order.cancelled_at, None);
}

#[tokio::test]
async fn admin_cancel_of_delivery_cancels_the_order() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let partner = fixture.partner(90).await;
    let order = fixture.confirmed_order(&store).await;
    let delivery = fixture.assigned(&order, partner.id).await;

    let forward = fixture
        .services
        .tracking
        .process(move_to(ADMIN, delivery.id, DeliveryStatus::PickedUp))
        .await;
    assert!(matches!(forward, Err(framework::Error::PermissionsDenied)));

    let cancelled = fixture
        .services
        .tracking
        .process(move_to(ADMIN, delivery.id, DeliveryStatus::Cancelled))
        .await
        .unwrap();
    assert_eq!(cancelled.status, DeliveryStatus::Cancelled);
    let order = fixture
        .db
        .process(FindOrderById { id: order.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn declined_delivery_goes_to_the_next_partner() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let first = fixture.partner(30).await;
    let second = fixture.partner(40).await;
    let order = fixture.confirmed_order(&store).await;

    let outcome = fixture.assign(&order, None).await;
    assert_eq!(outcome.delivery().delivery_partner_id, Some(first.id));

    let redirected = fixture
        .services
        .assignment
        .process(DeclineAssignment {
            actor: partner_actor(30),
            delivery_id: outcome.delivery().id,
        })
        .await
        .unwrap();
    assert_eq!(redirected.delivery_partner_id, Some(second.id));
    assert_eq!(redirected.status, DeliveryStatus::Assigned);

    let accepted = fixture
        .services
        .assignment
        .process(AcceptAssignment {
            actor: partner_actor(40),
            delivery_id: redirected.id,
        })
        .await
        .unwrap();
    assert!(accepted.accepted_at.is_some());

    let late_decline = fixture
        .services
        .assignment
        .process(DeclineAssignment {
            actor: partner_actor(40),
            delivery_id: redirected.id,
        })
        .await;
    assert!(matches!(late_decline, Err(framework::Error::Conflict(_))));
}

#[tokio::test]
async fn unaccepted_assignment_expires_to_another_partner() {
    let mut config = DispatchConfig::default();
    config.assignment.acceptance_timeout_secs = 0;
    let fixture = Fixture::with_config(config);
    let store = fixture.store().await;
    let slow = fixture.partner(30).await;
    let quick = fixture.partner(40).await;
    let order = fixture.confirmed_order(&store).await;
    let delivery = fixture.assigned(&order, slow.id).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    let assignment = &fixture.services.assignment;
    let report = cron_one_go::<ExpiredAssignmentSweep>(assignment, assignment, now_time())
        .await
        .unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);

    let moved = fixture
        .db
        .process(ordering::entities::delivery::FindDeliveryById { id: delivery.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.delivery_partner_id, Some(quick.id));

    let slow_inbox = fixture
        .db
        .process(ListUserNotifications { user_id: 30 })
        .await
        .unwrap();
    assert!(slow_inbox.iter().any(|n| {
        n.dedupe_key
            .as_deref()
            .is_some_and(|key| key.contains(&format!(":expired-{}-", delivery.id)))
    }));
}

#[tokio::test]
async fn partner_bound_again_after_expiry_is_told_again() {
    let mut config = DispatchConfig::default();
    config.assignment.acceptance_timeout_secs = 0;
    let fixture = Fixture::with_config(config);
    let store = fixture.store().await;
    let only = fixture.partner(30).await;
    let order = fixture.confirmed_order(&store).await;
    let delivery = fixture.assigned(&order, only.id).await;
    let assignment = &fixture.services.assignment;

    tokio::time::sleep(Duration::from_millis(20)).await;
    let expired = cron_one_go::<ExpiredAssignmentSweep>(assignment, assignment, now_time())
        .await
        .unwrap();
    assert_eq!(expired.processed, 1);
    let released = fixture
        .db
        .process(ordering::entities::delivery::FindDeliveryById { id: delivery.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.status, DeliveryStatus::Pending);
    assert_eq!(released.delivery_partner_id, None);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let retried = cron_one_go::<UnassignedRetrySweep>(assignment, assignment, now_time())
        .await
        .unwrap();
    assert_eq!(retried.failed, 0);
    let rebound = fixture
        .db
        .process(ordering::entities::delivery::FindDeliveryById { id: delivery.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rebound.delivery_partner_id, Some(only.id));

    let count = |inbox: &[ordering::entities::notification::Notification], marker: &str| {
        inbox
            .iter()
            .filter(|n| n.dedupe_key.as_deref().is_some_and(|key| key.contains(marker)))
            .count()
    };
    let partner_inbox = fixture
        .db
        .process(ListUserNotifications { user_id: 30 })
        .await
        .unwrap();
    assert_eq!(count(&partner_inbox, ":assigned-"), 2);
    assert_eq!(count(&partner_inbox, ":expired-"), 1);
    let customer_inbox = fixture
        .db
        .process(ListUserNotifications {
            user_id: CUSTOMER.user_id,
        })
        .await
        .unwrap();
    assert_eq!(count(&customer_inbox, ":assigned-"), 2);
}

#[tokio::test]
async fn location_samples_are_filtered() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    let partner = fixture.partner(90).await;
    let delivery = fixture.assigned(&order, partner.id).await;
    let actor = partner_actor(90);
    let tracking = &fixture.services.tracking;
    let start = now_time() - time::Duration::minutes(5);

    let at = |offset_secs: i64, latitude: f64, accuracy: f64| ReportLocation {
        recorded_at: Some(start + time::Duration::seconds(offset_secs)),
        accuracy: Some(accuracy),
        ..sample(actor, delivery.id, latitude, 77.60)
    };

    let first = tracking.process(at(0, 12.9500, 8.0)).await.unwrap();
    assert!(first.applied);

    let blurry = tracking.process(at(10, 12.9600, 250.0)).await.unwrap();
    assert_eq!(blurry.reason, Some(DropReason::LowAccuracy));

    let jitter = tracking.process(at(1, 12.95001, 8.0)).await.unwrap();
    assert_eq!(jitter.reason, Some(DropReason::Throttled));

    let moved = tracking.process(at(1, 12.9510, 8.0)).await.unwrap();
    assert!(moved.applied, "{moved:?}");

    let old = tracking.process(at(1, 12.9600, 8.0)).await.unwrap();
    assert_eq!(old.reason, Some(DropReason::Stale));

    let idle = tracking.process(at(30, 12.9510, 8.0)).await.unwrap();
    assert!(idle.applied);

    let future = tracking
        .process(ReportLocation {
            recorded_at: Some(now_time() + time::Duration::hours(1)),
            ..sample(actor, delivery.id, 12.97, 77.61)
        })
        .await
        .unwrap();
    assert!(future.applied);
    assert!(future.recorded_at <= now_time());

    let invalid = tracking
        .process(sample(actor, delivery.id, 91.0, 77.60))
        .await;
    assert!(matches!(invalid, Err(framework::Error::InvalidInput(_))));

    let trail = tracking
        .process(GetLocationTrail {
            actor: CUSTOMER,
            delivery_id: delivery.id,
        })
        .await
        .unwrap();
    assert_eq!(trail.len(), 4);
    assert!(trail.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));

    let partner = fixture
        .db
        .process(FindPartnerById { id: partner.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(partner.current_latitude, Some(12.97));
}

#[tokio::test]
async fn snapshot_flags_stale_locations() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    let partner = fixture.partner(90).await;
    let delivery = fixture.assigned(&order, partner.id).await;
    let actor = partner_actor(90);

    let snapshot = fixture
        .services
        .tracking
        .process(GetTrackingSnapshot {
            actor: CUSTOMER,
            delivery_id: delivery.id,
        })
        .await
        .unwrap();
    assert!(snapshot.location.is_none());
    assert!(snapshot.pickup.is_some());
    assert_eq!(snapshot.history.len(), 1);

    fixture
        .services
        .tracking
        .process(ReportLocation {
            recorded_at: Some(now_time() - time::Duration::minutes(10)),
            ..sample(actor, delivery.id, 12.95, 77.60)
        })
        .await
        .unwrap();
    let snapshot = fixture
        .services
        .tracking
        .process(GetTrackingSnapshot {
            actor: SHOPKEEPER,
            delivery_id: delivery.id,
        })
        .await
        .unwrap();
    let location = snapshot.location.unwrap();
    assert!(location.stale);
    assert_eq!(location.accuracy, Some(8.0));

    fixture
        .services
        .tracking
        .process(sample(actor, delivery.id, 12.96, 77.60))
        .await
        .unwrap();
    let snapshot = fixture
        .services
        .tracking
        .process(GetTrackingSnapshot {
            actor: CUSTOMER,
            delivery_id: delivery.id,
        })
        .await
        .unwrap();
    assert!(!snapshot.location.unwrap().stale);

    let stranger = fixture
        .services
        .tracking
        .process(GetTrackingSnapshot {
            actor: Actor::new(77, ordering::utils::actor::Role::Customer),
            delivery_id: delivery.id,
        })
        .await;
    assert!(matches!(stranger, Err(framework::Error::PermissionsDenied)));
}

#[tokio::test]
async fn delivered_orders_are_rated_once() {
    let fixture = Fixture::new();
    let store = fixture.store().await;
    let order = fixture.confirmed_order(&store).await;
    let partner = fixture.partner(90).await;
    let delivery = fixture.assigned(&order, partner.id).await;
    let rate = |rating| RateDeliveredOrder {
        actor: CUSTOMER,
        delivery_id: delivery.id,
        rating,
        feedback: Some("Quick and friendly".to_owned()),
    };

    let early = fixture.services.tracking.process(rate(4)).await;
    assert!(matches!(early, Err(framework::Error::Conflict(_))));

    fixture
        .services
        .tracking
        .process(move_to(partner_actor(90), delivery.id, DeliveryStatus::Delivered))
        .await
        .unwrap();
    let rated = fixture.services.tracking.process(rate(4)).await.unwrap();
    assert_eq!(rated.customer_rating, Some(4));

    let twice = fixture.services.tracking.process(rate(5)).await;
    assert!(matches!(twice, Err(framework::Error::Conflict(_))));
    let out_of_range = fixture.services.tracking.process(rate(6)).await;
    assert!(matches!(out_of_range, Err(framework::Error::InvalidInput(_))));

    let partner = fixture
        .db
        .process(FindPartnerById { id: partner.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(partner.rating, dec!(4));
}
