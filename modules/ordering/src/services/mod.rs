pub mod assignment;
pub mod lifecycle;
pub mod notification;
pub mod order;
pub mod partner;
pub mod policy;
pub mod push;
pub mod scheduler;
pub mod store;
pub mod tracking;

use crate::config::DispatchConfig;
use crate::entities::Database;
use crate::entities::delivery::Delivery;
use crate::entities::delivery_partner::{DeliveryPartner, FindPartnerByUserId};
use crate::entities::order::{FindOrderById, Order};
use crate::entities::store::{FindStoreById, Store};
use crate::utils::actor::{Actor, Role};
use assignment::AssignmentService;
use kanau::processor::Processor;
use notification::NotificationService;
use order::OrderService;
use partner::PartnerService;
use push::PushGateway;
use std::sync::Arc;
use store::StoreService;
use tracking::TrackingService;

/// Every service of the dispatch backend, wired to one database.
#[derive(Debug, Clone)]
pub struct DispatchServices {
    pub orders: OrderService,
    pub stores: StoreService,
    pub assignment: AssignmentService,
    pub tracking: TrackingService,
    pub partners: PartnerService,
    pub notifications: NotificationService,
}

impl DispatchServices {
    pub fn new(db: Database, config: DispatchConfig) -> Result<Self, framework::Error> {
        let push = PushGateway::from_config(&config.push)?;
        Ok(Self::with_push(db, config, push))
    }

    pub fn with_push(db: Database, config: DispatchConfig, push: PushGateway) -> Self {
        let config = Arc::new(config);
        let notifications = NotificationService {
            db: db.clone(),
            push,
        };
        let assignment = AssignmentService::new(db.clone(), config.clone(), notifications.clone());
        Self {
            orders: OrderService {
                db: db.clone(),
                config: config.clone(),
                assignment: assignment.clone(),
                notifications: notifications.clone(),
            },
            stores: StoreService { db: db.clone() },
            tracking: TrackingService {
                db: db.clone(),
                config,
                assignment: assignment.clone(),
                notifications: notifications.clone(),
            },
            partners: PartnerService {
                db,
                notifications: notifications.clone(),
            },
            assignment,
            notifications,
        }
    }
}

/// The order and the store that sells it.
pub(crate) async fn load_order(db: &Database, order_id: i32) -> Result<(Order, Store), framework::Error> {
    let order = db
        .process(FindOrderById { id: order_id })
        .await?
        .ok_or(framework::Error::NotFound)?;
    let store = db
        .process(FindStoreById { id: order.store_id })
        .await?
        .ok_or_else(|| {
            framework::Error::BusinessPanic(anyhow::anyhow!(
                "order {} refers to missing store {}",
                order.id,
                order.store_id
            ))
        })?;
    Ok((order, store))
}

/// The partner profile of the acting user. Users without one are not partners.
pub(crate) async fn acting_partner(
    db: &Database,
    actor: Actor,
) -> Result<DeliveryPartner, framework::Error> {
    db.process(FindPartnerByUserId {
        user_id: actor.user_id,
    })
    .await?
    .ok_or_else(|| {
        tracing::warn!(user_id = actor.user_id, "No delivery partner profile for user");
        framework::Error::PermissionsDenied
    })
}

/// Admins, the customer, the store owner and the partner carrying the delivery may
/// look at an order and its delivery.
pub(crate) async fn ensure_order_party(
    db: &Database,
    actor: Actor,
    order: &Order,
    store: &Store,
    delivery: Option<&Delivery>,
) -> Result<(), framework::Error> {
    let allowed = match actor.role {
        Role::Admin => true,
        Role::Customer => order.customer_id == actor.user_id,
        Role::Shopkeeper => store.owner_id == actor.user_id,
        Role::DeliveryPartner => match delivery.and_then(|d| d.delivery_partner_id) {
            Some(partner_id) => db
                .process(FindPartnerByUserId {
                    user_id: actor.user_id,
                })
                .await?
                .is_some_and(|p| p.id == partner_id),
            None => false,
        },
    };
    if allowed {
        Ok(())
    } else {
        tracing::warn!(user_id = actor.user_id, order_id = order.id, "Order access denied");
        Err(framework::Error::PermissionsDenied)
    }
}
