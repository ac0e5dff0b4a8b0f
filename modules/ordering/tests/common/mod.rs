#![allow(dead_code)]

use kanau::processor::Processor;
use ordering::config::DispatchConfig;
use ordering::entities::delivery::Delivery;
use ordering::entities::delivery_partner::{DeliveryPartner, PartnerStatus, VehicleType};
use ordering::entities::memory::MemoryDatabase;
use ordering::entities::order::{Order, OrderStatus, PaymentMethod};
use ordering::entities::store::Store;
use ordering::services::DispatchServices;
use ordering::services::assignment::{AssignDelivery, AssignmentOutcome};
use ordering::services::order::{CartItem, PlaceOrder, UpdateOrderStatus};
use ordering::services::partner::{RegisterPartner, ReviewPartner};
use ordering::services::push::PushGateway;
use ordering::services::store::RegisterStore;
use ordering::utils::actor::{Actor, Role};
use rust_decimal_macros::dec;

pub const ADMIN: Actor = Actor {
    user_id: 1,
    role: Role::Admin,
};
pub const CUSTOMER: Actor = Actor {
    user_id: 11,
    role: Role::Customer,
};
pub const SHOPKEEPER: Actor = Actor {
    user_id: 22,
    role: Role::Shopkeeper,
};

pub fn partner_actor(user_id: i32) -> Actor {
    Actor::new(user_id, Role::DeliveryPartner)
}

pub struct Fixture {
    pub db: MemoryDatabase,
    pub services: DispatchServices,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self::with_push(config, PushGateway::Disabled)
    }

    pub fn with_push(config: DispatchConfig, push: PushGateway) -> Self {
        let db = MemoryDatabase::new();
        let services = DispatchServices::with_push(db.clone().into(), config, push);
        Self { db, services }
    }

    pub async fn store(&self) -> Store {
        self.services
            .stores
            .process(RegisterStore {
                actor: SHOPKEEPER,
                name: "Corner Grocer".into(),
                address: "12 Market Road".to_owned(),
                latitude: Some(12.9716),
                longitude: Some(77.5946),
            })
            .await
            .unwrap()
    }

    pub async fn order(&self, store: &Store) -> Order {
        self.services
            .orders
            .process(PlaceOrder {
                actor: CUSTOMER,
                store_id: store.id,
                items: vec![
                    CartItem {
                        product_id: 501,
                        quantity: 2,
                        price: dec!(49.50),
                    },
                    CartItem {
                        product_id: 502,
                        quantity: 1,
                        price: dec!(120.00),
                    },
                ],
                shipping_address: "4 Lake View".to_owned(),
                payment_method: PaymentMethod::CashOnDelivery,
                latitude: Some(12.9352),
                longitude: Some(77.6245),
                discount_amount: Some(dec!(10.00)),
                special_instructions: None,
            })
            .await
            .unwrap()
            .order
    }

    pub async fn confirmed_order(&self, store: &Store) -> Order {
        let order = self.order(store).await;
        self.services
            .orders
            .process(UpdateOrderStatus {
                actor: SHOPKEEPER,
                order_id: order.id,
                status: OrderStatus::Confirmed,
            })
            .await
            .unwrap()
    }

    /// A signed-up and approved partner, available for work.
    pub async fn partner(&self, user_id: i32) -> DeliveryPartner {
        let partner = self
            .services
            .partners
            .process(RegisterPartner {
                actor: partner_actor(user_id),
                vehicle_type: VehicleType::Scooter,
                vehicle_number: "KA-05-7788".into(),
            })
            .await
            .unwrap();
        self.services
            .partners
            .process(ReviewPartner {
                actor: ADMIN,
                partner_id: partner.id,
                decision: PartnerStatus::Approved,
                admin_id: None,
                reason: None,
            })
            .await
            .unwrap()
    }

    pub async fn assign(&self, order: &Order, partner_id: Option<i32>) -> AssignmentOutcome {
        self.services
            .assignment
            .process(AssignDelivery {
                actor: SHOPKEEPER,
                order_id: order.id,
                delivery_partner_id: partner_id,
            })
            .await
            .unwrap()
    }

    pub async fn assigned(&self, order: &Order, partner_id: i32) -> Delivery {
        match self.assign(order, Some(partner_id)).await {
            AssignmentOutcome::Assigned { delivery } => delivery,
            other => panic!("expected an assignment, got {other:?}"),
        }
    }
}
