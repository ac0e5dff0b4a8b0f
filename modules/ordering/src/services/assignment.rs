use crate::config::DispatchConfig;
use crate::entities::Database;
use crate::entities::delivery::{
    AcceptDeliveryAssignment, BindDeliveryPartner, CreatePendingDelivery, Delivery, DeliveryStatus,
    FindDeliveryById, ListPartnerDeliveries, ReassignDeliveryPartner, ReleaseDeliveryAssignment,
};
use crate::entities::delivery_partner::{FindPartnerById, ListAssignableCandidates};
use crate::entities::delivery_tracking::RecordDeliveryStatus;
use crate::entities::order::{Order, OrderStatus};
use crate::entities::store::Store;
use crate::events::DomainEvent;
use crate::events::delivery::{AssignmentExpiredEvent, DeliveryAssignedEvent};
use crate::role_gate;
use crate::services::notification::NotificationService;
use crate::services::policy::{AssignmentPolicy, policy_for};
use crate::services::{acting_partner, load_order};
use crate::utils::actor::{Actor, Role, RoleGated};
use crate::utils::geo::GeoPoint;
use framework::now_time;
use kanau::processor::Processor;
use std::sync::Arc;
use time::PrimitiveDateTime;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct AssignmentService {
    pub db: Database,
    pub config: Arc<DispatchConfig>,
    pub policy: Arc<dyn AssignmentPolicy>,
    pub notifications: NotificationService,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned { delivery: Delivery },
    /// Nobody eligible right now; the retry sweep will try again.
    NoPartnerAvailable { delivery: Delivery },
}

impl AssignmentOutcome {
    pub fn delivery(&self) -> &Delivery {
        match self {
            AssignmentOutcome::Assigned { delivery }
            | AssignmentOutcome::NoPartnerAvailable { delivery } => delivery,
        }
    }
}

impl AssignmentService {
    pub fn new(db: Database, config: Arc<DispatchConfig>, notifications: NotificationService) -> Self {
        let policy = policy_for(config.assignment.policy);
        Self {
            db,
            config,
            policy,
            notifications,
        }
    }

    fn max_active(&self) -> i64 {
        self.config.assignment.max_active_per_partner
    }

    /// Instant before which an unaccepted assignment counts as expired.
    fn expiry_cutoff(&self, now: PrimitiveDateTime) -> PrimitiveDateTime {
        now - self.config.assignment.acceptance_timeout()
    }

    pub fn is_expired(&self, delivery: &Delivery, now: PrimitiveDateTime) -> bool {
        delivery.status == DeliveryStatus::Assigned
            && delivery.accepted_at.is_none()
            && delivery
                .assigned_at
                .is_some_and(|at| at < self.expiry_cutoff(now))
    }

    /// The delivery row of an order, created with its route estimates on first use.
    pub(crate) async fn ensure_delivery(
        &self,
        order: &Order,
        store: &Store,
    ) -> Result<Delivery, framework::Error> {
        let pickup = GeoPoint::from_parts(store.latitude, store.longitude);
        let dropoff = GeoPoint::from_parts(order.latitude, order.longitude);
        let distance = pickup.zip(dropoff).map(|(a, b)| a.distance_km(&b));
        let speed = self.config.assignment.average_speed_kmh;
        let minutes = distance
            .filter(|_| speed > 0.0)
            .map(|km| (km / speed * 60.0).ceil() as i32);
        self.db
            .process(CreatePendingDelivery {
                order_id: order.id,
                pickup_address: store.address.clone(),
                delivery_address: order.shipping_address.clone(),
                pickup_latitude: store.latitude,
                pickup_longitude: store.longitude,
                dropoff_latitude: order.latitude,
                dropoff_longitude: order.longitude,
                estimated_distance: distance.map(|km| (km * 100.0).round() / 100.0),
                estimated_time: minutes,
                delivery_fee: order.delivery_fee,
                now: now_time(),
            })
            .await
    }

    /// Offer a pending delivery to eligible partners in policy order until one binds.
    pub(crate) async fn match_partner(
        &self,
        delivery: Delivery,
        order: &Order,
        exclude: Option<i32>,
    ) -> Result<AssignmentOutcome, framework::Error> {
        let mut candidates = self
            .db
            .process(ListAssignableCandidates {
                max_active: self.max_active(),
            })
            .await?;
        candidates.retain(|c| Some(c.partner.id) != exclude);
        let pickup = GeoPoint::from_parts(delivery.pickup_latitude, delivery.pickup_longitude);
        self.policy.rank(&mut candidates, pickup);

        for candidate in candidates {
            let bound = self
                .db
                .process(BindDeliveryPartner {
                    delivery_id: delivery.id,
                    partner_id: candidate.partner.id,
                    max_active: self.max_active(),
                    now: now_time(),
                })
                .await?;
            match bound {
                Some(bound) => {
                    self.after_assigned(&bound, order, candidate.partner.user_id)
                        .await;
                    return Ok(AssignmentOutcome::Assigned { delivery: bound });
                }
                None => debug!(
                    delivery_id = delivery.id,
                    partner_id = candidate.partner.id,
                    "Candidate taken by a concurrent assignment"
                ),
            }
        }
        info!(delivery_id = delivery.id, "No delivery partner available");
        Ok(AssignmentOutcome::NoPartnerAvailable { delivery })
    }

    async fn after_assigned(&self, delivery: &Delivery, order: &Order, partner_user_id: i32) {
        let Some(partner_id) = delivery.delivery_partner_id else {
            return;
        };
        let now = now_time();
        if let Err(e) = self
            .db
            .process(RecordDeliveryStatus {
                delivery_id: delivery.id,
                status: DeliveryStatus::Assigned,
                description: Some(format!("Assigned to delivery partner #{partner_id}")),
                latitude: None,
                longitude: None,
                updated_by: None,
                now,
            })
            .await
        {
            warn!("Failed to record assignment history: {e}");
        }
        info!(
            monotonic_counter.delivery_assigned = 1,
            delivery_id = delivery.id,
            partner_id,
            "Delivery assigned"
        );
        let _ = self
            .notifications
            .process(DomainEvent::DeliveryAssigned(DeliveryAssignedEvent {
                delivery_id: delivery.id,
                order_id: order.id,
                customer_id: order.customer_id,
                partner_id,
                partner_user_id,
                assigned_at: delivery.assigned_at.unwrap_or(now),
            }))
            .await;
    }

    /// Release an unaccepted assignment that outlived the acceptance timeout and offer
    /// the delivery to someone else. Returns `None` if it was accepted or released
    /// in the meantime.
    #[instrument(skip_all, fields(delivery_id = delivery.id), err)]
    pub(crate) async fn expire_assignment(
        &self,
        delivery: &Delivery,
        now: PrimitiveDateTime,
    ) -> Result<Option<AssignmentOutcome>, framework::Error> {
        let Some(partner_id) = delivery.delivery_partner_id else {
            return Ok(None);
        };
        let Some(released) = self
            .db
            .process(ReleaseDeliveryAssignment {
                delivery_id: delivery.id,
                partner_id,
                require_unaccepted: true,
                assigned_before: Some(self.expiry_cutoff(now)),
                now,
            })
            .await?
        else {
            return Ok(None);
        };
        info!(
            monotonic_counter.assignment_expired = 1,
            partner_id, "Assignment expired"
        );
        let (order, _) = load_order(&self.db, released.order_id).await?;
        if let Some(partner) = self.db.process(FindPartnerById { id: partner_id }).await? {
            let _ = self
                .notifications
                .process(DomainEvent::AssignmentExpired(AssignmentExpiredEvent {
                    delivery_id: released.id,
                    order_id: order.id,
                    partner_user_id: partner.user_id,
                    assigned_at: delivery.assigned_at.unwrap_or(now),
                    expired_at: now,
                }))
                .await;
        }
        self.match_partner(released, &order, Some(partner_id))
            .await
            .map(Some)
    }

    /// Assign a partner as soon as the store marks the order ready, unless the
    /// delivery already has one.
    pub(crate) async fn auto_assign(&self, order: &Order, store: &Store) -> Result<(), framework::Error> {
        let delivery = self.ensure_delivery(order, store).await?;
        if delivery.status == DeliveryStatus::Pending && delivery.delivery_partner_id.is_none() {
            self.match_partner(delivery, order, None).await?;
        }
        Ok(())
    }
}

/// Assign a delivery partner to an order, picking one by policy unless
/// `delivery_partner_id` names one.
#[derive(Debug, Clone, Copy)]
pub struct AssignDelivery {
    pub actor: Actor,
    pub order_id: i32,
    pub delivery_partner_id: Option<i32>,
}

role_gate! {AssignDelivery | [Role::Admin, Role::Shopkeeper]}

impl Processor<AssignDelivery> for AssignmentService {
    type Output = AssignmentOutcome;
    type Error = framework::Error;
    #[instrument(skip_all, fields(order_id = input.order_id), err)]
    async fn process(&self, input: AssignDelivery) -> Result<AssignmentOutcome, framework::Error> {
        let actor = input.authorize()?;
        let (order, store) = load_order(&self.db, input.order_id).await?;
        if !actor.is_self_or_admin(store.owner_id) {
            warn!(user_id = actor.user_id, "Assignment requested by a foreign shopkeeper");
            return Err(framework::Error::PermissionsDenied);
        }
        match order.status {
            OrderStatus::Confirmed | OrderStatus::ReadyForPickup => {}
            status if status.is_terminal() => return Err(framework::Error::AlreadyTerminal),
            status => {
                return Err(framework::Error::conflict(format!(
                    "order in status {} cannot be assigned",
                    status.as_str()
                )));
            }
        }

        let delivery = self.ensure_delivery(&order, &store).await?;
        if delivery.status.is_terminal() {
            return Err(framework::Error::AlreadyTerminal);
        }
        if delivery.status != DeliveryStatus::Pending {
            return Err(framework::Error::conflict(
                "delivery already has a delivery partner",
            ));
        }

        let Some(partner_id) = input.delivery_partner_id else {
            return self.match_partner(delivery, &order, None).await;
        };
        let partner = self
            .db
            .process(FindPartnerById { id: partner_id })
            .await?
            .ok_or(framework::Error::NotFound)?;
        let bound = self
            .db
            .process(BindDeliveryPartner {
                delivery_id: delivery.id,
                partner_id,
                max_active: self.max_active(),
                now: now_time(),
            })
            .await?
            .ok_or_else(|| {
                framework::Error::conflict("delivery partner is not eligible for this delivery")
            })?;
        self.after_assigned(&bound, &order, partner.user_id).await;
        Ok(AssignmentOutcome::Assigned { delivery: bound })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AcceptAssignment {
    pub actor: Actor,
    pub delivery_id: i32,
}

role_gate! {AcceptAssignment | [Role::DeliveryPartner]}

impl Processor<AcceptAssignment> for AssignmentService {
    type Output = Delivery;
    type Error = framework::Error;
    #[instrument(skip_all, fields(delivery_id = input.delivery_id), err)]
    async fn process(&self, input: AcceptAssignment) -> Result<Delivery, framework::Error> {
        let actor = input.authorize()?;
        let partner = acting_partner(&self.db, actor).await?;
        let delivery = self
            .db
            .process(FindDeliveryById {
                id: input.delivery_id,
            })
            .await?
            .ok_or(framework::Error::NotFound)?;
        if delivery.delivery_partner_id != Some(partner.id) {
            warn!(partner_id = partner.id, "Accept of a delivery assigned elsewhere");
            return Err(framework::Error::PermissionsDenied);
        }
        let now = now_time();
        if self.is_expired(&delivery, now) {
            self.expire_assignment(&delivery, now).await?;
            return Err(framework::Error::conflict("assignment expired"));
        }
        if delivery.accepted_at.is_some() {
            return Ok(delivery);
        }
        self.db
            .process(AcceptDeliveryAssignment {
                delivery_id: delivery.id,
                partner_id: partner.id,
                now,
            })
            .await?
            .ok_or_else(|| framework::Error::conflict("assignment is no longer open"))
    }
}

/// The partner turns the assignment down; the delivery is offered to someone else.
#[derive(Debug, Clone, Copy)]
pub struct DeclineAssignment {
    pub actor: Actor,
    pub delivery_id: i32,
}

role_gate! {DeclineAssignment | [Role::DeliveryPartner]}

impl Processor<DeclineAssignment> for AssignmentService {
    type Output = Delivery;
    type Error = framework::Error;
    #[instrument(skip_all, fields(delivery_id = input.delivery_id), err)]
    async fn process(&self, input: DeclineAssignment) -> Result<Delivery, framework::Error> {
        let actor = input.authorize()?;
        let partner = acting_partner(&self.db, actor).await?;
        let delivery = self
            .db
            .process(FindDeliveryById {
                id: input.delivery_id,
            })
            .await?
            .ok_or(framework::Error::NotFound)?;
        if delivery.delivery_partner_id != Some(partner.id) {
            warn!(partner_id = partner.id, "Decline of a delivery assigned elsewhere");
            return Err(framework::Error::PermissionsDenied);
        }
        let released = self
            .db
            .process(ReleaseDeliveryAssignment {
                delivery_id: delivery.id,
                partner_id: partner.id,
                require_unaccepted: true,
                assigned_before: None,
                now: now_time(),
            })
            .await?
            .ok_or_else(|| framework::Error::conflict("only unaccepted assignments can be declined"))?;
        info!(partner_id = partner.id, "Assignment declined");

        let (order, _) = load_order(&self.db, released.order_id).await?;
        match self
            .match_partner(released.clone(), &order, Some(partner.id))
            .await
        {
            Ok(outcome) => Ok(outcome.delivery().clone()),
            Err(e) => {
                warn!("Re-matching after decline failed: {e}");
                Ok(released)
            }
        }
    }
}

/// Move an assignment to another partner.
#[derive(Debug, Clone, Copy)]
pub struct ReassignDelivery {
    pub actor: Actor,
    pub delivery_id: i32,
    pub delivery_partner_id: i32,
}

role_gate! {ReassignDelivery | [Role::Admin]}

impl Processor<ReassignDelivery> for AssignmentService {
    type Output = Delivery;
    type Error = framework::Error;
    #[instrument(skip_all, fields(delivery_id = input.delivery_id), err)]
    async fn process(&self, input: ReassignDelivery) -> Result<Delivery, framework::Error> {
        input.authorize()?;
        let delivery = self
            .db
            .process(FindDeliveryById {
                id: input.delivery_id,
            })
            .await?
            .ok_or(framework::Error::NotFound)?;
        let partner = self
            .db
            .process(FindPartnerById {
                id: input.delivery_partner_id,
            })
            .await?
            .ok_or(framework::Error::NotFound)?;
        let now = now_time();
        let moved = match (delivery.status, delivery.delivery_partner_id) {
            (status, _) if status.is_terminal() => return Err(framework::Error::AlreadyTerminal),
            (DeliveryStatus::Pending, None) => {
                self.db
                    .process(BindDeliveryPartner {
                        delivery_id: delivery.id,
                        partner_id: partner.id,
                        max_active: self.max_active(),
                        now,
                    })
                    .await?
            }
            (DeliveryStatus::Assigned, Some(current)) if current == partner.id => {
                return Err(framework::Error::conflict(
                    "delivery is already assigned to this partner",
                ));
            }
            (DeliveryStatus::Assigned, Some(current)) => {
                self.db
                    .process(ReassignDeliveryPartner {
                        delivery_id: delivery.id,
                        from_partner_id: current,
                        to_partner_id: partner.id,
                        max_active: self.max_active(),
                        now,
                    })
                    .await?
            }
            (status, _) => {
                return Err(framework::Error::conflict(format!(
                    "delivery in status {} cannot be reassigned",
                    status.as_str()
                )));
            }
        };
        let moved = moved.ok_or_else(|| {
            framework::Error::conflict("delivery partner is not eligible for this delivery")
        })?;
        let (order, _) = load_order(&self.db, moved.order_id).await?;
        self.after_assigned(&moved, &order, partner.user_id).await;
        Ok(moved)
    }
}

/// Deliveries the acting partner is carrying or has been offered.
#[derive(Debug, Clone, Copy)]
pub struct ListMyAssignments {
    pub actor: Actor,
}

role_gate! {ListMyAssignments | [Role::DeliveryPartner]}

impl Processor<ListMyAssignments> for AssignmentService {
    type Output = Vec<Delivery>;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: ListMyAssignments) -> Result<Vec<Delivery>, framework::Error> {
        let actor = input.authorize()?;
        let partner = acting_partner(&self.db, actor).await?;
        let deliveries = self
            .db
            .process(ListPartnerDeliveries {
                partner_id: partner.id,
                active_only: true,
            })
            .await?;
        let now = now_time();
        let mut live = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            if self.is_expired(&delivery, now) {
                self.expire_assignment(&delivery, now).await?;
            } else {
                live.push(delivery);
            }
        }
        Ok(live)
    }
}
