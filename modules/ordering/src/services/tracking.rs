//! Delivery progress reported by partners and read back by the other parties.

use crate::config::DispatchConfig;
use crate::entities::Database;
use crate::entities::delivery::{
    Delivery, DeliveryStatus, FindDeliveryById, RateDelivery, TransitionDeliveryStatus,
    UpdateDeliveryLocation,
};
use crate::entities::delivery_partner::{
    RecordCompletedDelivery, RefreshPartnerRating, UpdatePartnerLocation,
};
use crate::entities::delivery_tracking::{
    DeliveryStatusEntry, ListDeliveryStatusHistory, ListLocationTrail, LocationSample,
    RecordDeliveryStatus, RecordLocationSample,
};
use crate::entities::order::{Order, TransitionOrderStatus};
use crate::entities::store::Store;
use crate::events::DomainEvent;
use crate::events::delivery::DeliveryStatusChangedEvent;
use crate::role_gate;
use crate::services::assignment::AssignmentService;
use crate::services::lifecycle::check_delivery_transition;
use crate::services::notification::NotificationService;
use crate::services::{acting_partner, ensure_order_party, load_order};
use crate::utils::actor::{Actor, Role, RoleGated};
use crate::utils::geo::GeoPoint;
use framework::now_time;
use kanau::processor::Processor;
use std::sync::Arc;
use time::PrimitiveDateTime;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct TrackingService {
    pub db: Database,
    pub config: Arc<DispatchConfig>,
    pub assignment: AssignmentService,
    pub notifications: NotificationService,
}

impl TrackingService {
    async fn find_delivery(&self, delivery_id: i32) -> Result<Delivery, framework::Error> {
        self.db
            .process(FindDeliveryById { id: delivery_id })
            .await?
            .ok_or(framework::Error::NotFound)
    }

    /// The delivery with its order and store, after checking the actor may see it.
    async fn load_visible(
        &self,
        actor: Actor,
        delivery_id: i32,
    ) -> Result<(Delivery, Order, Store), framework::Error> {
        let delivery = self.find_delivery(delivery_id).await?;
        let (order, store) = load_order(&self.db, delivery.order_id).await?;
        ensure_order_party(&self.db, actor, &order, &store, Some(&delivery)).await?;
        Ok((delivery, order, store))
    }
}

/// Move a delivery along. The assigned partner drives it forward; admins may only cancel.
#[derive(Debug, Clone)]
pub struct UpdateDeliveryStatus {
    pub actor: Actor,
    pub delivery_id: i32,
    pub status: DeliveryStatus,
    /// Partner the client claims to act as; must be the acting one when given.
    pub partner_id: Option<i32>,
    /// User the client claims to act as; must be the acting one when given.
    pub updated_by: Option<i32>,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub proof_of_delivery: Option<String>,
}

impl Processor<UpdateDeliveryStatus> for TrackingService {
    type Output = Delivery;
    type Error = framework::Error;
    #[instrument(skip_all, fields(delivery_id = input.delivery_id, status = input.status.as_str()), err)]
    async fn process(&self, input: UpdateDeliveryStatus) -> Result<Delivery, framework::Error> {
        let actor = input.actor;
        if input.updated_by.is_some_and(|user| user != actor.user_id) {
            warn!(user_id = actor.user_id, "Status update on behalf of another user");
            return Err(framework::Error::PermissionsDenied);
        }
        match (input.latitude, input.longitude) {
            (None, None) => {}
            (Some(lat), Some(lng)) if GeoPoint::new(lat, lng).is_valid() => {}
            _ => return Err(framework::Error::invalid_input("invalid coordinates")),
        }
        let delivery = self.find_delivery(input.delivery_id).await?;
        let now = now_time();

        let acting_as = match actor.role {
            Role::Admin if input.status == DeliveryStatus::Cancelled => None,
            Role::DeliveryPartner => {
                let partner = acting_partner(&self.db, actor).await?;
                if input.partner_id.is_some_and(|id| id != partner.id)
                    || delivery.delivery_partner_id != Some(partner.id)
                {
                    warn!(
                        partner_id = partner.id,
                        delivery_id = delivery.id,
                        "Status update of a delivery assigned elsewhere"
                    );
                    return Err(framework::Error::PermissionsDenied);
                }
                if self.assignment.is_expired(&delivery, now) {
                    self.assignment.expire_assignment(&delivery, now).await?;
                    return Err(framework::Error::conflict("assignment expired"));
                }
                Some(partner.id)
            }
            _ => {
                warn!(user_id = actor.user_id, role = ?actor.role, "Delivery status change denied");
                return Err(framework::Error::PermissionsDenied);
            }
        };
        check_delivery_transition(delivery.status, input.status)?;

        let proof_of_delivery = input
            .proof_of_delivery
            .filter(|_| input.status == DeliveryStatus::Delivered);
        let updated = self
            .db
            .process(TransitionDeliveryStatus {
                id: delivery.id,
                partner_id: acting_as,
                to: input.status,
                proof_of_delivery,
                now,
            })
            .await?;
        let updated = match updated {
            Some(updated) => updated,
            None => {
                let current = self.find_delivery(delivery.id).await?;
                check_delivery_transition(current.status, input.status)?;
                return Err(framework::Error::conflict("delivery changed concurrently"));
            }
        };
        info!(
            monotonic_counter.delivery_transition = 1,
            from = delivery.status.as_str(),
            "Delivery status changed"
        );

        if let Err(e) = self
            .db
            .process(RecordDeliveryStatus {
                delivery_id: updated.id,
                status: updated.status,
                description: input.description,
                latitude: input.latitude,
                longitude: input.longitude,
                updated_by: Some(actor.user_id),
                now,
            })
            .await
        {
            warn!("Failed to record delivery status history: {e}");
        }

        let (order, store) = load_order(&self.db, updated.order_id).await?;
        if let Some(order_status) = updated.status.order_status() {
            let moved = self
                .db
                .process(TransitionOrderStatus {
                    id: order.id,
                    to: order_status,
                    not_past: None,
                    now,
                })
                .await?;
            if moved.is_none() {
                debug!(
                    order_id = order.id,
                    status = order.status.as_str(),
                    "Order already past the delivery status"
                );
            }
        }
        if updated.status == DeliveryStatus::Delivered {
            if let Some(partner_id) = updated.delivery_partner_id {
                if let Err(e) = self
                    .db
                    .process(RecordCompletedDelivery {
                        id: partner_id,
                        earnings: updated.delivery_fee,
                    })
                    .await
                {
                    warn!("Failed to credit delivery partner: {e}");
                }
            }
        }

        let _ = self
            .notifications
            .process(DomainEvent::DeliveryStatusChanged(DeliveryStatusChangedEvent {
                delivery_id: updated.id,
                order_id: order.id,
                customer_id: order.customer_id,
                shopkeeper_id: store.owner_id,
                new_status: updated.status,
                changed_at: now,
            }))
            .await;
        Ok(updated)
    }
}

/// A location sample pushed by the partner's device.
#[derive(Debug, Clone, Copy)]
pub struct ReportLocation {
    pub actor: Actor,
    pub delivery_id: i32,
    /// Partner the client claims to be; must be the acting one when given.
    pub partner_id: Option<i32>,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    /// Device clock; missing or future timestamps are taken as now.
    pub recorded_at: Option<PrimitiveDateTime>,
}

role_gate! {ReportLocation | [Role::DeliveryPartner]}

impl ReportLocation {
    fn validate(&self) -> Result<GeoPoint, framework::Error> {
        let point = GeoPoint::new(self.latitude, self.longitude);
        if !point.is_valid() {
            return Err(framework::Error::invalid_input("invalid coordinates"));
        }
        if self.accuracy.is_some_and(|a| !a.is_finite() || a < 0.0) {
            return Err(framework::Error::invalid_input("accuracy must not be negative"));
        }
        if self.heading.is_some_and(|h| !h.is_finite()) || self.speed.is_some_and(|s| !s.is_finite())
        {
            return Err(framework::Error::invalid_input("heading and speed must be finite"));
        }
        Ok(point)
    }
}

/// Why a sample was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    AlreadyTerminal,
    LowAccuracy,
    Stale,
    Throttled,
    /// Another sample was applied between reading and writing.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub delivery_id: i32,
    pub applied: bool,
    pub reason: Option<DropReason>,
    pub recorded_at: PrimitiveDateTime,
}

impl LocationReport {
    fn dropped(delivery_id: i32, reason: DropReason, recorded_at: PrimitiveDateTime) -> Self {
        debug!(delivery_id, ?reason, "Location sample dropped");
        Self {
            delivery_id,
            applied: false,
            reason: Some(reason),
            recorded_at,
        }
    }
}

impl Processor<ReportLocation> for TrackingService {
    type Output = LocationReport;
    type Error = framework::Error;
    #[instrument(skip_all, fields(delivery_id = input.delivery_id), err)]
    async fn process(&self, input: ReportLocation) -> Result<LocationReport, framework::Error> {
        let actor = input.authorize()?;
        let point = input.validate()?;
        let partner = acting_partner(&self.db, actor).await?;
        let delivery = self.find_delivery(input.delivery_id).await?;
        if input.partner_id.is_some_and(|id| id != partner.id)
            || delivery.delivery_partner_id != Some(partner.id)
        {
            warn!(
                partner_id = partner.id,
                delivery_id = delivery.id,
                "Location report for a delivery assigned elsewhere"
            );
            return Err(framework::Error::PermissionsDenied);
        }

        let now = now_time();
        let recorded_at = input.recorded_at.map_or(now, |at| at.min(now));
        let tracking = &self.config.tracking;
        if delivery.status.is_terminal() {
            return Ok(LocationReport::dropped(
                delivery.id,
                DropReason::AlreadyTerminal,
                recorded_at,
            ));
        }
        if input
            .accuracy
            .is_some_and(|accuracy| accuracy > tracking.max_accuracy_meters)
        {
            return Ok(LocationReport::dropped(
                delivery.id,
                DropReason::LowAccuracy,
                recorded_at,
            ));
        }
        if let Some(previous_at) = delivery.location_recorded_at {
            if recorded_at <= previous_at {
                return Ok(LocationReport::dropped(
                    delivery.id,
                    DropReason::Stale,
                    recorded_at,
                ));
            }
            let moved = GeoPoint::from_parts(delivery.current_latitude, delivery.current_longitude)
                .map_or(f64::INFINITY, |previous| previous.distance_meters(&point));
            if recorded_at - previous_at < tracking.min_report_interval()
                && moved < tracking.min_movement_meters
            {
                return Ok(LocationReport::dropped(
                    delivery.id,
                    DropReason::Throttled,
                    recorded_at,
                ));
            }
        }

        let applied = self
            .db
            .process(UpdateDeliveryLocation {
                id: delivery.id,
                partner_id: partner.id,
                latitude: point.latitude,
                longitude: point.longitude,
                accuracy: input.accuracy,
                recorded_at,
                previous_recorded_at: delivery.location_recorded_at,
                now,
            })
            .await?;
        if applied.is_none() {
            return Ok(LocationReport::dropped(
                delivery.id,
                DropReason::Superseded,
                recorded_at,
            ));
        }

        if let Err(e) = self
            .db
            .process(UpdatePartnerLocation {
                id: partner.id,
                latitude: point.latitude,
                longitude: point.longitude,
            })
            .await
        {
            warn!("Failed to update partner location: {e}");
        }
        if tracking.retain_trail {
            if let Err(e) = self
                .db
                .process(RecordLocationSample {
                    delivery_id: delivery.id,
                    delivery_partner_id: partner.id,
                    latitude: point.latitude,
                    longitude: point.longitude,
                    heading: input.heading,
                    speed: input.speed,
                    accuracy: input.accuracy,
                    recorded_at,
                })
                .await
            {
                warn!("Failed to append location trail: {e}");
            }
        }
        Ok(LocationReport {
            delivery_id: delivery.id,
            applied: true,
            reason: None,
            recorded_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub recorded_at: PrimitiveDateTime,
    /// No sample arrived within `tracking.stale_after_secs`.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub delivery: Delivery,
    pub location: Option<CurrentLocation>,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    pub history: Vec<DeliveryStatusEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct GetTrackingSnapshot {
    pub actor: Actor,
    pub delivery_id: i32,
}

impl Processor<GetTrackingSnapshot> for TrackingService {
    type Output = TrackingSnapshot;
    type Error = framework::Error;
    #[instrument(skip_all, fields(delivery_id = input.delivery_id), err)]
    async fn process(&self, input: GetTrackingSnapshot) -> Result<TrackingSnapshot, framework::Error> {
        let (delivery, _, _) = self.load_visible(input.actor, input.delivery_id).await?;
        let history = self
            .db
            .process(ListDeliveryStatusHistory {
                delivery_id: delivery.id,
            })
            .await?;
        let now = now_time();
        let stale_after = self.config.tracking.stale_after();
        let location = GeoPoint::from_parts(delivery.current_latitude, delivery.current_longitude)
            .zip(delivery.location_recorded_at)
            .map(|(point, recorded_at)| CurrentLocation {
                latitude: point.latitude,
                longitude: point.longitude,
                accuracy: delivery.current_accuracy,
                recorded_at,
                stale: now - recorded_at > stale_after,
            });
        Ok(TrackingSnapshot {
            pickup: GeoPoint::from_parts(delivery.pickup_latitude, delivery.pickup_longitude),
            dropoff: GeoPoint::from_parts(delivery.dropoff_latitude, delivery.dropoff_longitude),
            location,
            history,
            delivery,
        })
    }
}

/// Recent applied samples, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct GetLocationTrail {
    pub actor: Actor,
    pub delivery_id: i32,
}

impl Processor<GetLocationTrail> for TrackingService {
    type Output = Vec<LocationSample>;
    type Error = framework::Error;
    #[instrument(skip_all, fields(delivery_id = input.delivery_id), err)]
    async fn process(&self, input: GetLocationTrail) -> Result<Vec<LocationSample>, framework::Error> {
        let (delivery, _, _) = self.load_visible(input.actor, input.delivery_id).await?;
        self.db
            .process(ListLocationTrail {
                delivery_id: delivery.id,
                limit: self.config.tracking.trail_limit,
            })
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetDelivery {
    pub actor: Actor,
    pub delivery_id: i32,
}

impl Processor<GetDelivery> for TrackingService {
    type Output = Delivery;
    type Error = framework::Error;
    #[instrument(skip_all, fields(delivery_id = input.delivery_id), err)]
    async fn process(&self, input: GetDelivery) -> Result<Delivery, framework::Error> {
        let (delivery, _, _) = self.load_visible(input.actor, input.delivery_id).await?;
        let now = now_time();
        if !self.assignment.is_expired(&delivery, now) {
            return Ok(delivery);
        }
        match self.assignment.expire_assignment(&delivery, now).await? {
            Some(outcome) => Ok(outcome.delivery().clone()),
            None => self.find_delivery(delivery.id).await,
        }
    }
}

/// The customer rates a delivered delivery, once.
#[derive(Debug, Clone)]
pub struct RateDeliveredOrder {
    pub actor: Actor,
    pub delivery_id: i32,
    pub rating: i16,
    pub feedback: Option<String>,
}

role_gate! {RateDeliveredOrder | [Role::Customer]}

impl Processor<RateDeliveredOrder> for TrackingService {
    type Output = Delivery;
    type Error = framework::Error;
    #[instrument(skip_all, fields(delivery_id = input.delivery_id), err)]
    async fn process(&self, input: RateDeliveredOrder) -> Result<Delivery, framework::Error> {
        let actor = input.authorize()?;
        if !(1..=5).contains(&input.rating) {
            return Err(framework::Error::invalid_input("rating must be between 1 and 5"));
        }
        let (delivery, order, _) = self.load_visible(actor, input.delivery_id).await?;
        if order.customer_id != actor.user_id {
            return Err(framework::Error::PermissionsDenied);
        }
        let feedback = input
            .feedback
            .map(|f| f.trim().to_owned())
            .filter(|f| !f.is_empty());
        let rated = self
            .db
            .process(RateDelivery {
                id: delivery.id,
                rating: input.rating,
                feedback,
                now: now_time(),
            })
            .await?;
        let Some(rated) = rated else {
            return Err(if delivery.status != DeliveryStatus::Delivered {
                framework::Error::conflict("only delivered deliveries can be rated")
            } else {
                framework::Error::conflict("delivery is already rated")
            });
        };
        if let Some(partner_id) = rated.delivery_partner_id {
            if let Err(e) = self.db.process(RefreshPartnerRating { id: partner_id }).await {
                warn!("Failed to refresh partner rating: {e}");
            }
        }
        Ok(rated)
    }
}
