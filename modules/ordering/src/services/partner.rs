use crate::entities::Database;
use crate::entities::delivery_partner::{
    DeliveryPartner, FindPartnerById, ListDeliveryPartners, PartnerStatus, RegisterDeliveryPartner,
    ReviewPartnerApplication, SetPartnerAvailability, VehicleType,
};
use crate::events::DomainEvent;
use crate::events::partner::PartnerReviewedEvent;
use crate::role_gate;
use crate::services::acting_partner;
use crate::services::notification::NotificationService;
use crate::utils::actor::{Actor, Role, RoleGated};
use compact_str::CompactString;
use framework::now_time;
use kanau::processor::Processor;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct PartnerService {
    pub db: Database,
    pub notifications: NotificationService,
}

/// Apply to deliver. The application waits for an admin review.
#[derive(Debug, Clone)]
pub struct RegisterPartner {
    pub actor: Actor,
    pub vehicle_type: VehicleType,
    pub vehicle_number: CompactString,
}

role_gate! {RegisterPartner | [Role::DeliveryPartner]}

impl Processor<RegisterPartner> for PartnerService {
    type Output = DeliveryPartner;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: RegisterPartner) -> Result<DeliveryPartner, framework::Error> {
        let actor = input.authorize()?;
        if input.vehicle_number.trim().is_empty() {
            return Err(framework::Error::invalid_input("vehicle number is required"));
        }
        let partner = self
            .db
            .process(RegisterDeliveryPartner {
                user_id: actor.user_id,
                vehicle_type: input.vehicle_type,
                vehicle_number: input.vehicle_number,
                now: now_time(),
            })
            .await
            .map_err(|e| match e {
                framework::Error::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    framework::Error::conflict("user is already registered as a delivery partner")
                }
                e => e,
            })?;
        info!(partner_id = partner.id, "Delivery partner application received");
        Ok(partner)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListPartners {
    pub actor: Actor,
    pub status: Option<PartnerStatus>,
}

role_gate! {ListPartners | [Role::Admin]}

impl Processor<ListPartners> for PartnerService {
    type Output = Vec<DeliveryPartner>;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: ListPartners) -> Result<Vec<DeliveryPartner>, framework::Error> {
        input.authorize()?;
        self.db
            .process(ListDeliveryPartners {
                status: input.status,
            })
            .await
    }
}

/// Approve or reject a pending application.
#[derive(Debug, Clone)]
pub struct ReviewPartner {
    pub actor: Actor,
    pub partner_id: i32,
    pub decision: PartnerStatus,
    /// Must name the acting admin when given.
    pub admin_id: Option<i32>,
    pub reason: Option<String>,
}

role_gate! {ReviewPartner | [Role::Admin]}

impl Processor<ReviewPartner> for PartnerService {
    type Output = DeliveryPartner;
    type Error = framework::Error;
    #[instrument(skip_all, fields(partner_id = input.partner_id, decision = input.decision.as_str()), err)]
    async fn process(&self, input: ReviewPartner) -> Result<DeliveryPartner, framework::Error> {
        let actor = input.authorize()?;
        if input.admin_id.is_some_and(|id| id != actor.user_id) {
            warn!(user_id = actor.user_id, "Review on behalf of another admin");
            return Err(framework::Error::PermissionsDenied);
        }
        let reason = input
            .reason
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty());
        let rejection_reason = match input.decision {
            PartnerStatus::Approved => None,
            PartnerStatus::Rejected if reason.is_none() => {
                return Err(framework::Error::invalid_input(
                    "a rejection needs a reason",
                ));
            }
            PartnerStatus::Rejected => reason,
            PartnerStatus::Pending => {
                return Err(framework::Error::invalid_input(
                    "a review must approve or reject",
                ));
            }
        };

        let now = now_time();
        let reviewed = self
            .db
            .process(ReviewPartnerApplication {
                id: input.partner_id,
                decision: input.decision,
                reviewed_by: actor.user_id,
                rejection_reason,
                now,
            })
            .await?;
        let reviewed = match reviewed {
            Some(reviewed) => reviewed,
            None => {
                let current = self
                    .db
                    .process(FindPartnerById {
                        id: input.partner_id,
                    })
                    .await?
                    .ok_or(framework::Error::NotFound)?;
                return Err(framework::Error::conflict(format!(
                    "application is already {}",
                    current.status.as_str()
                )));
            }
        };
        info!(
            monotonic_counter.partner_reviewed = 1,
            decision = reviewed.status.as_str(),
            "Delivery partner application reviewed"
        );
        let _ = self
            .notifications
            .process(DomainEvent::PartnerReviewed(PartnerReviewedEvent {
                partner_id: reviewed.id,
                user_id: reviewed.user_id,
                decision: reviewed.status,
                rejection_reason: reviewed.rejection_reason.clone(),
                reviewed_at: now,
            }))
            .await;
        Ok(reviewed)
    }
}

/// The partner goes on or off duty. Only approved partners can.
#[derive(Debug, Clone, Copy)]
pub struct SetAvailability {
    pub actor: Actor,
    pub is_available: bool,
}

role_gate! {SetAvailability | [Role::DeliveryPartner]}

impl Processor<SetAvailability> for PartnerService {
    type Output = DeliveryPartner;
    type Error = framework::Error;
    #[instrument(skip_all, fields(is_available = input.is_available), err)]
    async fn process(&self, input: SetAvailability) -> Result<DeliveryPartner, framework::Error> {
        let actor = input.authorize()?;
        let partner = acting_partner(&self.db, actor).await?;
        if partner.status != PartnerStatus::Approved {
            return Err(framework::Error::conflict(format!(
                "application is {}",
                partner.status.as_str()
            )));
        }
        self.db
            .process(SetPartnerAvailability {
                user_id: actor.user_id,
                is_available: input.is_available,
            })
            .await?
            .ok_or_else(|| framework::Error::conflict("application is no longer approved"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::memory::MemoryDatabase;
    use crate::entities::notification::ListUserNotifications;
    use crate::services::push::PushGateway;

    fn service() -> PartnerService {
        let db: Database = MemoryDatabase::new().into();
        PartnerService {
            db: db.clone(),
            notifications: NotificationService {
                db,
                push: PushGateway::Disabled,
            },
        }
    }

    async fn apply(service: &PartnerService, user_id: i32) -> DeliveryPartner {
        service
            .process(RegisterPartner {
                actor: Actor::new(user_id, Role::DeliveryPartner),
                vehicle_type: VehicleType::Motorcycle,
                vehicle_number: "KA-01-1234".into(),
            })
            .await
            .unwrap()
    }

    fn review(partner_id: i32, decision: PartnerStatus, reason: Option<&str>) -> ReviewPartner {
        ReviewPartner {
            actor: Actor::new(1, Role::Admin),
            partner_id,
            decision,
            admin_id: Some(1),
            reason: reason.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn approval_makes_partner_available_and_notifies() {
        let service = service();
        let partner = apply(&service, 40).await;
        assert_eq!(partner.status, PartnerStatus::Pending);
        assert!(!partner.is_available);

        let approved = service
            .process(review(partner.id, PartnerStatus::Approved, None))
            .await
            .unwrap();
        assert_eq!(approved.status, PartnerStatus::Approved);
        assert!(approved.is_available);
        assert_eq!(approved.reviewed_by, Some(1));

        let inbox = service
            .db
            .process(ListUserNotifications { user_id: 40 })
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);

        let again = service
            .process(review(partner.id, PartnerStatus::Rejected, Some("late")))
            .await;
        assert!(matches!(again, Err(framework::Error::Conflict(_))));
    }

    #[tokio::test]
    async fn rejection_requires_reason_and_matching_admin() {
        let service = service();
        let partner = apply(&service, 41).await;

        let missing = service
            .process(review(partner.id, PartnerStatus::Rejected, Some("  ")))
            .await;
        assert!(matches!(missing, Err(framework::Error::InvalidInput(_))));

        let mut foreign = review(partner.id, PartnerStatus::Rejected, Some("expired licence"));
        foreign.admin_id = Some(2);
        assert!(matches!(
            service.process(foreign).await,
            Err(framework::Error::PermissionsDenied)
        ));

        let rejected = service
            .process(review(partner.id, PartnerStatus::Rejected, Some("expired licence")))
            .await
            .unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("expired licence"));
        assert!(!rejected.is_available);
    }

    #[tokio::test]
    async fn only_approved_partners_toggle_availability() {
        let service = service();
        let partner = apply(&service, 42).await;
        let actor = Actor::new(42, Role::DeliveryPartner);
        let pending = service
            .process(SetAvailability {
                actor,
                is_available: true,
            })
            .await;
        assert!(matches!(pending, Err(framework::Error::Conflict(_))));

        service
            .process(review(partner.id, PartnerStatus::Approved, None))
            .await
            .unwrap();
        let off = service
            .process(SetAvailability {
                actor,
                is_available: false,
            })
            .await
            .unwrap();
        assert!(!off.is_available);
    }
}
