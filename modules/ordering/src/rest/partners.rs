use super::AppState;
use super::extract::{Validate, ValidatedJson, require};
use crate::entities::delivery::Delivery;
use crate::entities::delivery_partner::{DeliveryPartner, PartnerStatus, VehicleType};
use crate::services::assignment::{AcceptAssignment, DeclineAssignment, ListMyAssignments};
use crate::services::partner::{
    ListPartners, RegisterPartner, ReviewPartner, SetAvailability,
};
use crate::utils::actor::Actor;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use compact_str::CompactString;
use kanau::processor::Processor;

#[derive(Debug, Default, serde::Deserialize)]
pub struct PartnerFilter {
    status: Option<PartnerStatus>,
}

pub async fn list_partners(
    State(state): State<AppState>,
    actor: Actor,
    Query(filter): Query<PartnerFilter>,
) -> Result<Json<Vec<DeliveryPartner>>, framework::Error> {
    let partners = state
        .partners
        .process(ListPartners {
            actor,
            status: filter.status,
        })
        .await?;
    Ok(Json(partners))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupBody {
    vehicle_type: VehicleType,
    vehicle_number: CompactString,
}

impl Validate for SignupBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(
            !self.vehicle_number.trim().is_empty(),
            "vehicleNumber is required",
        )
    }
}

pub async fn register_partner(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(body): ValidatedJson<SignupBody>,
) -> Result<(StatusCode, Json<DeliveryPartner>), framework::Error> {
    let partner = state
        .partners
        .process(RegisterPartner {
            actor,
            vehicle_type: body.vehicle_type,
            vehicle_number: body.vehicle_number,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(partner)))
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewBody {
    admin_id: Option<i32>,
    reason: Option<String>,
}

/// Approval may come without a body at all.
fn review_body(raw: &Bytes) -> Result<ReviewBody, framework::Error> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(ReviewBody::default());
    }
    serde_json::from_slice(raw).map_err(|e| framework::Error::invalid_input(e.to_string()))
}

async fn review(
    state: AppState,
    actor: Actor,
    partner_id: i32,
    decision: PartnerStatus,
    raw: Bytes,
) -> Result<Json<DeliveryPartner>, framework::Error> {
    let body = review_body(&raw)?;
    let partner = state
        .partners
        .process(ReviewPartner {
            actor,
            partner_id,
            decision,
            admin_id: body.admin_id,
            reason: body.reason,
        })
        .await?;
    Ok(Json(partner))
}

pub async fn approve_partner(
    State(state): State<AppState>,
    actor: Actor,
    Path(partner_id): Path<i32>,
    raw: Bytes,
) -> Result<Json<DeliveryPartner>, framework::Error> {
    review(state, actor, partner_id, PartnerStatus::Approved, raw).await
}

pub async fn reject_partner(
    State(state): State<AppState>,
    actor: Actor,
    Path(partner_id): Path<i32>,
    raw: Bytes,
) -> Result<Json<DeliveryPartner>, framework::Error> {
    review(state, actor, partner_id, PartnerStatus::Rejected, raw).await
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityBody {
    is_available: bool,
}

impl Validate for AvailabilityBody {
    fn validate(&self) -> Result<(), framework::Error> {
        Ok(())
    }
}

pub async fn set_availability(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(body): ValidatedJson<AvailabilityBody>,
) -> Result<Json<DeliveryPartner>, framework::Error> {
    let partner = state
        .partners
        .process(SetAvailability {
            actor,
            is_available: body.is_available,
        })
        .await?;
    Ok(Json(partner))
}

pub async fn list_assignments(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<Delivery>>, framework::Error> {
    let deliveries = state.assignment.process(ListMyAssignments { actor }).await?;
    Ok(Json(deliveries))
}

pub async fn accept_assignment(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
) -> Result<Json<Delivery>, framework::Error> {
    let delivery = state
        .assignment
        .process(AcceptAssignment { actor, delivery_id })
        .await?;
    Ok(Json(delivery))
}

pub async fn decline_assignment(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
) -> Result<Json<Delivery>, framework::Error> {
    let delivery = state
        .assignment
        .process(DeclineAssignment { actor, delivery_id })
        .await?;
    Ok(Json(delivery))
}
