use super::AppState;
use super::extract::{Validate, ValidatedJson, require};
use crate::entities::delivery::{Delivery, DeliveryStatus};
use crate::services::assignment::{AssignDelivery, AssignmentOutcome, ReassignDelivery};
use crate::services::tracking::{
    GetDelivery, LocationReport, RateDeliveredOrder, ReportLocation, UpdateDeliveryStatus,
};
use crate::utils::actor::Actor;
use crate::utils::geo::GeoPoint;
use axum::Json;
use axum::extract::{Path, State};
use kanau::processor::Processor;

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    order_id: i32,
    delivery_partner_id: Option<i32>,
}

impl Validate for AssignBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(self.order_id > 0, "orderId must be positive")?;
        require(
            self.delivery_partner_id.is_none_or(|id| id > 0),
            "deliveryPartnerId must be positive",
        )
    }
}

pub async fn assign_delivery(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(body): ValidatedJson<AssignBody>,
) -> Result<Json<AssignmentOutcome>, framework::Error> {
    let outcome = state
        .assignment
        .process(AssignDelivery {
            actor,
            order_id: body.order_id,
            delivery_partner_id: body.delivery_partner_id,
        })
        .await?;
    Ok(Json(outcome))
}

pub async fn get_delivery(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
) -> Result<Json<Delivery>, framework::Error> {
    let delivery = state
        .tracking
        .process(GetDelivery { actor, delivery_id })
        .await?;
    Ok(Json(delivery))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignBody {
    delivery_partner_id: i32,
}

impl Validate for ReassignBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(
            self.delivery_partner_id > 0,
            "deliveryPartnerId must be positive",
        )
    }
}

pub async fn reassign_delivery(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<ReassignBody>,
) -> Result<Json<Delivery>, framework::Error> {
    let delivery = state
        .assignment
        .process(ReassignDelivery {
            actor,
            delivery_id,
            delivery_partner_id: body.delivery_partner_id,
        })
        .await?;
    Ok(Json(delivery))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatusBody {
    status: DeliveryStatus,
    partner_id: Option<i32>,
    proof_of_delivery: Option<String>,
}

impl Validate for DeliveryStatusBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(
            !matches!(self.status, DeliveryStatus::Pending | DeliveryStatus::Assigned),
            "status must be picked_up, in_transit, delivered or cancelled",
        )
    }
}

pub async fn update_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<DeliveryStatusBody>,
) -> Result<Json<Delivery>, framework::Error> {
    let delivery = state
        .tracking
        .process(UpdateDeliveryStatus {
            actor,
            delivery_id,
            status: body.status,
            partner_id: body.partner_id,
            updated_by: None,
            description: None,
            latitude: None,
            longitude: None,
            proof_of_delivery: body.proof_of_delivery,
        })
        .await?;
    Ok(Json(delivery))
}

/// `{ "location": "lat,lng" }`, the compact form older partner apps send.
#[derive(Debug, serde::Deserialize)]
pub struct LocationPairBody {
    location: String,
}

impl Validate for LocationPairBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(
            GeoPoint::parse_pair(&self.location).is_some(),
            "location must be \"lat,lng\" with valid coordinates",
        )
    }
}

pub async fn update_location(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<LocationPairBody>,
) -> Result<Json<LocationReport>, framework::Error> {
    let point = GeoPoint::parse_pair(&body.location)
        .ok_or_else(|| framework::Error::invalid_input("invalid location"))?;
    let report = state
        .tracking
        .process(ReportLocation {
            actor,
            delivery_id,
            partner_id: None,
            latitude: point.latitude,
            longitude: point.longitude,
            heading: None,
            speed: None,
            accuracy: None,
            recorded_at: None,
        })
        .await?;
    Ok(Json(report))
}

#[derive(Debug, serde::Deserialize)]
pub struct RatingBody {
    rating: i16,
    feedback: Option<String>,
}

impl Validate for RatingBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require((1..=5).contains(&self.rating), "rating must be between 1 and 5")
    }
}

pub async fn rate_delivery(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<RatingBody>,
) -> Result<Json<Delivery>, framework::Error> {
    let delivery = state
        .tracking
        .process(RateDeliveredOrder {
            actor,
            delivery_id,
            rating: body.rating,
            feedback: body.feedback,
        })
        .await?;
    Ok(Json(delivery))
}
