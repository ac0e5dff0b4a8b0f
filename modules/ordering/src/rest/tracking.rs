use super::AppState;
use super::extract::{Validate, ValidatedJson, require};
use crate::entities::delivery::{Delivery, DeliveryStatus};
use crate::entities::delivery_tracking::LocationSample;
use crate::services::tracking::{
    GetLocationTrail, GetTrackingSnapshot, LocationReport, ReportLocation, TrackingSnapshot,
    UpdateDeliveryStatus,
};
use crate::utils::actor::Actor;
use crate::utils::geo::GeoPoint;
use axum::Json;
use axum::extract::{Path, State};
use kanau::processor::Processor;
use framework::time_from_unix_millis;

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatusBody {
    status: DeliveryStatus,
    description: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    updated_by: Option<i32>,
}

impl Validate for TrackingStatusBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(
            !matches!(self.status, DeliveryStatus::Pending | DeliveryStatus::Assigned),
            "status must be picked_up, in_transit, delivered or cancelled",
        )?;
        match GeoPoint::from_parts(self.latitude, self.longitude) {
            Some(point) => require(point.is_valid(), "invalid coordinates"),
            None => require(
                self.latitude.is_none() && self.longitude.is_none(),
                "latitude and longitude go together",
            ),
        }
    }
}

pub async fn update_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<TrackingStatusBody>,
) -> Result<Json<Delivery>, framework::Error> {
    let delivery = state
        .tracking
        .process(UpdateDeliveryStatus {
            actor,
            delivery_id,
            status: body.status,
            partner_id: None,
            updated_by: body.updated_by,
            description: body.description,
            latitude: body.latitude,
            longitude: body.longitude,
            proof_of_delivery: None,
        })
        .await?;
    Ok(Json(delivery))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBody {
    delivery_id: i32,
    delivery_partner_id: Option<i32>,
    latitude: f64,
    longitude: f64,
    heading: Option<f64>,
    speed: Option<f64>,
    accuracy: Option<f64>,
    /// Unix milliseconds.
    timestamp: Option<i64>,
}

impl Validate for LocationBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(
            GeoPoint::new(self.latitude, self.longitude).is_valid(),
            "invalid coordinates",
        )?;
        require(
            self.accuracy.is_none_or(|a| a.is_finite() && a >= 0.0),
            "accuracy must not be negative",
        )?;
        require(
            self.timestamp.is_none_or(|ms| time_from_unix_millis(ms).is_some()),
            "timestamp out of range",
        )
    }
}

pub async fn report_location(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(body): ValidatedJson<LocationBody>,
) -> Result<Json<LocationReport>, framework::Error> {
    let report = state
        .tracking
        .process(ReportLocation {
            actor,
            delivery_id: body.delivery_id,
            partner_id: body.delivery_partner_id,
            latitude: body.latitude,
            longitude: body.longitude,
            heading: body.heading,
            speed: body.speed,
            accuracy: body.accuracy,
            recorded_at: body.timestamp.and_then(time_from_unix_millis),
        })
        .await?;
    Ok(Json(report))
}

pub async fn snapshot(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
) -> Result<Json<TrackingSnapshot>, framework::Error> {
    let snapshot = state
        .tracking
        .process(GetTrackingSnapshot { actor, delivery_id })
        .await?;
    Ok(Json(snapshot))
}

pub async fn trail(
    State(state): State<AppState>,
    actor: Actor,
    Path(delivery_id): Path<i32>,
) -> Result<Json<Vec<LocationSample>>, framework::Error> {
    let trail = state
        .tracking
        .process(GetLocationTrail { actor, delivery_id })
        .await?;
    Ok(Json(trail))
}
