use super::AppState;
use super::extract::{Validate, ValidatedJson, require};
use crate::entities::notification::{Notification, PushPlatform, PushToken};
use crate::services::notification::{
    ListNotifications, MarkAllRead, MarkRead, RegisterDevice, UnreadCount,
};
use crate::utils::actor::Actor;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use kanau::processor::Processor;

pub async fn list_notifications(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<i32>,
) -> Result<Json<Vec<Notification>>, framework::Error> {
    let notifications = state
        .notifications
        .process(ListNotifications { actor, user_id })
        .await?;
    Ok(Json(notifications))
}

#[derive(Debug, serde::Serialize)]
pub struct UnreadCountBody {
    count: i64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<i32>,
) -> Result<Json<UnreadCountBody>, framework::Error> {
    let count = state
        .notifications
        .process(UnreadCount { actor, user_id })
        .await?;
    Ok(Json(UnreadCountBody { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    actor: Actor,
    Path(notification_id): Path<i32>,
) -> Result<Json<Notification>, framework::Error> {
    let notification = state
        .notifications
        .process(MarkRead {
            actor,
            notification_id,
        })
        .await?;
    Ok(Json(notification))
}

#[derive(Debug, serde::Serialize)]
pub struct MarkedBody {
    updated: u64,
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<i32>,
) -> Result<Json<MarkedBody>, framework::Error> {
    let updated = state
        .notifications
        .process(MarkAllRead { actor, user_id })
        .await?;
    Ok(Json(MarkedBody { updated }))
}

#[derive(Debug, serde::Deserialize)]
pub struct PushTokenBody {
    token: String,
    platform: PushPlatform,
}

impl Validate for PushTokenBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(!self.token.trim().is_empty(), "token is required")?;
        require(self.token.len() <= 4096, "token is too long")
    }
}

pub async fn register_push_token(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(body): ValidatedJson<PushTokenBody>,
) -> Result<(StatusCode, Json<PushToken>), framework::Error> {
    let token = state
        .notifications
        .process(RegisterDevice {
            actor,
            token: body.token,
            platform: body.platform,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(token)))
}
