//! REST surface of the dispatch backend.

mod deliveries;
pub mod extract;
mod notifications;
mod orders;
mod partners;
mod stores;
mod tracking;

use crate::services::DispatchServices;
use crate::utils::actor::ActorLayer;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

pub type AppState = DispatchServices;

pub fn router(services: DispatchServices) -> Router {
    Router::new()
        .route("/api/stores", post(stores::register_store))
        .route("/api/orders", post(orders::place_order))
        .route("/api/orders/{id}", get(orders::get_order))
        .route("/api/orders/{id}/status", put(orders::update_order_status))
        .route("/api/orders/user/{id}", get(orders::list_customer_orders))
        .route("/api/orders/store/{id}", get(orders::list_store_orders))
        .route(
            "/api/delivery-partners",
            get(partners::list_partners).post(partners::register_partner),
        )
        .route("/api/delivery-partners/{id}/approve", post(partners::approve_partner))
        .route("/api/delivery-partners/{id}/reject", post(partners::reject_partner))
        .route(
            "/api/delivery-partners/me/availability",
            put(partners::set_availability),
        )
        .route("/api/delivery-partners/assignments", get(partners::list_assignments))
        .route(
            "/api/delivery-partners/assignments/{id}/accept",
            post(partners::accept_assignment),
        )
        .route(
            "/api/delivery-partners/assignments/{id}/decline",
            post(partners::decline_assignment),
        )
        .route("/api/deliveries/assign", post(deliveries::assign_delivery))
        .route("/api/deliveries/{id}", get(deliveries::get_delivery))
        .route("/api/deliveries/{id}/reassign", post(deliveries::reassign_delivery))
        .route("/api/deliveries/{id}/status", put(deliveries::update_status))
        .route("/api/deliveries/{id}/location", put(deliveries::update_location))
        .route("/api/deliveries/{id}/rating", post(deliveries::rate_delivery))
        .route("/api/tracking/status/{id}", patch(tracking::update_status))
        .route("/api/tracking/location", post(tracking::report_location))
        .route("/api/tracking/{id}", get(tracking::snapshot))
        .route("/api/tracking/{id}/trail", get(tracking::trail))
        .route(
            "/api/notifications/user/{id}",
            get(notifications::list_notifications),
        )
        .route(
            "/api/notifications/user/{id}/unread-count",
            get(notifications::unread_count),
        )
        .route(
            "/api/notifications/user/{id}/read-all",
            put(notifications::mark_all_read),
        )
        .route("/api/notifications/{id}/read", put(notifications::mark_read))
        .route("/api/push-tokens", post(notifications::register_push_token))
        .route("/health", get(health))
        .layer(ActorLayer)
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
