use super::AppState;
use super::extract::{Validate, ValidatedJson, require};
use crate::entities::store::Store;
use crate::services::store::RegisterStore;
use crate::utils::actor::Actor;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use compact_str::CompactString;
use kanau::processor::Processor;

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStoreBody {
    name: CompactString,
    address: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl Validate for RegisterStoreBody {
    fn validate(&self) -> Result<(), framework::Error> {
        require(!self.name.trim().is_empty(), "name is required")?;
        require(!self.address.trim().is_empty(), "address is required")
    }
}

pub async fn register_store(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(body): ValidatedJson<RegisterStoreBody>,
) -> Result<(StatusCode, Json<Store>), framework::Error> {
    let store = state
        .stores
        .process(RegisterStore {
            actor,
            name: body.name,
            address: body.address,
            latitude: body.latitude,
            longitude: body.longitude,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(store)))
}
