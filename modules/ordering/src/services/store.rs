use crate::entities::Database;
use crate::entities::store::{CreateStore, Store};
use crate::role_gate;
use crate::utils::actor::{Actor, Role, RoleGated};
use crate::utils::geo::GeoPoint;
use compact_str::CompactString;
use framework::now_time;
use kanau::processor::Processor;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct StoreService {
    pub db: Database,
}

/// Open a store owned by the acting shopkeeper. Its coordinates become the pickup
/// point of every delivery.
#[derive(Debug, Clone)]
pub struct RegisterStore {
    pub actor: Actor,
    pub name: CompactString,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

role_gate! {RegisterStore | [Role::Shopkeeper, Role::Admin]}

impl Processor<RegisterStore> for StoreService {
    type Output = Store;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: RegisterStore) -> Result<Store, framework::Error> {
        let actor = input.authorize()?;
        if input.name.trim().is_empty() || input.address.trim().is_empty() {
            return Err(framework::Error::invalid_input(
                "store name and address are required",
            ));
        }
        match (input.latitude, input.longitude) {
            (None, None) => {}
            (Some(lat), Some(lng)) if GeoPoint::new(lat, lng).is_valid() => {}
            _ => return Err(framework::Error::invalid_input("invalid store coordinates")),
        }
        let store = self
            .db
            .process(CreateStore {
                owner_id: actor.user_id,
                name: input.name,
                address: input.address,
                latitude: input.latitude,
                longitude: input.longitude,
                now: now_time(),
            })
            .await?;
        info!(store_id = store.id, owner_id = store.owner_id, "Store registered");
        Ok(store)
    }
}
