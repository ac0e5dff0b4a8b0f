use super::memory::MemoryDatabase;
use compact_str::CompactString;
use kanau::processor::Processor;
use framework::sqlx::DatabaseProcessor;
use time::PrimitiveDateTime;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: i32,
    pub owner_id: i32,
    pub name: CompactString,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateStore {
    pub owner_id: i32,
    pub name: CompactString,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub now: PrimitiveDateTime,
}

impl Processor<CreateStore> for DatabaseProcessor {
    type Output = Store;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:CreateStore", err)]
    async fn process(&self, input: CreateStore) -> Result<Store, sqlx::Error> {
        sqlx::query_as::<_, Store>(
            r#"
            INSERT INTO marketplace.stores (owner_id, name, address, latitude, longitude, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, owner_id, name, address, latitude, longitude, created_at
            "#,
        )
        .bind(input.owner_id)
        .bind(input.name.as_str())
        .bind(&input.address)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.now)
        .fetch_one(self.db())
        .await
    }
}

impl Processor<CreateStore> for MemoryDatabase {
    type Output = Store;
    type Error = framework::Error;
    async fn process(&self, input: CreateStore) -> Result<Store, framework::Error> {
        let mut tables = self.tables();
        let store = Store {
            id: tables.next_serial("stores"),
            owner_id: input.owner_id,
            name: input.name,
            address: input.address,
            latitude: input.latitude,
            longitude: input.longitude,
            created_at: input.now,
        };
        tables.stores.insert(store.id, store.clone());
        Ok(store)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindStoreById {
    pub id: i32,
}

impl Processor<FindStoreById> for DatabaseProcessor {
    type Output = Option<Store>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindStoreById", err)]
    async fn process(&self, input: FindStoreById) -> Result<Option<Store>, sqlx::Error> {
        sqlx::query_as::<_, Store>(
            r#"
            SELECT id, owner_id, name, address, latitude, longitude, created_at
            FROM marketplace.stores
            WHERE id = $1
            "#,
        )
        .bind(input.id)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<FindStoreById> for MemoryDatabase {
    type Output = Option<Store>;
    type Error = framework::Error;
    async fn process(&self, input: FindStoreById) -> Result<Option<Store>, framework::Error> {
        Ok(self.tables().stores.get(&input.id).cloned())
    }
}
