use super::delivery::DeliveryStatus;
use super::memory::MemoryDatabase;
use kanau::processor::Processor;
use framework::sqlx::DatabaseProcessor;
use time::PrimitiveDateTime;
use tracing::instrument;

/// One row per accepted delivery transition.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatusEntry {
    pub id: i32,
    pub delivery_id: i32,
    pub status: DeliveryStatus,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub updated_by: Option<i32>,
    pub created_at: PrimitiveDateTime,
}

/// A location the partner reported and the server applied.
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub id: i64,
    pub delivery_id: i32,
    pub delivery_partner_id: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub recorded_at: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub struct RecordDeliveryStatus {
    pub delivery_id: i32,
    pub status: DeliveryStatus,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub updated_by: Option<i32>,
    pub now: PrimitiveDateTime,
}

impl Processor<RecordDeliveryStatus> for DatabaseProcessor {
    type Output = DeliveryStatusEntry;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:RecordDeliveryStatus", err)]
    async fn process(&self, input: RecordDeliveryStatus) -> Result<DeliveryStatusEntry, sqlx::Error> {
        sqlx::query_as::<_, DeliveryStatusEntry>(
            r#"
            INSERT INTO marketplace.delivery_status_history
                (delivery_id, status, description, latitude, longitude, updated_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, delivery_id, status, description, latitude, longitude, updated_by, created_at
            "#,
        )
        .bind(input.delivery_id)
        .bind(input.status)
        .bind(&input.description)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.updated_by)
        .bind(input.now)
        .fetch_one(self.db())
        .await
    }
}

impl Processor<RecordDeliveryStatus> for MemoryDatabase {
    type Output = DeliveryStatusEntry;
    type Error = framework::Error;
    async fn process(
        &self,
        input: RecordDeliveryStatus,
    ) -> Result<DeliveryStatusEntry, framework::Error> {
        let mut tables = self.tables();
        let entry = DeliveryStatusEntry {
            id: tables.next_serial("delivery_status_history"),
            delivery_id: input.delivery_id,
            status: input.status,
            description: input.description,
            latitude: input.latitude,
            longitude: input.longitude,
            updated_by: input.updated_by,
            created_at: input.now,
        };
        tables.status_history.insert(entry.id, entry.clone());
        Ok(entry)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListDeliveryStatusHistory {
    pub delivery_id: i32,
}

impl Processor<ListDeliveryStatusHistory> for DatabaseProcessor {
    type Output = Vec<DeliveryStatusEntry>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListDeliveryStatusHistory", err)]
    async fn process(
        &self,
        input: ListDeliveryStatusHistory,
    ) -> Result<Vec<DeliveryStatusEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryStatusEntry>(
            r#"
            SELECT id, delivery_id, status, description, latitude, longitude, updated_by, created_at
            FROM marketplace.delivery_status_history
            WHERE delivery_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(input.delivery_id)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListDeliveryStatusHistory> for MemoryDatabase {
    type Output = Vec<DeliveryStatusEntry>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ListDeliveryStatusHistory,
    ) -> Result<Vec<DeliveryStatusEntry>, framework::Error> {
        Ok(self
            .tables()
            .status_history
            .values()
            .filter(|entry| entry.delivery_id == input.delivery_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordLocationSample {
    pub delivery_id: i32,
    pub delivery_partner_id: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub recorded_at: PrimitiveDateTime,
}

impl Processor<RecordLocationSample> for DatabaseProcessor {
    type Output = LocationSample;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:RecordLocationSample", err)]
    async fn process(&self, input: RecordLocationSample) -> Result<LocationSample, sqlx::Error> {
        sqlx::query_as::<_, LocationSample>(
            r#"
            INSERT INTO marketplace.delivery_location_trail
                (delivery_id, delivery_partner_id, latitude, longitude, heading, speed, accuracy, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, delivery_id, delivery_partner_id, latitude, longitude, heading, speed, accuracy, recorded_at
            "#,
        )
        .bind(input.delivery_id)
        .bind(input.delivery_partner_id)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.heading)
        .bind(input.speed)
        .bind(input.accuracy)
        .bind(input.recorded_at)
        .fetch_one(self.db())
        .await
    }
}

impl Processor<RecordLocationSample> for MemoryDatabase {
    type Output = LocationSample;
    type Error = framework::Error;
    async fn process(&self, input: RecordLocationSample) -> Result<LocationSample, framework::Error> {
        let mut tables = self.tables();
        let sample = LocationSample {
            id: tables.next_id("delivery_location_trail"),
            delivery_id: input.delivery_id,
            delivery_partner_id: input.delivery_partner_id,
            latitude: input.latitude,
            longitude: input.longitude,
            heading: input.heading,
            speed: input.speed,
            accuracy: input.accuracy,
            recorded_at: input.recorded_at,
        };
        tables.location_trail.insert(sample.id, sample);
        Ok(sample)
    }
}

/// The most recent `limit` samples of a delivery, in the order they were taken.
#[derive(Debug, Clone, Copy)]
pub struct ListLocationTrail {
    pub delivery_id: i32,
    pub limit: i64,
}

impl Processor<ListLocationTrail> for DatabaseProcessor {
    type Output = Vec<LocationSample>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListLocationTrail", err)]
    async fn process(&self, input: ListLocationTrail) -> Result<Vec<LocationSample>, sqlx::Error> {
        sqlx::query_as::<_, LocationSample>(
            r#"
            SELECT * FROM (
                SELECT id, delivery_id, delivery_partner_id, latitude, longitude, heading, speed, accuracy, recorded_at
                FROM marketplace.delivery_location_trail
                WHERE delivery_id = $1
                ORDER BY recorded_at DESC, id DESC
                LIMIT $2
            ) AS recent
            ORDER BY recorded_at, id
            "#,
        )
        .bind(input.delivery_id)
        .bind(input.limit)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListLocationTrail> for MemoryDatabase {
    type Output = Vec<LocationSample>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ListLocationTrail,
    ) -> Result<Vec<LocationSample>, framework::Error> {
        let tables = self.tables();
        let mut trail: Vec<LocationSample> = tables
            .location_trail
            .values()
            .filter(|sample| sample.delivery_id == input.delivery_id)
            .copied()
            .collect();
        trail.sort_by_key(|sample| (sample.recorded_at, sample.id));
        let keep = usize::try_from(input.limit).unwrap_or(0);
        let skip = trail.len().saturating_sub(keep);
        Ok(trail.split_off(skip))
    }
}
