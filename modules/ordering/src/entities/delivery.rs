use super::delivery_partner::PartnerStatus;
use super::memory::{MemoryDatabase, Tables};
use kanau::processor::Processor;
use framework::sqlx::DatabaseProcessor;
use rust_decimal::Decimal;
use time::PrimitiveDateTime;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: i32,
    pub order_id: i32,
    pub delivery_partner_id: Option<i32>,
    pub status: DeliveryStatus,

    pub pickup_address: String,
    pub delivery_address: String,
    pub pickup_latitude: Option<f64>,
    pub pickup_longitude: Option<f64>,
    pub dropoff_latitude: Option<f64>,
    pub dropoff_longitude: Option<f64>,
    pub estimated_distance: Option<f64>,
    pub estimated_time: Option<i32>,
    pub delivery_fee: Decimal,

    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub current_accuracy: Option<f64>,
    pub location_recorded_at: Option<PrimitiveDateTime>,

    pub assigned_at: Option<PrimitiveDateTime>,
    pub accepted_at: Option<PrimitiveDateTime>,
    pub picked_up_at: Option<PrimitiveDateTime>,
    pub in_transit_at: Option<PrimitiveDateTime>,
    pub delivered_at: Option<PrimitiveDateTime>,
    pub cancelled_at: Option<PrimitiveDateTime>,

    pub proof_of_delivery: Option<String>,
    pub customer_rating: Option<i16>,
    pub customer_feedback: Option<String>,

    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    sqlx::Type,
    serde::Serialize,
    serde::Deserialize,
)]
#[sqlx(type_name = "marketplace.delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    PickedUp,
    #[serde(alias = "en_route_delivery")]
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    pub const ACTIVE: [DeliveryStatus; 3] = [
        DeliveryStatus::Assigned,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }
}

macro_rules! delivery_columns {
    () => {
        "id, order_id, delivery_partner_id, status, pickup_address, delivery_address, \
         pickup_latitude, pickup_longitude, dropoff_latitude, dropoff_longitude, \
         estimated_distance, estimated_time, delivery_fee, current_latitude, current_longitude, \
         current_accuracy, location_recorded_at, assigned_at, accepted_at, picked_up_at, \
         in_transit_at, delivered_at, cancelled_at, proof_of_delivery, customer_rating, \
         customer_feedback, created_at, updated_at"
    };
}
pub(crate) use delivery_columns;

impl Tables {
    fn active_deliveries_of(&self, partner_id: i32) -> usize {
        self.deliveries
            .values()
            .filter(|d| d.delivery_partner_id == Some(partner_id) && d.status.is_active())
            .count()
    }

    fn partner_can_take(&self, partner_id: i32, max_active: i64) -> bool {
        let eligible = self
            .partners
            .get(&partner_id)
            .is_some_and(|p| p.status == PartnerStatus::Approved && p.is_available);
        eligible && (self.active_deliveries_of(partner_id) as i64) < max_active
    }
}

/// Create the delivery row of an order, or return the one that already exists.
#[derive(Debug, Clone)]
pub struct CreatePendingDelivery {
    pub order_id: i32,
    pub pickup_address: String,
    pub delivery_address: String,
    pub pickup_latitude: Option<f64>,
    pub pickup_longitude: Option<f64>,
    pub dropoff_latitude: Option<f64>,
    pub dropoff_longitude: Option<f64>,
    pub estimated_distance: Option<f64>,
    pub estimated_time: Option<i32>,
    pub delivery_fee: Decimal,
    pub now: PrimitiveDateTime,
}

impl Processor<CreatePendingDelivery> for DatabaseProcessor {
    type Output = Delivery;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:CreatePendingDelivery", err)]
    async fn process(&self, input: CreatePendingDelivery) -> Result<Delivery, sqlx::Error> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        sqlx::query_as::<_, Delivery>(concat!(
            r#"
            INSERT INTO marketplace.deliveries (
                order_id, status, pickup_address, delivery_address,
                pickup_latitude, pickup_longitude, dropoff_latitude, dropoff_longitude,
                estimated_distance, estimated_time, delivery_fee, created_at, updated_at
            )
            VALUES ($1, 'pending', $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            ON CONFLICT (order_id) DO UPDATE SET order_id = EXCLUDED.order_id
            RETURNING "#,
            delivery_columns!()
        ))
        .bind(input.order_id)
        .bind(&input.pickup_address)
        .bind(&input.delivery_address)
        .bind(input.pickup_latitude)
        .bind(input.pickup_longitude)
        .bind(input.dropoff_latitude)
        .bind(input.dropoff_longitude)
        .bind(input.estimated_distance)
        .bind(input.estimated_time)
        .bind(input.delivery_fee)
        .bind(input.now)
        .fetch_one(self.db())
        .await
    }
}

impl Processor<CreatePendingDelivery> for MemoryDatabase {
    type Output = Delivery;
    type Error = framework::Error;
    async fn process(&self, input: CreatePendingDelivery) -> Result<Delivery, framework::Error> {
        let mut tables = self.tables();
        if let Some(existing) = tables
            .deliveries
            .values()
            .find(|d| d.order_id == input.order_id)
        {
            return Ok(existing.clone());
        }
        let delivery = Delivery {
            id: tables.next_serial("deliveries"),
            order_id: input.order_id,
            delivery_partner_id: None,
            status: DeliveryStatus::Pending,
            pickup_address: input.pickup_address,
            delivery_address: input.delivery_address,
            pickup_latitude: input.pickup_latitude,
            pickup_longitude: input.pickup_longitude,
            dropoff_latitude: input.dropoff_latitude,
            dropoff_longitude: input.dropoff_longitude,
            estimated_distance: input.estimated_distance,
            estimated_time: input.estimated_time,
            delivery_fee: input.delivery_fee,
            current_latitude: None,
            current_longitude: None,
            current_accuracy: None,
            location_recorded_at: None,
            assigned_at: None,
            accepted_at: None,
            picked_up_at: None,
            in_transit_at: None,
            delivered_at: None,
            cancelled_at: None,
            proof_of_delivery: None,
            customer_rating: None,
            customer_feedback: None,
            created_at: input.now,
            updated_at: input.now,
        };
        tables.deliveries.insert(delivery.id, delivery.clone());
        Ok(delivery)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindDeliveryById {
    pub id: i32,
}

impl Processor<FindDeliveryById> for DatabaseProcessor {
    type Output = Option<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindDeliveryById", err)]
    async fn process(&self, input: FindDeliveryById) -> Result<Option<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            "SELECT ",
            delivery_columns!(),
            " FROM marketplace.deliveries WHERE id = $1"
        ))
        .bind(input.id)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<FindDeliveryById> for MemoryDatabase {
    type Output = Option<Delivery>;
    type Error = framework::Error;
    async fn process(&self, input: FindDeliveryById) -> Result<Option<Delivery>, framework::Error> {
        Ok(self.tables().deliveries.get(&input.id).cloned())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindDeliveryByOrderId {
    pub order_id: i32,
}

impl Processor<FindDeliveryByOrderId> for DatabaseProcessor {
    type Output = Option<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindDeliveryByOrderId", err)]
    async fn process(
        &self,
        input: FindDeliveryByOrderId,
    ) -> Result<Option<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            "SELECT ",
            delivery_columns!(),
            " FROM marketplace.deliveries WHERE order_id = $1"
        ))
        .bind(input.order_id)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<FindDeliveryByOrderId> for MemoryDatabase {
    type Output = Option<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: FindDeliveryByOrderId,
    ) -> Result<Option<Delivery>, framework::Error> {
        Ok(self
            .tables()
            .deliveries
            .values()
            .find(|d| d.order_id == input.order_id)
            .cloned())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListPartnerDeliveries {
    pub partner_id: i32,
    pub active_only: bool,
}

impl Processor<ListPartnerDeliveries> for DatabaseProcessor {
    type Output = Vec<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListPartnerDeliveries", err)]
    async fn process(&self, input: ListPartnerDeliveries) -> Result<Vec<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            "SELECT ",
            delivery_columns!(),
            r#"
            FROM marketplace.deliveries
            WHERE delivery_partner_id = $1
              AND (NOT $2 OR status IN ('assigned', 'picked_up', 'in_transit'))
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(input.partner_id)
        .bind(input.active_only)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListPartnerDeliveries> for MemoryDatabase {
    type Output = Vec<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ListPartnerDeliveries,
    ) -> Result<Vec<Delivery>, framework::Error> {
        let tables = self.tables();
        let mut deliveries: Vec<Delivery> = tables
            .deliveries
            .values()
            .filter(|d| d.delivery_partner_id == Some(input.partner_id))
            .filter(|d| !input.active_only || d.status.is_active())
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(deliveries)
    }
}

/// Deliveries waiting for a partner, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct ListUnassignedDeliveries {
    pub limit: i64,
}

impl Processor<ListUnassignedDeliveries> for DatabaseProcessor {
    type Output = Vec<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListUnassignedDeliveries", err)]
    async fn process(
        &self,
        input: ListUnassignedDeliveries,
    ) -> Result<Vec<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            "SELECT ",
            delivery_columns!(),
            r#"
            FROM marketplace.deliveries
            WHERE status = 'pending' AND delivery_partner_id IS NULL
            ORDER BY created_at, id
            LIMIT $1
            "#
        ))
        .bind(input.limit)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListUnassignedDeliveries> for MemoryDatabase {
    type Output = Vec<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ListUnassignedDeliveries,
    ) -> Result<Vec<Delivery>, framework::Error> {
        let tables = self.tables();
        let mut deliveries: Vec<Delivery> = tables
            .deliveries
            .values()
            .filter(|d| d.status == DeliveryStatus::Pending && d.delivery_partner_id.is_none())
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        deliveries.truncate(usize::try_from(input.limit).unwrap_or(0));
        Ok(deliveries)
    }
}

/// Assignments nobody accepted before `assigned_before`.
#[derive(Debug, Clone, Copy)]
pub struct ListExpiredAssignments {
    pub assigned_before: PrimitiveDateTime,
}

impl Processor<ListExpiredAssignments> for DatabaseProcessor {
    type Output = Vec<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListExpiredAssignments", err)]
    async fn process(&self, input: ListExpiredAssignments) -> Result<Vec<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            "SELECT ",
            delivery_columns!(),
            r#"
            FROM marketplace.deliveries
            WHERE status = 'assigned' AND accepted_at IS NULL AND assigned_at < $1
            ORDER BY assigned_at, id
            "#
        ))
        .bind(input.assigned_before)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListExpiredAssignments> for MemoryDatabase {
    type Output = Vec<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ListExpiredAssignments,
    ) -> Result<Vec<Delivery>, framework::Error> {
        let tables = self.tables();
        let mut deliveries: Vec<Delivery> = tables
            .deliveries
            .values()
            .filter(|d| d.status == DeliveryStatus::Assigned && d.accepted_at.is_none())
            .filter(|d| d.assigned_at.is_some_and(|at| at < input.assigned_before))
            .cloned()
            .collect();
        deliveries.sort_by_key(|d| (d.assigned_at, d.id));
        Ok(deliveries)
    }
}

/// Bind a partner to a pending delivery.
///
/// Applies only while the delivery is `pending` without a partner and the partner is
/// approved, available and below `max_active` active deliveries.
#[derive(Debug, Clone, Copy)]
pub struct BindDeliveryPartner {
    pub delivery_id: i32,
    pub partner_id: i32,
    pub max_active: i64,
    pub now: PrimitiveDateTime,
}

impl Processor<BindDeliveryPartner> for DatabaseProcessor {
    type Output = Option<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:BindDeliveryPartner", err)]
    async fn process(&self, input: BindDeliveryPartner) -> Result<Option<Delivery>, sqlx::Error> {
        let mut tx = self.db().begin().await?;
        if !lock_partner_capacity(&mut tx, input.partner_id, input.max_active).await? {
            return Ok(None);
        }
        let delivery = sqlx::query_as::<_, Delivery>(concat!(
            r#"
            UPDATE marketplace.deliveries SET
                delivery_partner_id = $2,
                status = 'assigned',
                assigned_at = $3,
                accepted_at = NULL,
                updated_at = $3
            WHERE id = $1 AND status = 'pending' AND delivery_partner_id IS NULL
            RETURNING "#,
            delivery_columns!()
        ))
        .bind(input.delivery_id)
        .bind(input.partner_id)
        .bind(input.now)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(delivery)
    }
}

/// Lock the partner row so capacity checks of concurrent binds run one after another.
async fn lock_partner_capacity(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    partner_id: i32,
    max_active: i64,
) -> Result<bool, sqlx::Error> {
    let eligible: Option<bool> = sqlx::query_scalar(
        r#"
        SELECT status = 'approved' AND is_available
        FROM marketplace.delivery_partners
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(partner_id)
    .fetch_optional(&mut **tx)
    .await?;
    if eligible != Some(true) {
        return Ok(false);
    }
    let active: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM marketplace.deliveries
        WHERE delivery_partner_id = $1 AND status IN ('assigned', 'picked_up', 'in_transit')
        "#,
    )
    .bind(partner_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(active < max_active)
}

impl Processor<BindDeliveryPartner> for MemoryDatabase {
    type Output = Option<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: BindDeliveryPartner,
    ) -> Result<Option<Delivery>, framework::Error> {
        let mut tables = self.tables();
        if !tables.partner_can_take(input.partner_id, input.max_active) {
            return Ok(None);
        }
        let Some(delivery) = tables.deliveries.get_mut(&input.delivery_id) else {
            return Ok(None);
        };
        if delivery.status != DeliveryStatus::Pending || delivery.delivery_partner_id.is_some() {
            return Ok(None);
        }
        delivery.delivery_partner_id = Some(input.partner_id);
        delivery.status = DeliveryStatus::Assigned;
        delivery.assigned_at = Some(input.now);
        delivery.accepted_at = None;
        delivery.updated_at = input.now;
        Ok(Some(delivery.clone()))
    }
}

/// Hand an `assigned` delivery from one partner to another in one step.
#[derive(Debug, Clone, Copy)]
pub struct ReassignDeliveryPartner {
    pub delivery_id: i32,
    pub from_partner_id: i32,
    pub to_partner_id: i32,
    pub max_active: i64,
    pub now: PrimitiveDateTime,
}

impl Processor<ReassignDeliveryPartner> for DatabaseProcessor {
    type Output = Option<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ReassignDeliveryPartner", err)]
    async fn process(
        &self,
        input: ReassignDeliveryPartner,
    ) -> Result<Option<Delivery>, sqlx::Error> {
        let mut tx = self.db().begin().await?;
        if !lock_partner_capacity(&mut tx, input.to_partner_id, input.max_active).await? {
            return Ok(None);
        }
        let delivery = sqlx::query_as::<_, Delivery>(concat!(
            r#"
            UPDATE marketplace.deliveries SET
                delivery_partner_id = $3,
                assigned_at = $4,
                accepted_at = NULL,
                updated_at = $4
            WHERE id = $1 AND status = 'assigned' AND delivery_partner_id = $2
            RETURNING "#,
            delivery_columns!()
        ))
        .bind(input.delivery_id)
        .bind(input.from_partner_id)
        .bind(input.to_partner_id)
        .bind(input.now)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(delivery)
    }
}

impl Processor<ReassignDeliveryPartner> for MemoryDatabase {
    type Output = Option<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ReassignDeliveryPartner,
    ) -> Result<Option<Delivery>, framework::Error> {
        let mut tables = self.tables();
        if !tables.partner_can_take(input.to_partner_id, input.max_active) {
            return Ok(None);
        }
        let Some(delivery) = tables.deliveries.get_mut(&input.delivery_id) else {
            return Ok(None);
        };
        if delivery.status != DeliveryStatus::Assigned
            || delivery.delivery_partner_id != Some(input.from_partner_id)
        {
            return Ok(None);
        }
        delivery.delivery_partner_id = Some(input.to_partner_id);
        delivery.assigned_at = Some(input.now);
        delivery.accepted_at = None;
        delivery.updated_at = input.now;
        Ok(Some(delivery.clone()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AcceptDeliveryAssignment {
    pub delivery_id: i32,
    pub partner_id: i32,
    pub now: PrimitiveDateTime,
}

impl Processor<AcceptDeliveryAssignment> for DatabaseProcessor {
    type Output = Option<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:AcceptDeliveryAssignment", err)]
    async fn process(
        &self,
        input: AcceptDeliveryAssignment,
    ) -> Result<Option<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            r#"
            UPDATE marketplace.deliveries SET accepted_at = $3, updated_at = $3
            WHERE id = $1 AND delivery_partner_id = $2
              AND status = 'assigned' AND accepted_at IS NULL
            RETURNING "#,
            delivery_columns!()
        ))
        .bind(input.delivery_id)
        .bind(input.partner_id)
        .bind(input.now)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<AcceptDeliveryAssignment> for MemoryDatabase {
    type Output = Option<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: AcceptDeliveryAssignment,
    ) -> Result<Option<Delivery>, framework::Error> {
        let mut tables = self.tables();
        let Some(delivery) = tables.deliveries.get_mut(&input.delivery_id) else {
            return Ok(None);
        };
        if delivery.delivery_partner_id != Some(input.partner_id)
            || delivery.status != DeliveryStatus::Assigned
            || delivery.accepted_at.is_some()
        {
            return Ok(None);
        }
        delivery.accepted_at = Some(input.now);
        delivery.updated_at = input.now;
        Ok(Some(delivery.clone()))
    }
}

/// Put an `assigned` delivery back to `pending` without a partner.
///
/// With `require_unaccepted` the release only applies to assignments the partner has not
/// accepted; with `assigned_before` only to assignments made before that instant.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseDeliveryAssignment {
    pub delivery_id: i32,
    pub partner_id: i32,
    pub require_unaccepted: bool,
    pub assigned_before: Option<PrimitiveDateTime>,
    pub now: PrimitiveDateTime,
}

impl Processor<ReleaseDeliveryAssignment> for DatabaseProcessor {
    type Output = Option<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ReleaseDeliveryAssignment", err)]
    async fn process(
        &self,
        input: ReleaseDeliveryAssignment,
    ) -> Result<Option<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            r#"
            UPDATE marketplace.deliveries SET
                delivery_partner_id = NULL,
                status = 'pending',
                assigned_at = NULL,
                accepted_at = NULL,
                updated_at = $5
            WHERE id = $1 AND delivery_partner_id = $2 AND status = 'assigned'
              AND (NOT $3 OR accepted_at IS NULL)
              AND ($4::timestamp IS NULL OR assigned_at < $4)
            RETURNING "#,
            delivery_columns!()
        ))
        .bind(input.delivery_id)
        .bind(input.partner_id)
        .bind(input.require_unaccepted)
        .bind(input.assigned_before)
        .bind(input.now)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<ReleaseDeliveryAssignment> for MemoryDatabase {
    type Output = Option<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ReleaseDeliveryAssignment,
    ) -> Result<Option<Delivery>, framework::Error> {
        let mut tables = self.tables();
        let Some(delivery) = tables.deliveries.get_mut(&input.delivery_id) else {
            return Ok(None);
        };
        let releasable = delivery.delivery_partner_id == Some(input.partner_id)
            && delivery.status == DeliveryStatus::Assigned
            && (!input.require_unaccepted || delivery.accepted_at.is_none())
            && input
                .assigned_before
                .is_none_or(|before| delivery.assigned_at.is_some_and(|at| at < before));
        if !releasable {
            return Ok(None);
        }
        delivery.delivery_partner_id = None;
        delivery.status = DeliveryStatus::Pending;
        delivery.assigned_at = None;
        delivery.accepted_at = None;
        delivery.updated_at = input.now;
        Ok(Some(delivery.clone()))
    }
}

/// Move a delivery forward, or cancel it.
///
/// Forward moves need a bound partner (`status <> 'pending'`) and a higher rank;
/// cancelling is possible from `pending`, `assigned` and `picked_up`. When
/// `partner_id` is given the delivery must belong to that partner. Moving forward
/// implies acceptance, so `accepted_at` is filled if still empty.
#[derive(Debug, Clone)]
pub struct TransitionDeliveryStatus {
    pub id: i32,
    pub partner_id: Option<i32>,
    pub to: DeliveryStatus,
    pub proof_of_delivery: Option<String>,
    pub now: PrimitiveDateTime,
}

impl Processor<TransitionDeliveryStatus> for DatabaseProcessor {
    type Output = Option<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:TransitionDeliveryStatus", err)]
    async fn process(
        &self,
        input: TransitionDeliveryStatus,
    ) -> Result<Option<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            r#"
            UPDATE marketplace.deliveries SET
                status = $3,
                updated_at = $5,
                accepted_at = CASE WHEN $3 <> 'cancelled' THEN COALESCE(accepted_at, $5) ELSE accepted_at END,
                picked_up_at = CASE WHEN $3 = 'picked_up' THEN $5 ELSE picked_up_at END,
                in_transit_at = CASE WHEN $3 = 'in_transit' THEN $5 ELSE in_transit_at END,
                delivered_at = CASE WHEN $3 = 'delivered' THEN $5 ELSE delivered_at END,
                cancelled_at = CASE WHEN $3 = 'cancelled' THEN $5 ELSE cancelled_at END,
                proof_of_delivery = COALESCE($4, proof_of_delivery)
            WHERE id = $1
              AND ($2::int4 IS NULL OR delivery_partner_id = $2)
              AND status NOT IN ('delivered', 'cancelled')
              AND (
                ($3 = 'cancelled' AND status IN ('pending', 'assigned', 'picked_up'))
                OR ($3 <> 'cancelled' AND status <> 'pending' AND status < $3)
              )
            RETURNING "#,
            delivery_columns!()
        ))
        .bind(input.id)
        .bind(input.partner_id)
        .bind(input.to)
        .bind(&input.proof_of_delivery)
        .bind(input.now)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<TransitionDeliveryStatus> for MemoryDatabase {
    type Output = Option<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: TransitionDeliveryStatus,
    ) -> Result<Option<Delivery>, framework::Error> {
        let mut tables = self.tables();
        let Some(delivery) = tables.deliveries.get_mut(&input.id) else {
            return Ok(None);
        };
        if input
            .partner_id
            .is_some_and(|partner| delivery.delivery_partner_id != Some(partner))
            || delivery.status.is_terminal()
        {
            return Ok(None);
        }
        let allowed = if input.to == DeliveryStatus::Cancelled {
            matches!(
                delivery.status,
                DeliveryStatus::Pending | DeliveryStatus::Assigned | DeliveryStatus::PickedUp
            )
        } else {
            delivery.status != DeliveryStatus::Pending && delivery.status < input.to
        };
        if !allowed {
            return Ok(None);
        }
        delivery.status = input.to;
        delivery.updated_at = input.now;
        match input.to {
            DeliveryStatus::PickedUp => delivery.picked_up_at = Some(input.now),
            DeliveryStatus::InTransit => delivery.in_transit_at = Some(input.now),
            DeliveryStatus::Delivered => delivery.delivered_at = Some(input.now),
            DeliveryStatus::Cancelled => delivery.cancelled_at = Some(input.now),
            DeliveryStatus::Pending | DeliveryStatus::Assigned => {}
        }
        if input.to != DeliveryStatus::Cancelled && delivery.accepted_at.is_none() {
            delivery.accepted_at = Some(input.now);
        }
        if input.proof_of_delivery.is_some() {
            delivery.proof_of_delivery = input.proof_of_delivery;
        }
        Ok(Some(delivery.clone()))
    }
}

/// Overwrite the current location if nobody else did since `previous_recorded_at`.
#[derive(Debug, Clone, Copy)]
pub struct UpdateDeliveryLocation {
    pub id: i32,
    pub partner_id: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub recorded_at: PrimitiveDateTime,
    pub previous_recorded_at: Option<PrimitiveDateTime>,
    pub now: PrimitiveDateTime,
}

impl Processor<UpdateDeliveryLocation> for DatabaseProcessor {
    type Output = Option<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:UpdateDeliveryLocation", err)]
    async fn process(
        &self,
        input: UpdateDeliveryLocation,
    ) -> Result<Option<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            r#"
            UPDATE marketplace.deliveries SET
                current_latitude = $3,
                current_longitude = $4,
                current_accuracy = $5,
                location_recorded_at = $6,
                updated_at = $8
            WHERE id = $1 AND delivery_partner_id = $2
              AND status NOT IN ('delivered', 'cancelled')
              AND location_recorded_at IS NOT DISTINCT FROM $7
            RETURNING "#,
            delivery_columns!()
        ))
        .bind(input.id)
        .bind(input.partner_id)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.accuracy)
        .bind(input.recorded_at)
        .bind(input.previous_recorded_at)
        .bind(input.now)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<UpdateDeliveryLocation> for MemoryDatabase {
    type Output = Option<Delivery>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: UpdateDeliveryLocation,
    ) -> Result<Option<Delivery>, framework::Error> {
        let mut tables = self.tables();
        let Some(delivery) = tables.deliveries.get_mut(&input.id) else {
            return Ok(None);
        };
        if delivery.delivery_partner_id != Some(input.partner_id)
            || delivery.status.is_terminal()
            || delivery.location_recorded_at != input.previous_recorded_at
        {
            return Ok(None);
        }
        delivery.current_latitude = Some(input.latitude);
        delivery.current_longitude = Some(input.longitude);
        delivery.current_accuracy = input.accuracy;
        delivery.location_recorded_at = Some(input.recorded_at);
        delivery.updated_at = input.now;
        Ok(Some(delivery.clone()))
    }
}

/// Store the customer's rating of a delivered delivery; a delivery is rated once.
#[derive(Debug, Clone)]
pub struct RateDelivery {
    pub id: i32,
    pub rating: i16,
    pub feedback: Option<String>,
    pub now: PrimitiveDateTime,
}

impl Processor<RateDelivery> for DatabaseProcessor {
    type Output = Option<Delivery>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:RateDelivery", err)]
    async fn process(&self, input: RateDelivery) -> Result<Option<Delivery>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(concat!(
            r#"
            UPDATE marketplace.deliveries SET
                customer_rating = $2,
                customer_feedback = $3,
                updated_at = $4
            WHERE id = $1 AND status = 'delivered' AND customer_rating IS NULL
            RETURNING "#,
            delivery_columns!()
        ))
        .bind(input.id)
        .bind(input.rating)
        .bind(&input.feedback)
        .bind(input.now)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<RateDelivery> for MemoryDatabase {
    type Output = Option<Delivery>;
    type Error = framework::Error;
    async fn process(&self, input: RateDelivery) -> Result<Option<Delivery>, framework::Error> {
        let mut tables = self.tables();
        let Some(delivery) = tables.deliveries.get_mut(&input.id) else {
            return Ok(None);
        };
        if delivery.status != DeliveryStatus::Delivered || delivery.customer_rating.is_some() {
            return Ok(None);
        }
        delivery.customer_rating = Some(input.rating);
        delivery.customer_feedback = input.feedback;
        delivery.updated_at = input.now;
        Ok(Some(delivery.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn en_route_is_read_as_in_transit() {
        let status: DeliveryStatus = serde_json::from_str("\"en_route_delivery\"").unwrap();
        assert_eq!(status, DeliveryStatus::InTransit);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"in_transit\"");
    }

    #[test]
    fn ranks_follow_the_lifecycle() {
        assert!(DeliveryStatus::Pending < DeliveryStatus::Assigned);
        assert!(DeliveryStatus::PickedUp < DeliveryStatus::InTransit);
        assert!(DeliveryStatus::InTransit < DeliveryStatus::Delivered);
        assert!(!DeliveryStatus::Pending.is_active());
        assert!(DeliveryStatus::InTransit.is_active());
    }
}
