use super::delivery::DeliveryStatus;
use super::memory::MemoryDatabase;
use compact_str::CompactString;
use kanau::processor::Processor;
use framework::sqlx::DatabaseProcessor;
use rust_decimal::Decimal;
use time::PrimitiveDateTime;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPartner {
    pub id: i32,
    pub user_id: i32,
    pub vehicle_type: VehicleType,
    pub vehicle_number: CompactString,
    pub status: PartnerStatus,
    pub reviewed_by: Option<i32>,
    pub reviewed_at: Option<PrimitiveDateTime>,
    pub rejection_reason: Option<String>,
    pub is_available: bool,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub total_deliveries: i32,
    pub rating: Decimal,
    pub total_earnings: Decimal,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "marketplace.vehicle_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Bicycle,
    Motorcycle,
    Scooter,
    Car,
    Van,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "marketplace.partner_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
    Pending,
    Approved,
    Rejected,
}

impl PartnerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PartnerStatus::Pending => "pending",
            PartnerStatus::Approved => "approved",
            PartnerStatus::Rejected => "rejected",
        }
    }
}

/// An eligible partner with the number of deliveries it is carrying right now.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PartnerCandidate {
    #[sqlx(flatten)]
    pub partner: DeliveryPartner,
    pub active_deliveries: i64,
}

macro_rules! partner_columns {
    () => {
        "id, user_id, vehicle_type, vehicle_number, status, reviewed_by, reviewed_at, \
         rejection_reason, is_available, current_latitude, current_longitude, total_deliveries, \
         rating, total_earnings, created_at"
    };
}

#[derive(Debug, Clone)]
pub struct RegisterDeliveryPartner {
    pub user_id: i32,
    pub vehicle_type: VehicleType,
    pub vehicle_number: CompactString,
    pub now: PrimitiveDateTime,
}

impl Processor<RegisterDeliveryPartner> for DatabaseProcessor {
    type Output = DeliveryPartner;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:RegisterDeliveryPartner", err)]
    async fn process(&self, input: RegisterDeliveryPartner) -> Result<DeliveryPartner, sqlx::Error> {
        sqlx::query_as::<_, DeliveryPartner>(concat!(
            r#"
            INSERT INTO marketplace.delivery_partners
                (user_id, vehicle_type, vehicle_number, status, is_available, created_at)
            VALUES ($1, $2, $3, 'pending', FALSE, $4)
            RETURNING "#,
            partner_columns!()
        ))
        .bind(input.user_id)
        .bind(input.vehicle_type)
        .bind(input.vehicle_number.as_str())
        .bind(input.now)
        .fetch_one(self.db())
        .await
    }
}

impl Processor<RegisterDeliveryPartner> for MemoryDatabase {
    type Output = DeliveryPartner;
    type Error = framework::Error;
    async fn process(
        &self,
        input: RegisterDeliveryPartner,
    ) -> Result<DeliveryPartner, framework::Error> {
        let mut tables = self.tables();
        if tables.partners.values().any(|p| p.user_id == input.user_id) {
            return Err(framework::Error::conflict(
                "user is already registered as a delivery partner",
            ));
        }
        let partner = DeliveryPartner {
            id: tables.next_serial("delivery_partners"),
            user_id: input.user_id,
            vehicle_type: input.vehicle_type,
            vehicle_number: input.vehicle_number,
            status: PartnerStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            is_available: false,
            current_latitude: None,
            current_longitude: None,
            total_deliveries: 0,
            rating: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            created_at: input.now,
        };
        tables.partners.insert(partner.id, partner.clone());
        Ok(partner)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindPartnerById {
    pub id: i32,
}

impl Processor<FindPartnerById> for DatabaseProcessor {
    type Output = Option<DeliveryPartner>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindPartnerById", err)]
    async fn process(&self, input: FindPartnerById) -> Result<Option<DeliveryPartner>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryPartner>(concat!(
            "SELECT ",
            partner_columns!(),
            " FROM marketplace.delivery_partners WHERE id = $1"
        ))
        .bind(input.id)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<FindPartnerById> for MemoryDatabase {
    type Output = Option<DeliveryPartner>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: FindPartnerById,
    ) -> Result<Option<DeliveryPartner>, framework::Error> {
        Ok(self.tables().partners.get(&input.id).cloned())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindPartnerByUserId {
    pub user_id: i32,
}

impl Processor<FindPartnerByUserId> for DatabaseProcessor {
    type Output = Option<DeliveryPartner>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindPartnerByUserId", err)]
    async fn process(
        &self,
        input: FindPartnerByUserId,
    ) -> Result<Option<DeliveryPartner>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryPartner>(concat!(
            "SELECT ",
            partner_columns!(),
            " FROM marketplace.delivery_partners WHERE user_id = $1"
        ))
        .bind(input.user_id)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<FindPartnerByUserId> for MemoryDatabase {
    type Output = Option<DeliveryPartner>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: FindPartnerByUserId,
    ) -> Result<Option<DeliveryPartner>, framework::Error> {
        Ok(self
            .tables()
            .partners
            .values()
            .find(|p| p.user_id == input.user_id)
            .cloned())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListDeliveryPartners {
    pub status: Option<PartnerStatus>,
}

impl Processor<ListDeliveryPartners> for DatabaseProcessor {
    type Output = Vec<DeliveryPartner>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListDeliveryPartners", err)]
    async fn process(
        &self,
        input: ListDeliveryPartners,
    ) -> Result<Vec<DeliveryPartner>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryPartner>(concat!(
            "SELECT ",
            partner_columns!(),
            r#"
            FROM marketplace.delivery_partners
            WHERE $1::marketplace.partner_status IS NULL OR status = $1
            ORDER BY created_at, id
            "#
        ))
        .bind(input.status)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListDeliveryPartners> for MemoryDatabase {
    type Output = Vec<DeliveryPartner>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ListDeliveryPartners,
    ) -> Result<Vec<DeliveryPartner>, framework::Error> {
        let tables = self.tables();
        let mut partners: Vec<DeliveryPartner> = tables
            .partners
            .values()
            .filter(|p| input.status.is_none_or(|status| p.status == status))
            .cloned()
            .collect();
        partners.sort_by_key(|p| (p.created_at, p.id));
        Ok(partners)
    }
}

/// Record an admin decision on a `pending` application. Approval also makes the
/// partner available for work.
#[derive(Debug, Clone)]
pub struct ReviewPartnerApplication {
    pub id: i32,
    pub decision: PartnerStatus,
    pub reviewed_by: i32,
    pub rejection_reason: Option<String>,
    pub now: PrimitiveDateTime,
}

impl Processor<ReviewPartnerApplication> for DatabaseProcessor {
    type Output = Option<DeliveryPartner>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ReviewPartnerApplication", err)]
    async fn process(
        &self,
        input: ReviewPartnerApplication,
    ) -> Result<Option<DeliveryPartner>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryPartner>(concat!(
            r#"
            UPDATE marketplace.delivery_partners SET
                status = $2,
                reviewed_by = $3,
                reviewed_at = $5,
                rejection_reason = $4,
                is_available = ($2 = 'approved')
            WHERE id = $1 AND status = 'pending'
            RETURNING "#,
            partner_columns!()
        ))
        .bind(input.id)
        .bind(input.decision)
        .bind(input.reviewed_by)
        .bind(&input.rejection_reason)
        .bind(input.now)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<ReviewPartnerApplication> for MemoryDatabase {
    type Output = Option<DeliveryPartner>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ReviewPartnerApplication,
    ) -> Result<Option<DeliveryPartner>, framework::Error> {
        let mut tables = self.tables();
        let Some(partner) = tables.partners.get_mut(&input.id) else {
            return Ok(None);
        };
        if partner.status != PartnerStatus::Pending {
            return Ok(None);
        }
        partner.status = input.decision;
        partner.reviewed_by = Some(input.reviewed_by);
        partner.reviewed_at = Some(input.now);
        partner.rejection_reason = input.rejection_reason;
        partner.is_available = input.decision == PartnerStatus::Approved;
        Ok(Some(partner.clone()))
    }
}

/// Approved and available partners carrying fewer than `max_active` deliveries,
/// least loaded first, then the ones that joined earliest.
#[derive(Debug, Clone, Copy)]
pub struct ListAssignableCandidates {
    pub max_active: i64,
}

impl Processor<ListAssignableCandidates> for DatabaseProcessor {
    type Output = Vec<PartnerCandidate>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListAssignableCandidates", err)]
    async fn process(
        &self,
        input: ListAssignableCandidates,
    ) -> Result<Vec<PartnerCandidate>, sqlx::Error> {
        sqlx::query_as::<_, PartnerCandidate>(
            r#"
            SELECT p.id, p.user_id, p.vehicle_type, p.vehicle_number, p.status, p.reviewed_by,
                   p.reviewed_at, p.rejection_reason, p.is_available, p.current_latitude,
                   p.current_longitude, p.total_deliveries, p.rating, p.total_earnings, p.created_at,
                   COUNT(d.id) AS active_deliveries
            FROM marketplace.delivery_partners p
            LEFT JOIN marketplace.deliveries d
                ON d.delivery_partner_id = p.id
               AND d.status IN ('assigned', 'picked_up', 'in_transit')
            WHERE p.status = 'approved' AND p.is_available
            GROUP BY p.id
            HAVING COUNT(d.id) < $1
            ORDER BY active_deliveries, p.created_at, p.id
            "#,
        )
        .bind(input.max_active)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListAssignableCandidates> for MemoryDatabase {
    type Output = Vec<PartnerCandidate>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ListAssignableCandidates,
    ) -> Result<Vec<PartnerCandidate>, framework::Error> {
        let tables = self.tables();
        let mut candidates: Vec<PartnerCandidate> = tables
            .partners
            .values()
            .filter(|p| p.status == PartnerStatus::Approved && p.is_available)
            .map(|p| PartnerCandidate {
                partner: p.clone(),
                active_deliveries: tables
                    .deliveries
                    .values()
                    .filter(|d| d.delivery_partner_id == Some(p.id))
                    .filter(|d| DeliveryStatus::ACTIVE.contains(&d.status))
                    .count() as i64,
            })
            .filter(|c| c.active_deliveries < input.max_active)
            .collect();
        candidates.sort_by_key(|c| (c.active_deliveries, c.partner.created_at, c.partner.id));
        Ok(candidates)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetPartnerAvailability {
    pub user_id: i32,
    pub is_available: bool,
}

impl Processor<SetPartnerAvailability> for DatabaseProcessor {
    type Output = Option<DeliveryPartner>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:SetPartnerAvailability", err)]
    async fn process(
        &self,
        input: SetPartnerAvailability,
    ) -> Result<Option<DeliveryPartner>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryPartner>(concat!(
            r#"
            UPDATE marketplace.delivery_partners SET is_available = $2
            WHERE user_id = $1 AND status = 'approved'
            RETURNING "#,
            partner_columns!()
        ))
        .bind(input.user_id)
        .bind(input.is_available)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<SetPartnerAvailability> for MemoryDatabase {
    type Output = Option<DeliveryPartner>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: SetPartnerAvailability,
    ) -> Result<Option<DeliveryPartner>, framework::Error> {
        let mut tables = self.tables();
        let Some(partner) = tables
            .partners
            .values_mut()
            .find(|p| p.user_id == input.user_id && p.status == PartnerStatus::Approved)
        else {
            return Ok(None);
        };
        partner.is_available = input.is_available;
        Ok(Some(partner.clone()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpdatePartnerLocation {
    pub id: i32,
    pub latitude: f64,
    pub longitude: f64,
}

impl Processor<UpdatePartnerLocation> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:UpdatePartnerLocation", err)]
    async fn process(&self, input: UpdatePartnerLocation) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE marketplace.delivery_partners
            SET current_latitude = $2, current_longitude = $3
            WHERE id = $1
            "#,
        )
        .bind(input.id)
        .bind(input.latitude)
        .bind(input.longitude)
        .execute(self.db())
        .await?;
        Ok(())
    }
}

impl Processor<UpdatePartnerLocation> for MemoryDatabase {
    type Output = ();
    type Error = framework::Error;
    async fn process(&self, input: UpdatePartnerLocation) -> Result<(), framework::Error> {
        if let Some(partner) = self.tables().partners.get_mut(&input.id) {
            partner.current_latitude = Some(input.latitude);
            partner.current_longitude = Some(input.longitude);
        }
        Ok(())
    }
}

/// Count a completed delivery towards the partner's totals.
#[derive(Debug, Clone, Copy)]
pub struct RecordCompletedDelivery {
    pub id: i32,
    pub earnings: Decimal,
}

impl Processor<RecordCompletedDelivery> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:RecordCompletedDelivery", err)]
    async fn process(&self, input: RecordCompletedDelivery) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE marketplace.delivery_partners
            SET total_deliveries = total_deliveries + 1,
                total_earnings = total_earnings + $2
            WHERE id = $1
            "#,
        )
        .bind(input.id)
        .bind(input.earnings)
        .execute(self.db())
        .await?;
        Ok(())
    }
}

impl Processor<RecordCompletedDelivery> for MemoryDatabase {
    type Output = ();
    type Error = framework::Error;
    async fn process(&self, input: RecordCompletedDelivery) -> Result<(), framework::Error> {
        if let Some(partner) = self.tables().partners.get_mut(&input.id) {
            partner.total_deliveries += 1;
            partner.total_earnings += input.earnings;
        }
        Ok(())
    }
}

/// Recompute the partner's rating as the mean of its rated deliveries.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPartnerRating {
    pub id: i32,
}

impl Processor<RefreshPartnerRating> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:RefreshPartnerRating", err)]
    async fn process(&self, input: RefreshPartnerRating) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE marketplace.delivery_partners SET rating = COALESCE((
                SELECT ROUND(AVG(customer_rating)::numeric, 2)
                FROM marketplace.deliveries
                WHERE delivery_partner_id = $1 AND customer_rating IS NOT NULL
            ), 0)
            WHERE id = $1
            "#,
        )
        .bind(input.id)
        .execute(self.db())
        .await?;
        Ok(())
    }
}

impl Processor<RefreshPartnerRating> for MemoryDatabase {
    type Output = ();
    type Error = framework::Error;
    async fn process(&self, input: RefreshPartnerRating) -> Result<(), framework::Error> {
        let mut tables = self.tables();
        let ratings: Vec<i16> = tables
            .deliveries
            .values()
            .filter(|d| d.delivery_partner_id == Some(input.id))
            .filter_map(|d| d.customer_rating)
            .collect();
        let rating = if ratings.is_empty() {
            Decimal::ZERO
        } else {
            let sum: i64 = ratings.iter().map(|r| i64::from(*r)).sum();
            (Decimal::from(sum) / Decimal::from(ratings.len() as i64)).round_dp(2)
        };
        if let Some(partner) = tables.partners.get_mut(&input.id) {
            partner.rating = rating;
        }
        Ok(())
    }
}
