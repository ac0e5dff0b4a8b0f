use compact_str::CompactString;
use rust_decimal::Decimal;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    pub assignment: AssignmentConfig,
    pub tracking: TrackingConfig,
    pub pricing: PricingConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPolicyKind {
    #[default]
    LeastLoaded,
    Nearest,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    pub max_active_per_partner: i64,
    /// Unaccepted assignments older than this are released.
    pub acceptance_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub policy: AssignmentPolicyKind,
    /// Match a partner as soon as the shopkeeper marks the order ready.
    pub auto_assign_on_ready: bool,
    /// Used for the delivery time estimate.
    pub average_speed_kmh: f64,
    /// Unassigned deliveries retried per sweep.
    pub retry_batch_size: i64,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            max_active_per_partner: 1,
            acceptance_timeout_secs: 60,
            sweep_interval_secs: 15,
            policy: AssignmentPolicyKind::LeastLoaded,
            auto_assign_on_ready: true,
            average_speed_kmh: 20.0,
            retry_batch_size: 50,
        }
    }
}

impl AssignmentConfig {
    pub fn acceptance_timeout(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.acceptance_timeout_secs).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub min_report_interval_secs: u64,
    pub min_movement_meters: f64,
    pub max_accuracy_meters: f64,
    pub stale_after_secs: u64,
    pub retain_trail: bool,
    pub trail_limit: i64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_report_interval_secs: 3,
            min_movement_meters: 25.0,
            max_accuracy_meters: 100.0,
            stale_after_secs: 60,
            retain_trail: true,
            trail_limit: 500,
        }
    }
}

impl TrackingConfig {
    pub fn min_report_interval(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.min_report_interval_secs).unwrap_or(i64::MAX))
    }

    pub fn stale_after(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX))
    }
}

/// A distance band with its own fee: `base_fee + per_km_rate * km`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeliveryZone {
    pub name: CompactString,
    pub min_km: f64,
    pub max_km: f64,
    pub base_fee: Decimal,
    pub per_km_rate: Decimal,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub tax_rate: Decimal,
    pub default_delivery_fee: Decimal,
    pub zones: Vec<DeliveryZone>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::ZERO,
            default_delivery_fee: Decimal::new(3000, 2),
            zones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
pub struct PushConfig {
    pub fcm: Option<FcmConfig>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FcmConfig {
    pub server_key: String,
    #[serde(default = "FcmConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "FcmConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl FcmConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "https://fcm.googleapis.com/fcm/send";

    fn default_endpoint() -> String {
        Self::DEFAULT_ENDPOINT.to_owned()
    }

    fn default_timeout_secs() -> u64 {
        10
    }

    pub fn new(server_key: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
            endpoint: Self::default_endpoint(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}
