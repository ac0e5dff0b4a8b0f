use ordering::config::{DispatchConfig, FcmConfig};
use std::path::Path;
use tracing::{info, warn};

pub const CONFIG_PATH_VAR: &str = "BAZAAR_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";
const SECRETS_DIR: &str = "/run/secrets";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS; empty allows any.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    /// In-process tables, lost on restart.
    Memory,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Postgres,
            url: None,
            max_connections: 10,
            run_migrations: true,
        }
    }
}

impl AppConfig {
    /// The TOML file named by `BAZAAR_CONFIG`, then environment and secret overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(env_or_secret);
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                info!(path = %path.display(), "Loading configuration");
                Ok(toml::from_str(&raw)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Configuration file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(e) => warn!("Ignoring invalid PORT {port:?}: {e}"),
            }
        }
        if let Some(key) = lookup("FCM_SERVER_KEY") {
            match &mut self.dispatch.push.fcm {
                Some(fcm) => fcm.server_key = key,
                None => self.dispatch.push.fcm = Some(FcmConfig::new(key)),
            }
        }
    }
}

/// An environment variable, else the docker secret file of the same name.
fn env_or_secret(key: &str) -> Option<String> {
    if let Ok(value) = std::env::var(key) {
        return Some(value);
    }
    let path = Path::new(SECRETS_DIR).join(key);
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordering::config::AssignmentPolicyKind;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [dispatch.assignment]
            policy = "nearest"
            max_active_per_partner = 2

            [[dispatch.pricing.zones]]
            name = "near"
            min_km = 0.0
            max_km = 3.0
            base_fee = "20.00"
            per_km_rate = "0"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.dispatch.assignment.policy, AssignmentPolicyKind::Nearest);
        assert_eq!(config.dispatch.assignment.max_active_per_partner, 2);
        assert_eq!(config.dispatch.assignment.acceptance_timeout_secs, 60);
        assert_eq!(config.dispatch.pricing.zones.len(), 1);
        assert_eq!(config.database.backend, DatabaseBackend::Postgres);
    }

    #[test]
    fn overrides_win_over_the_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "postgres://dispatch@db/bazaar"),
            ("PORT", "not-a-port"),
            ("FCM_SERVER_KEY", "secret"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_owned()));
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://dispatch@db/bazaar")
        );
        assert_eq!(config.server.port, 8080);
        let fcm = config.dispatch.push.fcm.unwrap();
        assert_eq!(fcm.server_key, "secret");
        assert_eq!(fcm.endpoint, FcmConfig::DEFAULT_ENDPOINT);
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = AppConfig::from_file(Path::new("/nonexistent/bazaar.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
