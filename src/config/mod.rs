use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub auth: AuthConfig,
    pub scheduler: SchedulerConfig,
    pub records: RecordsConfig,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token expected as `Authorization: Bearer <token>`. No token means
    /// only allow-listed callers get in.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Caller IP addresses admitted without a token
    #[serde(default)]
    pub allowed_callers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Node name written into execution records
    pub instance_name: String,
    pub tick_interval_ms: u64,
    /// Upper bound of concurrently executing firings
    pub max_concurrent_jobs: usize,
    /// Liveness poll interval for interruptible jobs
    pub interruptible_wait_ms: u64,
    pub validate_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    pub enabled: bool,
    pub lifetime_days: Option<u32>,
    /// Initial schedule of the record housekeeping job. A schedule changed
    /// later through the API is kept across restarts.
    #[serde(default = "default_housekeeping_enabled")]
    pub housekeeping_enabled: bool,
    #[serde(default = "default_housekeeping_cron")]
    pub housekeeping_cron: String,
}

fn default_housekeeping_enabled() -> bool {
    true
}

fn default_housekeeping_cron() -> String {
    "0 0 3 * * ?".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub name: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./jobkeeper.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            auth: AuthConfig::default(),
            scheduler: SchedulerConfig {
                instance_name: "node-1".to_string(),
                tick_interval_ms: 1000,
                max_concurrent_jobs: 10,
                interruptible_wait_ms: 5000,
                validate_on_startup: false,
            },
            records: RecordsConfig {
                enabled: true,
                lifetime_days: None,
                housekeeping_enabled: default_housekeeping_enabled(),
                housekeeping_cron: default_housekeeping_cron(),
            },
            tenants: vec![TenantConfig {
                name: "default".to_string(),
                components: vec!["scheduler".to_string()],
                active: true,
            }],
        }
    }
}

impl Config {
    /// Load configuration from built-in defaults, the TOML file at `path` and
    /// `JOBKEEPER__SECTION__KEY` environment variables, in that order.
    /// A missing file is created with the defaults.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(path, contents)?;
        }

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("JOBKEEPER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn tenant(&self, name: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.name == name)
    }

    pub fn active_tenants(&self) -> impl Iterator<Item = &TenantConfig> {
        self.tenants.iter().filter(|t| t.active)
    }
}
