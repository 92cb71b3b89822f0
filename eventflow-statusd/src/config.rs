use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::types::ServiceDescriptor;

/// Overrides the gateway base URL from the config file
pub const ENV_API_URL: &str = "EVENTFLOW_API_URL";

/// Supplies the initial bearer credential
pub const ENV_TOKEN: &str = "EVENTFLOW_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Initial credential; normally handed over later through the session endpoint
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_base_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    30
}

fn default_pending_timeout() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_listen() -> String {
    "127.0.0.1:8090".to_string()
}

fn descriptor(id: &str, name: &str, path: Option<&str>, port: Option<u16>) -> ServiceDescriptor {
    ServiceDescriptor {
        id: id.to_string(),
        display_name: name.to_string(),
        health_check_path: path.map(str::to_string),
        port,
    }
}

fn default_services() -> Vec<ServiceDescriptor> {
    vec![
        descriptor("api-gateway", "API Gateway", Some("/actuator/health"), Some(8000)),
        descriptor("auth-service", "Auth Service", Some("/health/auth"), Some(8086)),
        descriptor("order-service", "Order Service", Some("/health/orders"), Some(8081)),
        descriptor("inventory-service", "Inventory Service", Some("/health/inventory"), Some(8082)),
        descriptor("payment-service", "Payment Service", Some("/health/payments"), Some(8083)),
        descriptor("analytics-service", "Analytics Service", Some("/health/analytics"), Some(8085)),
        descriptor("product-service", "Product Service", None, None),
    ]
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

impl IngestionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: default_pending_timeout(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            ingestion: IngestionConfig::default(),
            actions: ActionsConfig::default(),
            probes: ProbeConfig::default(),
            api: ApiConfig::default(),
            services: default_services(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `EVENTFLOW_API_URL` / `EVENTFLOW_TOKEN`. Read once at startup.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.is_empty() {
                self.backend.base_url = url;
            }
        }
        if let Ok(token) = std::env::var(ENV_TOKEN) {
            if !token.is_empty() {
                self.backend.token = Some(token);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.ingestion.poll_interval_secs > 0,
            "ingestion.poll_interval_secs must be positive"
        );
        anyhow::ensure!(!self.services.is_empty(), "service catalog is empty");
        Ok(())
    }

    /// Catalog service ids, in configuration order
    pub fn service_ids(&self) -> Vec<String> {
        self.services.iter().map(|s| s.id.clone()).collect()
    }
}
