use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Health of one backend service as perceived by the status store.
///
/// `Degraded` doubles as the value reported for services that have never
/// been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Online,
    Offline,
    #[default]
    Degraded,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Online => "ONLINE",
            HealthState::Offline => "OFFLINE",
            HealthState::Degraded => "DEGRADED",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation held by the status store. Replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub state: HealthState,

    /// Arrival time of the observation, not the time the backend saw it
    pub observed_at: DateTime<Utc>,
}

/// Service id -> latest observation. Ordered so serialized output is stable.
pub type StatusMap = BTreeMap<String, StatusEntry>;

/// Static reference data for one backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Stable identifier, e.g. "order-service"
    pub id: String,

    /// Human readable name, e.g. "Order Service"
    pub display_name: String,

    /// Gateway-relative health check path, e.g. "/health/orders".
    /// Services without one are skipped by the legacy probes.
    #[serde(default)]
    pub health_check_path: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,
}

/// Payload of a `docker-event` message on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Container name, e.g. "eventflow-order-service-1"
    pub name: String,

    /// Raw lifecycle action, e.g. "die" or "start"
    pub status: String,
}

/// Lifecycle command accepted by the backend control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown service action: {}", self.0)
    }
}

impl std::error::Error for UnknownAction {}

impl FromStr for ServiceAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Which source currently keeps the status store fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestionMode {
    /// No credential, nothing running
    Idle,
    /// Push channel open
    Connected,
    /// First connect attempt of a session in flight, no polling yet
    Reconnecting,
    /// Push channel down, snapshot polling active. Stays in this mode while
    /// a reconnect attempt is in flight.
    Polling,
}

/// Result of a direct health probe against one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    /// 2xx response
    Online,
    /// Reachable, non-2xx response
    Error,
    /// Transport failure or timeout
    Offline,
}
