use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::protocol::CRITICAL_SERVICES;
use shared::types::{HealthState, ServiceDescriptor};
use crate::store::StatusReader;

/// Navbar indicator: healthy only when every load-bearing service is online.
/// An empty store (no session) is never healthy.
pub fn system_healthy(status: &StatusReader) -> bool {
    CRITICAL_SERVICES
        .iter()
        .all(|id| status.get(id) == HealthState::Online)
}

/// What a listing page may do, given the health of its backing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListingGate {
    /// Search and filtering enabled
    Open,
    /// Not observed yet (or ambiguous); keep showing placeholders
    Loading,
    /// Service confirmed offline: disable interaction, show maintenance notice
    Maintenance,
}

pub fn listing_gate(status: &StatusReader, service_id: &str) -> ListingGate {
    match status.get(service_id) {
        HealthState::Online => ListingGate::Open,
        HealthState::Degraded => ListingGate::Loading,
        HealthState::Offline => ListingGate::Maintenance,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceRow {
    pub id: String,
    pub display_name: String,
    pub port: Option<u16>,
    pub state: HealthState,
    pub observed_at: Option<DateTime<Utc>>,
}

/// Health dashboard data: one row per catalog service plus the
/// online/issues split shown in the overview chart.
///
/// The split is counted from the store, not from the legacy probes, so the
/// chart always agrees with the indicator and the action buttons. Probe
/// results are only available on demand through `probe::probe_all`.
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub online: usize,
    pub issues: usize,
    pub healthy: bool,
    pub services: Vec<ServiceRow>,
}

pub fn overview(status: &StatusReader, catalog: &[ServiceDescriptor]) -> Overview {
    let services: Vec<ServiceRow> = catalog
        .iter()
        .map(|desc| {
            let entry = status.entry(&desc.id);
            ServiceRow {
                id: desc.id.clone(),
                display_name: desc.display_name.clone(),
                port: desc.port,
                state: entry.as_ref().map(|e| e.state).unwrap_or_default(),
                observed_at: entry.map(|e| e.observed_at),
            }
        })
        .collect();

    let online = services
        .iter()
        .filter(|row| row.state == HealthState::Online)
        .count();

    Overview {
        online,
        issues: services.len() - online,
        healthy: system_healthy(status),
        services,
    }
}
