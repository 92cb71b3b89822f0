use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use shared::types::{HealthState, ServiceAction};
use crate::backend::{Accepted, BackendClient};
use crate::error::{ActionError, ClientError};
use crate::session::Session;
use crate::store::StatusReader;

#[derive(Debug, Clone)]
struct PendingAction {
    action: ServiceAction,
    since: Instant,
    /// State when the command went out; any change ends the pending phase
    baseline: HealthState,
}

/// Issues start/stop/restart commands and tracks which services have one
/// outstanding.
///
/// A command's HTTP success only means "accepted for processing". The store
/// is never touched here: the container's new state arrives later through
/// the ingestion channel, and that change is what clears the pending flag.
#[derive(Clone)]
pub struct ActionDispatcher {
    client: BackendClient,
    session: Session,
    status: StatusReader,
    catalog: Arc<Vec<String>>,
    pending: Arc<Mutex<HashMap<String, PendingAction>>>,
    pending_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(
        client: BackendClient,
        session: Session,
        status: StatusReader,
        catalog: Vec<String>,
        pending_timeout: Duration,
    ) -> Self {
        Self {
            client,
            session,
            status,
            catalog: Arc::new(catalog),
            pending: Arc::new(Mutex::new(HashMap::new())),
            pending_timeout,
        }
    }

    pub async fn dispatch(
        &self,
        service_id: &str,
        action: ServiceAction,
    ) -> Result<Accepted, ActionError> {
        if !self.catalog.iter().any(|id| id == service_id) {
            return Err(ActionError::UnknownService(service_id.to_string()));
        }
        let token = self.session.token().ok_or(ClientError::MissingCredential)?;

        self.pending.lock().insert(
            service_id.to_string(),
            PendingAction {
                action,
                since: Instant::now(),
                baseline: self.status.get(service_id),
            },
        );
        tracing::info!("Dispatching {} for {}", action, service_id);

        match self.client.dispatch(&token, action, service_id).await {
            Ok(accepted) => Ok(accepted),
            Err(e) => {
                tracing::warn!("{} {} failed: {}", action, service_id, e);
                self.pending.lock().remove(service_id);
                Err(e.into())
            }
        }
    }

    /// Whether a command for `service_id` is still awaiting its effect
    pub fn is_pending(&self, service_id: &str) -> bool {
        let mut pending = self.pending.lock();
        let live = match pending.get(service_id) {
            Some(entry) => self.still_pending(service_id, entry),
            None => return false,
        };
        if !live {
            pending.remove(service_id);
        }
        live
    }

    /// Service ids with an outstanding command, with the command issued
    pub fn pending(&self) -> Vec<(String, ServiceAction)> {
        let mut pending = self.pending.lock();
        pending.retain(|id, entry| self.still_pending(id, entry));

        let mut out: Vec<_> = pending
            .iter()
            .map(|(id, entry)| (id.clone(), entry.action))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn still_pending(&self, service_id: &str, entry: &PendingAction) -> bool {
        entry.since.elapsed() < self.pending_timeout
            && self.status.get(service_id) == entry.baseline
    }
}
