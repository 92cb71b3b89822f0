use std::collections::BTreeMap;
use std::time::Duration;
use shared::types::{ProbeOutcome, ServiceDescriptor};
use crate::backend::BackendClient;

/// Direct per-service health checks, independent of the status store.
///
/// Each probe has its own timeout; a timeout counts as `offline`, same as a
/// refused connection. Services are checked one after another.
pub async fn probe_all(
    client: &BackendClient,
    token: Option<&str>,
    catalog: &[ServiceDescriptor],
    timeout: Duration,
) -> BTreeMap<String, ProbeOutcome> {
    let mut results = BTreeMap::new();
    for desc in catalog {
        let Some(path) = desc.health_check_path.as_deref() else {
            continue;
        };
        let outcome = client.probe(token, path, timeout).await;
        tracing::debug!("Probe {} -> {:?}", desc.display_name, outcome);
        results.insert(desc.display_name.clone(), outcome);
    }
    results
}
