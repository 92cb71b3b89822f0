use shared::protocol::{OFFLINE_ACTIONS, ONLINE_ACTIONS};
use shared::types::{HealthState, LifecycleEvent};

/// Map a raw lifecycle action to the state it implies. Unrecognized actions
/// imply nothing and must not be written.
pub fn action_state(action: &str) -> Option<HealthState> {
    if OFFLINE_ACTIONS.contains(&action) {
        Some(HealthState::Offline)
    } else if ONLINE_ACTIONS.contains(&action) {
        Some(HealthState::Online)
    } else {
        None
    }
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '-' | '_' | '.' | '/')
}

/// True if `id` occurs in `name` bounded on both sides by the string edge or
/// a delimiter, so "order-service" does not match inside "preorder-service".
fn contains_delimited(name: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    name.match_indices(id).any(|(start, _)| {
        let end = start + id.len();
        let left_ok = name[..start].chars().next_back().map_or(true, is_delimiter);
        let right_ok = name[end..].chars().next().map_or(true, is_delimiter);
        left_ok && right_ok
    })
}

/// Resolve a container name to a catalog service id.
///
/// Compose-style names ("eventflow-order-service-1") carry the id between
/// delimiters. When several catalog ids match, the longest wins, so the
/// result never depends on catalog order.
pub fn match_service<'a>(catalog: &'a [String], container_name: &str) -> Option<&'a str> {
    catalog
        .iter()
        .filter(|id| contains_delimited(container_name, id))
        .max_by_key(|id| id.len())
        .map(String::as_str)
}

/// Turns lifecycle events into store updates for a fixed catalog.
#[derive(Debug, Clone)]
pub struct Reconciler {
    catalog: Vec<String>,
}

impl Reconciler {
    pub fn new(catalog: Vec<String>) -> Self {
        Self { catalog }
    }

    /// The update implied by `event`, if any
    pub fn reconcile(&self, event: &LifecycleEvent) -> Option<(String, HealthState)> {
        let service = match match_service(&self.catalog, &event.name) {
            Some(service) => service,
            None => {
                tracing::debug!("Ignoring event for unknown container {}", event.name);
                return None;
            }
        };

        match action_state(&event.status) {
            Some(state) => Some((service.to_string(), state)),
            None => {
                tracing::debug!("Ignoring action {} for {}", event.status, service);
                None
            }
        }
    }
}
