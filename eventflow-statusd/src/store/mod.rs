pub mod digest;

use chrono::Utc;
use tokio::sync::watch;
use shared::types::{HealthState, StatusEntry, StatusMap};

/// Create an empty status store, split into its single writer and a
/// cloneable read side.
pub fn status_store() -> (StatusWriter, StatusReader) {
    let empty = StatusMap::new();
    let (digest_tx, digest_rx) = watch::channel(digest::compute_digest(&empty));
    let (tx, rx) = watch::channel(empty);

    let writer = StatusWriter { tx, digest_tx };
    let reader = StatusReader { rx, digest_rx };
    (writer, reader)
}

/// The only handle allowed to mutate the store. Deliberately not `Clone`.
pub struct StatusWriter {
    tx: watch::Sender<StatusMap>,
    digest_tx: watch::Sender<String>,
}

impl StatusWriter {
    /// Merge the given states, stamping each with the current time.
    /// Ids not in `entries` are left untouched. Returns the number of
    /// entries written.
    pub fn set_many<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, HealthState)>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        if entries.is_empty() {
            return 0;
        }

        let now = Utc::now();
        let written = entries.len();
        self.tx.send_modify(|status| {
            for (id, state) in entries {
                // observed_at must never go backwards for a key
                let observed_at = match status.get(&id) {
                    Some(prev) if prev.observed_at > now => prev.observed_at,
                    _ => now,
                };
                status.insert(id, StatusEntry { state, observed_at });
            }
        });
        self.publish_digest();
        written
    }

    pub fn set(&self, id: impl Into<String>, state: HealthState) {
        self.set_many([(id.into(), state)]);
    }

    /// Drop every entry. Subscribers are only woken if something was held.
    pub fn clear(&self) {
        let cleared = self.tx.send_if_modified(|status| {
            if status.is_empty() {
                return false;
            }
            status.clear();
            true
        });
        if cleared {
            self.publish_digest();
        }
    }

    fn publish_digest(&self) {
        let next = digest::compute_digest(&self.tx.borrow());
        self.digest_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Read-only view of the store.
#[derive(Clone)]
pub struct StatusReader {
    rx: watch::Receiver<StatusMap>,
    digest_rx: watch::Receiver<String>,
}

impl StatusReader {
    /// Stored state for `id`, or `Degraded` if it was never observed
    pub fn get(&self, id: &str) -> HealthState {
        self.rx
            .borrow()
            .get(id)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    pub fn entry(&self, id: &str) -> Option<StatusEntry> {
        self.rx.borrow().get(id).cloned()
    }

    pub fn snapshot(&self) -> StatusMap {
        self.rx.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.borrow().is_empty()
    }

    pub fn digest(&self) -> String {
        self.digest_rx.borrow().clone()
    }

    /// A fresh receiver that wakes on every mutation
    pub fn subscribe(&self) -> watch::Receiver<StatusMap> {
        let mut rx = self.rx.clone();
        rx.mark_unchanged();
        rx
    }

    /// Wait for the next mutation. Returns false once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
