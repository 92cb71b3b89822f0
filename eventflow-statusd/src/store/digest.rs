use sha2::{Sha256, Digest};
use shared::types::StatusMap;

/// SHA-256 over the (service id, state) pairs of the map.
///
/// Only the state is hashed: `observed_at` moves on every event and poll even
/// when nothing a consumer would render has changed. The map is ordered, so
/// the digest does not depend on insertion order.
pub fn compute_digest(status: &StatusMap) -> String {
    let mut hasher = Sha256::new();
    for (id, entry) in status {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.state.as_str().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
