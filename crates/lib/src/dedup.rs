//! Dedup guard: short-TTL set of processed event identifiers shared by both
//! relay streams and the command surface.
//!
//! An id is recorded before processing begins, so a retried delivery that
//! lands mid-processing is also suppressed. Entries expire after the TTL
//! regardless of the processing outcome.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Matches the delivery-retry window of the workspace platform.
pub const DEDUP_TTL: Duration = Duration::from_secs(10 * 60);

pub struct DedupGuard {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(DEDUP_TTL)
    }
}

impl DedupGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `id` and report whether it was seen for the first time within
    /// the TTL window. Expired entries are pruned on the way.
    pub async fn first_seen(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.retain(|_, inserted| now.duration_since(*inserted) < self.ttl);
        match seen.get(id) {
            Some(_) => false,
            None => {
                seen.insert(id.to_string(), now);
                true
            }
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}
