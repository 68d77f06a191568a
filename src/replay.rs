//! Replay protection for accepted payment proofs.
//!
//! The gateway records every accepted proof by its content hash for the
//! lifetime of the proof's deadline. Two concurrent requests presenting the
//! same proof race on `try_claim`; exactly one wins. Expired entries are
//! purged on every claim so the store stays bounded.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::utils::current_timestamp;

/// In-memory store of claimed proof hashes with per-entry expiry.
pub struct ReplayStore {
    inner: Mutex<HashMap<[u8; 32], u64>>,
}

impl ReplayStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<[u8; 32], u64>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("replay store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Atomically claims a proof hash until `expires_at`.
    ///
    /// Returns `true` when the claim succeeded and `false` when the hash is
    /// already claimed (a replay). A hash whose previous claim has expired
    /// can be claimed again; schemes re-evaluate such proofs and reject them
    /// on their own deadline.
    pub fn try_claim(&self, key: [u8; 32], expires_at: u64) -> bool {
        let mut map = self.lock();
        let now = current_timestamp();
        map.retain(|_, expiry| *expiry > now);

        match map.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        }
    }

    /// Releases a claim, allowing the proof to be retried. Used when
    /// settlement fails after the claim was taken.
    pub fn release(&self, key: &[u8; 32]) {
        self.lock().remove(key);
    }

    /// Whether a hash currently holds an unexpired claim.
    pub fn is_claimed(&self, key: &[u8; 32]) -> bool {
        let now = current_timestamp();
        self.lock()
            .get(key)
            .map(|expiry| *expiry > now)
            .unwrap_or(false)
    }

    /// Number of entries, including any not yet purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayStore {
    fn default() -> Self {
        Self::new()
    }
}
