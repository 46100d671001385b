//! Short-lived mutual exclusion over the shared key space.
//!
//! A lock is a key created with set-if-absent and a TTL, holding a random token
//! unique to the holder. Only that token can delete the key, so a holder whose TTL
//! lapsed cannot release a lock someone else has since acquired.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::storage::{KvBackend, StoreError};

pub const REGISTER_LOCK_PREFIX: &str = "mental:register:";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// Someone else holds the key; the caller should report "in progress".
    #[error("lock '{0}' is already held")]
    AlreadyHeld(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct DistributedLock {
    kv: Arc<dyn KvBackend>,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self { Self { kv } }

    /// Try once to take `key` for `ttl`. Never retries.
    pub fn acquire(&self, key: &str, ttl: Duration) -> Result<LockHandle, LockError> {
        let token = uuid::Uuid::new_v4().to_string();
        if !self.kv.set_nx(key, &token, ttl)? {
            debug!(target: "lock", key, "lock already held");
            return Err(LockError::AlreadyHeld(key.to_string()));
        }
        debug!(target: "lock", key, ttl_ms = ttl.as_millis() as u64, "lock acquired");
        Ok(LockHandle { kv: self.kv.clone(), key: key.to_string(), token, released: AtomicBool::new(false) })
    }

    /// Convenience for the registration path.
    pub fn acquire_registration(&self, account: &str, ttl: Duration) -> Result<LockHandle, LockError> {
        self.acquire(&format!("{}{}", REGISTER_LOCK_PREFIX, account), ttl)
    }
}

/// Held lock. Released explicitly with `release` or implicitly on drop.
pub struct LockHandle {
    kv: Arc<dyn KvBackend>,
    key: String,
    token: String,
    released: AtomicBool,
}

impl LockHandle {
    pub fn key(&self) -> &str { &self.key }

    /// Release the lock if this handle still owns it. Calling it again is a no-op.
    /// Returns whether the key was actually removed by this call.
    pub fn release(&self) -> Result<bool, LockError> {
        if self.released.swap(true, Ordering::SeqCst) { return Ok(false); }
        let removed = self.kv.delete_if_eq(&self.key, &self.token)?;
        if !removed {
            debug!(target: "lock", key = %self.key, "lock expired before release");
        }
        Ok(removed)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            // The TTL reclaims the key eventually.
            warn!(target: "lock", key = %self.key, error = %e, "failed to release lock on drop");
        }
    }
}
