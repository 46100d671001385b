//! Denylist of revoked token ids. Each record lives exactly as long as the token it
//! revokes had left to live, so the list never outgrows the set of live tokens.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::storage::{KvBackend, StoreResult};

use super::token::Claims;

pub const BLACKLIST_PREFIX: &str = "mental:blacklist:";

#[derive(Clone)]
pub struct RevocationStore {
    kv: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
}

impl RevocationStore {
    pub fn new(kv: Arc<dyn KvBackend>, clock: Arc<dyn Clock>) -> Self { Self { kv, clock } }

    fn key(jti: &str) -> String { format!("{}{}", BLACKLIST_PREFIX, jti) }

    /// Record `jti` as revoked for `remaining`. A zero duration writes nothing and
    /// returns false, since the token is already unusable.
    pub fn revoke(&self, jti: &str, remaining: Duration) -> StoreResult<bool> {
        if remaining.is_zero() {
            debug!(target: "revocation", jti, "token already expired, nothing to revoke");
            return Ok(false);
        }
        self.kv.set(&Self::key(jti), "1", Some(remaining))?;
        info!(target: "revocation", jti, ttl_ms = remaining.as_millis() as u64, "token revoked");
        Ok(true)
    }

    /// Revoke a validated token for whatever lifetime it has left.
    pub fn revoke_claims(&self, claims: &Claims) -> StoreResult<bool> {
        let remaining_ms = claims.expires_at_ms() - self.clock.now_millis();
        let remaining = Duration::from_millis(remaining_ms.max(0) as u64);
        self.revoke(&claims.jti, remaining)
    }

    /// Store failures are returned, never read as "not revoked".
    pub fn is_revoked(&self, jti: &str) -> StoreResult<bool> {
        Ok(self.kv.get(&Self::key(jti))?.is_some())
    }
}
