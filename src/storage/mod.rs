//!
//! mental storage collaborators
//! ----------------------------
//! The authorization core talks to two external stores through narrow traits:
//!
//! - `KvBackend`: the shared key-value store (Redis in production) used for the
//!   permission caches, the revocation denylist and the registration locks.
//! - `Directory`: the relational store holding identities, role assignments and
//!   the permission/operation catalog.
//!
//! In-memory implementations (`MemoryKv`, `MemoryDirectory`) back the server binary
//! and the tests. Both expose access counters and fault injection so cache hits and
//! fail-closed behaviour can be asserted directly.

use std::collections::BTreeSet;
use std::time::Duration;

pub mod kv;
pub mod directory;

pub use kv::MemoryKv;
pub use directory::MemoryDirectory;

use crate::identity::{Identity, Operation};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("account '{0}' already exists")]
    Duplicate(String),
    #[error("{0} not found")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared key-value store. String values and string sets, each key with an optional TTL.
/// Calls are expected to carry their own bounded timeouts (network clients) and to
/// report timeouts as `StoreError::Unavailable`.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    /// Upsert a string value; `None` keeps it until deleted.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;
    /// Set only if the key is absent. Returns true when this call created the key.
    fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;
    /// Delete the key only if it currently holds `expected`.
    fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool>;
    fn delete(&self, key: &str) -> StoreResult<bool>;
    fn exists(&self, key: &str) -> StoreResult<bool>;
    /// Returns false if the key does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;
    fn sadd(&self, key: &str, members: &[String]) -> StoreResult<usize>;
    fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>>;
    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;
    fn srem(&self, key: &str, members: &[String]) -> StoreResult<usize>;

    /// Cache-aside write-back: add members and (re)arm the TTL. Idempotent, so
    /// concurrent populators computing the same set converge on the same entry.
    /// A set whose TTL could not be armed is deleted, so no entry outlives its TTL.
    fn sadd_with_ttl(&self, key: &str, members: &[String], ttl: Duration) -> StoreResult<()> {
        self.sadd(key, members)?;
        if let Err(e) = self.expire(key, ttl) {
            let _ = self.delete(key);
            return Err(e);
        }
        Ok(())
    }
}

/// Relational store collaborator.
pub trait Directory: Send + Sync {
    fn find_by_account(&self, account: &str) -> StoreResult<Option<Identity>>;
    fn find_by_id(&self, id: i64) -> StoreResult<Option<Identity>>;
    fn role_ids_for(&self, identity_id: i64) -> StoreResult<BTreeSet<i64>>;
    fn permission_ids_for_role(&self, role_id: i64) -> StoreResult<BTreeSet<i64>>;
    fn operations_for_permission(&self, permission_id: i64) -> StoreResult<BTreeSet<Operation>>;
    /// Every (permission, operation) row, used to warm the operation cache.
    fn all_operations(&self) -> StoreResult<Vec<(i64, Operation)>>;
    /// Transactionally insert the identity and its role assignment. The account
    /// uniqueness check happens inside the transaction; a clash is `Duplicate`.
    fn create_with_role(&self, identity: Identity, role_id: i64) -> StoreResult<Identity>;
    /// `None` leaves a field unchanged. `now_ms` stamps `updated_at_ms`.
    fn update_profile(&self, id: i64, username: Option<&str>, email: Option<&str>, now_ms: i64) -> StoreResult<()>;
    fn update_credential(&self, id: i64, digest: &str, now_ms: i64) -> StoreResult<()>;
}
