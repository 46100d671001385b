//! Role and permission resolution over a cache-aside KV tier.
//!
//! Three cached mappings, each a string set with its own TTL:
//!
//! - `mental:user_role:{identity}` role ids of an identity
//! - `mental:role_permission:{role}` permission ids of a role
//! - `mental:api_permission:{permission}` operations granted, as `"{route}:{VERB}"`
//!
//! A cache read failure falls back to the relational store and a cache write failure
//! is logged and dropped. A relational store failure is returned to the caller and
//! never turned into an answer. Empty results are not written back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::storage::{Directory, KvBackend, StoreError, StoreResult};

use super::principal::Operation;

pub const USER_ROLE_PREFIX: &str = "mental:user_role:";
pub const ROLE_PERMISSION_PREFIX: &str = "mental:role_permission:";
pub const API_PERMISSION_PREFIX: &str = "mental:api_permission:";

pub struct PermissionResolver {
    kv: Arc<dyn KvBackend>,
    directory: Arc<dyn Directory>,
    role_ttl: Duration,
    operation_ttl: Duration,
}

fn to_members<T: Display>(items: impl IntoIterator<Item = T>) -> Vec<String> {
    items.into_iter().map(|v| v.to_string()).collect()
}

fn parse_ids<T: FromStr + Ord>(key: &str, members: BTreeSet<String>) -> BTreeSet<T> {
    let mut out = BTreeSet::new();
    for m in members {
        match m.parse::<T>() {
            Ok(v) => { out.insert(v); }
            Err(_) => warn!(target: "resolver", key, member = %m, "ignoring malformed cached id"),
        }
    }
    out
}

impl PermissionResolver {
    pub fn new(kv: Arc<dyn KvBackend>, directory: Arc<dyn Directory>, role_ttl: Duration, operation_ttl: Duration) -> Self {
        Self { kv, directory, role_ttl, operation_ttl }
    }

    pub fn from_config(kv: Arc<dyn KvBackend>, directory: Arc<dyn Directory>, cfg: &AuthConfig) -> Self {
        Self::new(kv, directory, cfg.role_cache_ttl(), cfg.operation_cache_ttl())
    }

    /// Cache-aside over one string set. An empty cached set is a miss.
    fn cached_set(&self, key: &str, ttl: Duration, load: impl FnOnce() -> StoreResult<Vec<String>>) -> StoreResult<BTreeSet<String>> {
        match self.kv.smembers(key) {
            Ok(hit) if !hit.is_empty() => return Ok(hit),
            Ok(_) => {}
            Err(e) => warn!(target: "resolver", key, error = %e, "cache read failed, using store"),
        }
        let loaded = load()?;
        if !loaded.is_empty() {
            if let Err(e) = self.kv.sadd_with_ttl(key, &loaded, ttl) {
                warn!(target: "resolver", key, error = %e, "cache write-back failed");
            } else {
                debug!(target: "resolver", key, members = loaded.len(), "cache populated");
            }
        }
        Ok(loaded.into_iter().collect())
    }

    /// Current role ids of an identity.
    pub fn roles_for(&self, identity_id: i64) -> StoreResult<BTreeSet<i64>> {
        let key = format!("{}{}", USER_ROLE_PREFIX, identity_id);
        let members = self.cached_set(&key, self.role_ttl, || Ok(to_members(self.directory.role_ids_for(identity_id)?)))?;
        Ok(parse_ids(&key, members))
    }

    pub fn permissions_for_role(&self, role_id: i64) -> StoreResult<BTreeSet<i64>> {
        let key = format!("{}{}", ROLE_PERMISSION_PREFIX, role_id);
        let members = self.cached_set(&key, self.role_ttl, || Ok(to_members(self.directory.permission_ids_for_role(role_id)?)))?;
        Ok(parse_ids(&key, members))
    }

    /// Union of permission ids over all given roles.
    pub fn permissions_for_roles(&self, role_ids: &[i64]) -> StoreResult<BTreeSet<i64>> {
        let mut out = BTreeSet::new();
        for r in role_ids {
            out.extend(self.permissions_for_role(*r)?);
        }
        Ok(out)
    }

    /// Cached member strings (`"{route}:{VERB}"`) granted by one permission.
    pub fn operations_for_permission(&self, permission_id: i64) -> StoreResult<BTreeSet<String>> {
        let key = format!("{}{}", API_PERMISSION_PREFIX, permission_id);
        self.cached_set(&key, self.operation_ttl, || {
            Ok(self.directory.operations_for_permission(permission_id)?.iter().map(Operation::cache_member).collect())
        })
    }

    /// Whether any permission of any role grants `op`. Stops at the first grant.
    pub fn has_access(&self, role_ids: &[i64], op: &Operation) -> StoreResult<bool> {
        let member = op.cache_member();
        for role in role_ids {
            for pid in self.permissions_for_role(*role)? {
                if self.operations_for_permission(pid)?.contains(&member) {
                    debug!(target: "resolver", role, permission = pid, op = %member, "access granted");
                    return Ok(true);
                }
            }
        }
        debug!(target: "resolver", roles = ?role_ids, op = %member, "no permission grants operation");
        Ok(false)
    }

    /// Warm the permission→operation tier from the full catalog. Returns the number
    /// of permissions written.
    pub fn preload_operations(&self) -> StoreResult<usize> {
        let mut grouped: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for (pid, op) in self.directory.all_operations()? {
            grouped.entry(pid).or_default().push(op.cache_member());
        }
        let mut written = 0;
        for (pid, members) in grouped {
            let key = format!("{}{}", API_PERMISSION_PREFIX, pid);
            match self.kv.sadd_with_ttl(&key, &members, self.operation_ttl) {
                Ok(()) => written += 1,
                Err(StoreError::Unavailable(e)) => {
                    warn!(target: "resolver", error = %e, "cache unavailable during preload");
                    break;
                }
                Err(e) => warn!(target: "resolver", key = %key, error = %e, "preload write failed"),
            }
        }
        info!(target: "resolver", permissions = written, "operation cache preloaded");
        Ok(written)
    }

    /// Drop the cached role set of an identity so the next `roles_for` reads the store.
    pub fn invalidate_roles(&self, identity_id: i64) -> StoreResult<()> {
        self.kv.delete(&format!("{}{}", USER_ROLE_PREFIX, identity_id))?;
        Ok(())
    }

    /// Drop the cached permission set of a role.
    pub fn invalidate_role_permissions(&self, role_id: i64) -> StoreResult<()> {
        self.kv.delete(&format!("{}{}", ROLE_PERMISSION_PREFIX, role_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryDirectory, MemoryKv};

    const HOUR: Duration = Duration::from_secs(3600);

    fn setup() -> (PermissionResolver, MemoryKv, MemoryDirectory, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let kv = MemoryKv::new(clock.clone());
        let dir = MemoryDirectory::new();
        let r = PermissionResolver::new(Arc::new(kv.clone()), Arc::new(dir.clone()), 12 * HOUR, 24 * HOUR);
        (r, kv, dir, clock)
    }

    #[test]
    fn second_check_is_served_from_cache() {
        let (r, kv, dir, _) = setup();
        dir.grant_permission(1, 7);
        dir.add_operation(7, Operation::new("/scl", "POST"));

        assert!(r.has_access(&[1], &Operation::new("/scl", "POST")).unwrap());
        assert_eq!(dir.queries(), 2);
        assert_eq!(kv.ttl("mental:role_permission:1"), Some(12 * HOUR));
        assert_eq!(kv.ttl("mental:api_permission:7"), Some(24 * HOUR));
        assert!(kv.sismember("mental:api_permission:7", "/scl:POST").unwrap());

        dir.reset_queries();
        assert!(r.has_access(&[1], &Operation::new("/scl", "post")).unwrap());
        assert_eq!(dir.queries(), 0);
    }

    #[test]
    fn missing_grant_is_false_and_empty_sets_are_not_cached() {
        let (r, kv, dir, _) = setup();
        dir.grant_permission(1, 7);
        dir.add_operation(7, Operation::new("/scl", "GET"));
        assert!(!r.has_access(&[1], &Operation::new("/scl", "POST")).unwrap());
        assert!(!r.has_access(&[9], &Operation::new("/scl", "GET")).unwrap());
        assert!(!kv.exists("mental:role_permission:9").unwrap());
        assert!(r.roles_for(42).unwrap().is_empty());
        assert!(!kv.exists("mental:user_role:42").unwrap());
    }

    #[test]
    fn roles_are_cached_until_invalidated() {
        let (r, _, dir, clock) = setup();
        dir.grant_role(42, 1);
        dir.grant_role(42, 2);
        assert_eq!(r.roles_for(42).unwrap(), BTreeSet::from([1, 2]));
        dir.revoke_role(42, 2);
        assert_eq!(r.roles_for(42).unwrap(), BTreeSet::from([1, 2]));
        r.invalidate_roles(42).unwrap();
        assert_eq!(r.roles_for(42).unwrap(), BTreeSet::from([1]));
        dir.grant_role(42, 2);
        clock.advance(12 * HOUR);
        assert_eq!(r.roles_for(42).unwrap(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn cache_outage_falls_back_to_store() {
        let (r, kv, dir, _) = setup();
        dir.grant_permission(1, 7);
        dir.add_operation(7, Operation::new("/scl", "POST"));
        kv.set_unavailable(true);
        assert!(r.has_access(&[1], &Operation::new("/scl", "POST")).unwrap());
        assert_eq!(dir.queries(), 2);
    }

    #[test]
    fn store_outage_on_miss_is_an_error() {
        let (r, _, dir, _) = setup();
        dir.set_unavailable(true);
        assert!(matches!(r.has_access(&[1], &Operation::new("/scl", "POST")), Err(StoreError::Unavailable(_))));
        assert!(r.roles_for(1).is_err());
    }

    #[test]
    fn preload_warms_operation_tier() {
        let (r, kv, dir, _) = setup();
        dir.add_operation(7, Operation::new("/scl", "POST"));
        dir.add_operation(7, Operation::new("/scl", "GET"));
        dir.add_operation(8, Operation::new("/user", "GET"));
        assert_eq!(r.preload_operations().unwrap(), 2);
        assert_eq!(kv.smembers("mental:api_permission:7").unwrap().len(), 2);
        dir.grant_permission(1, 8);
        dir.reset_queries();
        assert!(r.has_access(&[1], &Operation::new("/user", "GET")).unwrap());
        // only the role tier missed
        assert_eq!(dir.queries(), 1);
    }

    #[test]
    fn permission_without_operations_is_requeried_each_time() {
        let (r, kv, dir, _) = setup();
        dir.grant_permission(1, 7);
        assert!(!r.has_access(&[1], &Operation::new("/scl", "GET")).unwrap());
        assert!(!kv.exists("mental:api_permission:7").unwrap());
        // role tier is cached, the empty operation tier is not
        dir.reset_queries();
        assert!(!r.has_access(&[1], &Operation::new("/scl", "GET")).unwrap());
        assert_eq!(dir.queries(), 1);
        assert!(!kv.exists("mental:api_permission:7").unwrap());
    }

    #[test]
    fn role_permissions_reload_after_invalidation() {
        let (r, _, dir, _) = setup();
        dir.grant_permission(1, 7);
        assert_eq!(r.permissions_for_role(1).unwrap(), BTreeSet::from([7]));
        dir.grant_permission(1, 8);
        assert_eq!(r.permissions_for_role(1).unwrap(), BTreeSet::from([7]));
        r.invalidate_role_permissions(1).unwrap();
        assert_eq!(r.permissions_for_role(1).unwrap(), BTreeSet::from([7, 8]));
    }

    /// Delegates to `MemoryKv` but cannot arm a TTL, exercising the trait's default
    /// `sadd_with_ttl`.
    struct NoExpireKv(MemoryKv);

    impl KvBackend for NoExpireKv {
        fn get(&self, key: &str) -> StoreResult<Option<String>> { self.0.get(key) }
        fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> { self.0.set(key, value, ttl) }
        fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> { self.0.set_nx(key, value, ttl) }
        fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> { self.0.delete_if_eq(key, expected) }
        fn delete(&self, key: &str) -> StoreResult<bool> { self.0.delete(key) }
        fn exists(&self, key: &str) -> StoreResult<bool> { self.0.exists(key) }
        fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<bool> {
            Err(StoreError::Unavailable("expire timed out".into()))
        }
        fn sadd(&self, key: &str, members: &[String]) -> StoreResult<usize> { self.0.sadd(key, members) }
        fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> { self.0.smembers(key) }
        fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> { self.0.sismember(key, member) }
        fn srem(&self, key: &str, members: &[String]) -> StoreResult<usize> { self.0.srem(key, members) }
    }

    #[test]
    fn failed_expire_leaves_no_persistent_entry() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let kv = MemoryKv::new(clock.clone());
        let dir = MemoryDirectory::new();
        dir.grant_permission(1, 7);
        dir.add_operation(7, Operation::new("/scl", "POST"));
        let r = PermissionResolver::new(Arc::new(NoExpireKv(kv.clone())), Arc::new(dir.clone()), 12 * HOUR, 24 * HOUR);

        assert!(r.has_access(&[1], &Operation::new("/scl", "POST")).unwrap());
        assert!(!kv.exists("mental:role_permission:1").unwrap());
        assert!(!kv.exists("mental:api_permission:7").unwrap());

        // both tiers go back to the store on the next check
        dir.reset_queries();
        assert!(r.has_access(&[1], &Operation::new("/scl", "POST")).unwrap());
        assert_eq!(dir.queries(), 2);
        clock.advance(365 * 24 * HOUR);
        assert!(!kv.exists("mental:api_permission:7").unwrap());

        dir.add_operation(8, Operation::new("/user", "GET"));
        assert_eq!(r.preload_operations().unwrap(), 0);
        assert!(!kv.exists("mental:api_permission:8").unwrap());
    }

    #[test]
    fn permissions_union_over_roles() {
        let (r, _, dir, _) = setup();
        dir.grant_permission(1, 7);
        dir.grant_permission(2, 8);
        dir.grant_permission(2, 7);
        assert_eq!(r.permissions_for_roles(&[1, 2]).unwrap(), BTreeSet::from([7, 8]));
    }
}
