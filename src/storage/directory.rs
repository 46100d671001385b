use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::identity::{Identity, Operation};

use super::{Directory, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    identities: HashMap<i64, Identity>,
    /// account -> id (unique index)
    by_account: HashMap<String, i64>,
    user_roles: HashMap<i64, BTreeSet<i64>>,
    role_permissions: HashMap<i64, BTreeSet<i64>>,
    /// permission -> operations it grants
    permission_apis: BTreeMap<i64, BTreeSet<Operation>>,
}

/// In-memory relational store. A single `RwLock` write guard stands in for a
/// transaction, so `create_with_role` checks the unique index and inserts both rows
/// atomically.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    tables: Arc<RwLock<Tables>>,
    queries: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryDirectory {
    pub fn new() -> Self { Self::default() }

    /// Number of trait calls served so far.
    pub fn queries(&self) -> usize { self.queries.load(Ordering::SeqCst) }
    pub fn reset_queries(&self) { self.queries.store(0, Ordering::SeqCst) }
    pub fn set_unavailable(&self, down: bool) { self.unavailable.store(down, Ordering::SeqCst) }

    fn begin(&self) -> StoreResult<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("relational store unreachable".into()));
        }
        Ok(())
    }

    // --- administrative mutations (not part of the Directory contract) ---

    pub fn grant_role(&self, identity_id: i64, role_id: i64) {
        self.tables.write().user_roles.entry(identity_id).or_default().insert(role_id);
    }

    pub fn revoke_role(&self, identity_id: i64, role_id: i64) {
        if let Some(set) = self.tables.write().user_roles.get_mut(&identity_id) { set.remove(&role_id); }
    }

    pub fn grant_permission(&self, role_id: i64, permission_id: i64) {
        self.tables.write().role_permissions.entry(role_id).or_default().insert(permission_id);
    }

    pub fn add_operation(&self, permission_id: i64, op: Operation) {
        self.tables.write().permission_apis.entry(permission_id).or_default().insert(op);
    }

    /// Insert an identity directly, bypassing registration. Replaces any existing row with the same id.
    pub fn insert_identity(&self, identity: Identity) {
        let mut t = self.tables.write();
        t.by_account.insert(identity.account.clone(), identity.id);
        t.identities.insert(identity.id, identity);
    }

    pub fn identity_count(&self) -> usize { self.tables.read().identities.len() }
}

impl Directory for MemoryDirectory {
    fn find_by_account(&self, account: &str) -> StoreResult<Option<Identity>> {
        self.begin()?;
        let t = self.tables.read();
        Ok(t.by_account.get(account).and_then(|id| t.identities.get(id)).cloned())
    }

    fn find_by_id(&self, id: i64) -> StoreResult<Option<Identity>> {
        self.begin()?;
        Ok(self.tables.read().identities.get(&id).cloned())
    }

    fn role_ids_for(&self, identity_id: i64) -> StoreResult<BTreeSet<i64>> {
        self.begin()?;
        Ok(self.tables.read().user_roles.get(&identity_id).cloned().unwrap_or_default())
    }

    fn permission_ids_for_role(&self, role_id: i64) -> StoreResult<BTreeSet<i64>> {
        self.begin()?;
        Ok(self.tables.read().role_permissions.get(&role_id).cloned().unwrap_or_default())
    }

    fn operations_for_permission(&self, permission_id: i64) -> StoreResult<BTreeSet<Operation>> {
        self.begin()?;
        Ok(self.tables.read().permission_apis.get(&permission_id).cloned().unwrap_or_default())
    }

    fn all_operations(&self) -> StoreResult<Vec<(i64, Operation)>> {
        self.begin()?;
        let t = self.tables.read();
        Ok(t.permission_apis.iter().flat_map(|(p, ops)| ops.iter().map(move |o| (*p, o.clone()))).collect())
    }

    fn create_with_role(&self, identity: Identity, role_id: i64) -> StoreResult<Identity> {
        self.begin()?;
        let mut t = self.tables.write();
        if t.by_account.contains_key(&identity.account) {
            return Err(StoreError::Duplicate(identity.account));
        }
        if t.identities.contains_key(&identity.id) {
            return Err(StoreError::Duplicate(format!("id {}", identity.id)));
        }
        t.by_account.insert(identity.account.clone(), identity.id);
        t.user_roles.entry(identity.id).or_default().insert(role_id);
        t.identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    fn update_profile(&self, id: i64, username: Option<&str>, email: Option<&str>, now_ms: i64) -> StoreResult<()> {
        self.begin()?;
        let mut t = self.tables.write();
        let ident = t.identities.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("identity {}", id)))?;
        if let Some(u) = username { ident.username = u.to_string(); }
        if let Some(e) = email { ident.email = e.to_string(); }
        ident.updated_at_ms = now_ms;
        Ok(())
    }

    fn update_credential(&self, id: i64, digest: &str, now_ms: i64) -> StoreResult<()> {
        self.begin()?;
        let mut t = self.tables.write();
        let ident = t.identities.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("identity {}", id)))?;
        ident.password_digest = digest.to_string();
        ident.updated_at_ms = now_ms;
        Ok(())
    }
}
