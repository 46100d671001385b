use std::sync::Arc;

use anyhow::Result;

use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::security::CredentialHasher;
use crate::storage::{Directory, KvBackend};

use super::gate::AuthorizationGate;
use super::idgen::IdGenerator;
use super::lock::DistributedLock;
use super::provider::AccountService;
use super::resolver::PermissionResolver;
use super::revocation::RevocationStore;
use super::token::TokenService;

/// The wired-up authorization core: one of each component sharing the same stores,
/// configuration and clock.
#[derive(Clone)]
pub struct AuthCore {
    pub accounts: Arc<AccountService>,
    pub gate: AuthorizationGate,
    pub tokens: Arc<TokenService>,
    pub resolver: Arc<PermissionResolver>,
    pub revocations: RevocationStore,
}

impl AuthCore {
    /// Validates `cfg` and derives the generator's node ids from the host.
    pub fn build(
        cfg: &AuthConfig,
        kv: Arc<dyn KvBackend>,
        directory: Arc<dyn Directory>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ids = Arc::new(IdGenerator::from_host(clock.clone(), cfg.clock_skew_tolerance_ms));
        Self::build_with_ids(cfg, kv, directory, hasher, clock, ids)
    }

    pub fn build_with_ids(
        cfg: &AuthConfig,
        kv: Arc<dyn KvBackend>,
        directory: Arc<dyn Directory>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
        ids: Arc<IdGenerator>,
    ) -> Result<Self> {
        cfg.validate()?;
        let resolver = Arc::new(PermissionResolver::from_config(kv.clone(), directory.clone(), cfg));
        let tokens = Arc::new(TokenService::new(cfg, clock.clone(), resolver.clone()));
        let revocations = RevocationStore::new(kv.clone(), clock.clone());
        let gate = AuthorizationGate::new(tokens.clone(), revocations.clone(), resolver.clone());
        let accounts = Arc::new(AccountService::new(
            directory,
            hasher,
            tokens.clone(),
            revocations.clone(),
            DistributedLock::new(kv),
            ids,
            clock,
            cfg.register_lock_ttl(),
        ));
        Ok(Self { accounts, gate, tokens, resolver, revocations })
    }
}
