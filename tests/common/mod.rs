#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;

use mental::clock::{Clock, ManualClock};
use mental::config::AuthConfig;
use mental::identity::{AuthCore, IdGenerator, LoginRequest, LoginResponse, AuthProvider, RegisterRequest};
use mental::security::CredentialHasher;
use mental::server::{seed_default_catalog, AppState};
use mental::storage::{MemoryDirectory, MemoryKv};

pub const T0: i64 = 1_700_000_000_000;

/// Reversible stand-in so tests don't pay for Argon2.
pub struct PlainHasher;

impl CredentialHasher for PlainHasher {
    fn hash(&self, plaintext: &str) -> Result<String> { Ok(format!("plain:{}", plaintext)) }
    fn verify(&self, digest: &str, plaintext: &str) -> bool { digest.strip_prefix("plain:") == Some(plaintext) }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub kv: MemoryKv,
    pub dir: MemoryDirectory,
    pub core: AuthCore,
    pub cfg: AuthConfig,
}

impl Harness {
    pub fn new() -> Result<Self> {
        let clock = Arc::new(ManualClock::new(T0));
        let kv = MemoryKv::new(clock.clone());
        let dir = MemoryDirectory::new();
        seed_default_catalog(&dir);
        let cfg = AuthConfig::with_secrets("test-access-secret", "test-refresh-secret");
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let ids = Arc::new(IdGenerator::with_node(dyn_clock.clone(), 1, 1, cfg.clock_skew_tolerance_ms)?);
        let core = AuthCore::build_with_ids(&cfg, Arc::new(kv.clone()), Arc::new(dir.clone()), Arc::new(PlainHasher), dyn_clock, ids)?;
        Ok(Self { clock, kv, dir, core, cfg })
    }

    pub fn state(&self) -> AppState { AppState { core: self.core.clone() } }

    pub fn register(&self, account: &str, password: &str, role_id: i64) -> Result<i64> {
        self.core.accounts.register(&RegisterRequest { account: account.into(), password: password.into(), role_id })?;
        let login = self.login(account, password)?;
        let claims = self.core.tokens.validate(&login.access_token, mental::identity::TokenKind::Access)?;
        Ok(claims.id)
    }

    pub fn login(&self, account: &str, password: &str) -> Result<LoginResponse> {
        Ok(self.core.accounts.login(&LoginRequest { account: account.into(), password: password.into() })?)
    }
}
