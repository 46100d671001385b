//! Process-wide authentication settings.
//! Built once at startup (`AuthConfig::load`) and handed to the components by reference;
//! nothing in the crate reads configuration from ambient global state.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "MENTAL_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for access tokens.
    pub access_secret: String,
    /// HMAC secret for refresh tokens. Must differ from `access_secret`.
    pub refresh_secret: String,
    pub access_ttl_ms: u64,
    pub refresh_ttl_ms: u64,
    /// Lifetime of the per-account registration lock.
    pub register_lock_ttl_ms: u64,
    /// user→role and role→permission cache lifetime.
    pub role_cache_ttl_secs: u64,
    /// permission→operation cache lifetime.
    pub operation_cache_ttl_secs: u64,
    /// Largest backwards clock jump the ID generator waits out instead of failing.
    pub clock_skew_tolerance_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            access_ttl_ms: 15 * 60 * 1000,
            refresh_ttl_ms: 7 * 24 * 3600 * 1000,
            register_lock_ttl_ms: 5_000,
            role_cache_ttl_secs: 12 * 3600,
            operation_cache_ttl_secs: 24 * 3600,
            clock_skew_tolerance_ms: 5,
        }
    }
}

fn env_key(name: &str) -> String { format!("{}{}", ENV_PREFIX, name) }

fn parse_u64_env(name: &str) -> Result<Option<u64>> {
    match env::var(env_key(name)) {
        Ok(v) => v.trim().parse::<u64>().map(Some).with_context(|| format!("{} must be an unsigned integer", env_key(name))),
        Err(_) => Ok(None),
    }
}

impl AuthConfig {
    /// Convenience for tests and tooling: defaults plus the two secrets.
    pub fn with_secrets(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self { access_secret: access.into(), refresh_secret: refresh.into(), ..Default::default() }
    }

    /// Load from the JSON file named by `MENTAL_CONFIG` (if any), then apply
    /// `MENTAL_*` environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var(env_key("CONFIG")) {
            Ok(path) => {
                let bytes = std::fs::read(&path).with_context(|| format!("reading auth config {}", path))?;
                serde_json::from_slice::<AuthConfig>(&bytes).with_context(|| format!("parsing auth config {}", path))?
            }
            Err(_) => AuthConfig::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(s) = env::var(env_key("ACCESS_SECRET")) { self.access_secret = s; }
        if let Ok(s) = env::var(env_key("REFRESH_SECRET")) { self.refresh_secret = s; }
        if let Some(v) = parse_u64_env("ACCESS_TTL_MS")? { self.access_ttl_ms = v; }
        if let Some(v) = parse_u64_env("REFRESH_TTL_MS")? { self.refresh_ttl_ms = v; }
        if let Some(v) = parse_u64_env("REGISTER_LOCK_TTL_MS")? { self.register_lock_ttl_ms = v; }
        if let Some(v) = parse_u64_env("ROLE_CACHE_TTL_SECS")? { self.role_cache_ttl_secs = v; }
        if let Some(v) = parse_u64_env("OPERATION_CACHE_TTL_SECS")? { self.operation_cache_ttl_secs = v; }
        if let Some(v) = parse_u64_env("CLOCK_SKEW_TOLERANCE_MS")? { self.clock_skew_tolerance_ms = v; }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.access_secret.is_empty() { return Err(anyhow!("access_secret must not be empty")); }
        if self.refresh_secret.is_empty() { return Err(anyhow!("refresh_secret must not be empty")); }
        if self.access_secret == self.refresh_secret {
            return Err(anyhow!("access and refresh tokens must be signed with distinct secrets"));
        }
        if self.access_ttl_ms == 0 || self.refresh_ttl_ms == 0 { return Err(anyhow!("token TTLs must be positive")); }
        if self.register_lock_ttl_ms == 0 { return Err(anyhow!("register_lock_ttl_ms must be positive")); }
        if self.role_cache_ttl_secs == 0 || self.operation_cache_ttl_secs == 0 {
            return Err(anyhow!("cache TTLs must be positive"));
        }
        Ok(())
    }

    pub fn access_ttl(&self) -> Duration { Duration::from_millis(self.access_ttl_ms) }
    pub fn refresh_ttl(&self) -> Duration { Duration::from_millis(self.refresh_ttl_ms) }
    pub fn register_lock_ttl(&self) -> Duration { Duration::from_millis(self.register_lock_ttl_ms) }
    pub fn role_cache_ttl(&self) -> Duration { Duration::from_secs(self.role_cache_ttl_secs) }
    pub fn operation_cache_ttl(&self) -> Duration { Duration::from_secs(self.operation_cache_ttl_secs) }
}
