use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::security::CredentialHasher;
use crate::storage::{Directory, StoreError};

use super::idgen::IdGenerator;
use super::lock::DistributedLock;
use super::principal::{Identity, Profile, ROLE_ADMIN, ROLE_USER};
use super::revocation::RevocationStore;
use super::token::{TokenKind, TokenService};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub profile: Profile,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role_id: i64,
}

/// Empty strings leave the field as it is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse>;
}

fn invalid_credentials() -> AppError { AppError::auth("invalid_credentials", "account or password is incorrect") }

fn require(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::user("missing_field".to_string(), format!("{} must not be empty", field)));
    }
    Ok(())
}

fn non_empty(s: &str) -> Option<&str> { if s.is_empty() { None } else { Some(s) } }

/// Account lifecycle: registration, login, logout, refresh and profile edits.
pub struct AccountService {
    directory: Arc<dyn Directory>,
    hasher: Arc<dyn CredentialHasher>,
    tokens: Arc<TokenService>,
    revocations: RevocationStore,
    locks: DistributedLock,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
    register_lock_ttl: Duration,
}

impl AccountService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: Arc<dyn Directory>,
        hasher: Arc<dyn CredentialHasher>,
        tokens: Arc<TokenService>,
        revocations: RevocationStore,
        locks: DistributedLock,
        ids: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
        register_lock_ttl: Duration,
    ) -> Self {
        Self { directory, hasher, tokens, revocations, locks, ids, clock, register_lock_ttl }
    }

    /// Create an identity and its role assignment. Concurrent attempts on the same
    /// account fail fast on the lock; the store's uniqueness check catches the rest.
    pub fn register(&self, req: &RegisterRequest) -> AppResult<Profile> {
        require("account", &req.account)?;
        require("password", &req.password)?;
        if req.role_id != ROLE_USER && req.role_id != ROLE_ADMIN {
            return Err(AppError::user("invalid_role".to_string(), format!("role id {} is not assignable", req.role_id)));
        }

        let lock = self.locks.acquire_registration(&req.account, self.register_lock_ttl)?;

        if self.directory.find_by_account(&req.account)?.is_some() {
            return Err(StoreError::Duplicate(req.account.clone()).into());
        }
        let digest = self.hasher.hash(&req.password)?;
        let id = self.ids.generate()?;
        let now = self.clock.now_millis();
        let identity = Identity {
            id,
            account: req.account.clone(),
            password_digest: digest,
            created_at_ms: now,
            updated_at_ms: now,
            ..Default::default()
        };
        let created = self.directory.create_with_role(identity, req.role_id)?;
        if let Err(e) = lock.release() {
            warn!(target: "account", account = %req.account, error = %e, "registration lock release failed");
        }
        info!(target: "account", id = created.id, account = %created.account, role = req.role_id, "account registered");
        Ok(Profile::from(&created))
    }

    /// Revoke the presented access token for the rest of its lifetime.
    pub fn logout(&self, access_token: &str) -> AppResult<()> {
        let claims = self.tokens.validate(access_token, TokenKind::Access)?;
        self.revocations.revoke_claims(&claims)?;
        info!(target: "account", id = claims.id, jti = %claims.jti, "logged out");
        Ok(())
    }

    pub fn refresh(&self, refresh_token: &str) -> AppResult<String> {
        Ok(self.tokens.refresh(refresh_token)?)
    }

    pub fn profile(&self, id: i64) -> AppResult<Profile> {
        match self.directory.find_by_id(id)? {
            Some(i) => Ok(Profile::from(&i)),
            None => Err(AppError::not_found("user_not_found".to_string(), format!("user {} not found", id))),
        }
    }

    pub fn update_profile(&self, id: i64, req: &UpdateProfileRequest) -> AppResult<Profile> {
        self.directory.update_profile(id, non_empty(&req.username), non_empty(&req.email), self.clock.now_millis())?;
        self.profile(id)
    }

    /// Requires the current password. Tokens already issued stay valid.
    pub fn change_password(&self, id: i64, req: &ChangePasswordRequest) -> AppResult<()> {
        require("old_password", &req.old_password)?;
        require("new_password", &req.new_password)?;
        let identity = self
            .directory
            .find_by_id(id)?
            .ok_or_else(|| AppError::not_found("user_not_found".to_string(), format!("user {} not found", id)))?;
        if !self.hasher.verify(&identity.password_digest, &req.old_password) {
            return Err(invalid_credentials());
        }
        let digest = self.hasher.hash(&req.new_password)?;
        self.directory.update_credential(id, &digest, self.clock.now_millis())?;
        info!(target: "account", id, "password changed");
        Ok(())
    }
}

impl AuthProvider for AccountService {
    /// Unknown account and wrong password are reported identically.
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        require("account", &req.account)?;
        require("password", &req.password)?;
        let Some(identity) = self.directory.find_by_account(&req.account)? else {
            info!(target: "account", account = %req.account, "login failed");
            return Err(invalid_credentials());
        };
        if !self.hasher.verify(&identity.password_digest, &req.password) {
            info!(target: "account", account = %req.account, "login failed");
            return Err(invalid_credentials());
        }
        let pair = self.tokens.issue_pair(&identity)?;
        info!(target: "account", id = identity.id, "login succeeded");
        Ok(LoginResponse { profile: Profile::from(&identity), access_token: pair.access_token, refresh_token: pair.refresh_token })
    }
}
