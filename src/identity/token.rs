//! Signed access/refresh credentials (HS256 JWT).
//!
//! Each kind has its own secret and lifetime, and the kind is also embedded in the
//! claims, so a token of one kind never validates as the other. Expiry is checked
//! against the injected clock rather than by the JWT library.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::storage::StoreError;

use super::principal::Identity;
use super::resolver::PermissionResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self { TokenKind::Access => "access", TokenKind::Refresh => "refresh" }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub account: String,
    #[serde(default)]
    pub username: String,
    /// Role ids at issuance. Later role changes are not reflected until a new token is issued.
    pub roles: Vec<i64>,
    /// Issued at, seconds since the Unix epoch.
    pub iat: u64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
    pub jti: String,
    pub kind: TokenKind,
}

impl Claims {
    pub fn expires_at_ms(&self) -> i64 { (self.exp as i64).saturating_mul(1000) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Bad signature, wrong kind, expired or malformed. Deliberately a single variant.
    #[error("invalid token")]
    Invalid,
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("could not resolve roles: {0}")]
    Roles(#[from] StoreError),
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl KeyPair {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self { encoding: EncodingKey::from_secret(secret.as_bytes()), decoding: DecodingKey::from_secret(secret.as_bytes()), ttl }
    }
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenService {
    access: KeyPair,
    refresh: KeyPair,
    validation: Validation,
    clock: Arc<dyn Clock>,
    resolver: Arc<PermissionResolver>,
}

impl TokenService {
    pub fn new(cfg: &AuthConfig, clock: Arc<dyn Clock>, resolver: Arc<PermissionResolver>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp must be present; its value is compared against `clock` in `validate`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            access: KeyPair::new(&cfg.access_secret, cfg.access_ttl()),
            refresh: KeyPair::new(&cfg.refresh_secret, cfg.refresh_ttl()),
            validation,
            clock,
            resolver,
        }
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind { TokenKind::Access => &self.access, TokenKind::Refresh => &self.refresh }
    }

    /// Issue a token of `kind`, snapshotting the identity's current roles.
    pub fn issue(&self, identity: &Identity, kind: TokenKind) -> Result<String, TokenError> {
        let roles: Vec<i64> = self.resolver.roles_for(identity.id)?.into_iter().collect();
        self.issue_with_roles(identity, roles, kind)
    }

    pub fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, TokenError> {
        let roles: Vec<i64> = self.resolver.roles_for(identity.id)?.into_iter().collect();
        Ok(TokenPair {
            access_token: self.issue_with_roles(identity, roles.clone(), TokenKind::Access)?,
            refresh_token: self.issue_with_roles(identity, roles, TokenKind::Refresh)?,
        })
    }

    fn issue_with_roles(&self, identity: &Identity, roles: Vec<i64>, kind: TokenKind) -> Result<String, TokenError> {
        let keys = self.keys(kind);
        let now_ms = self.clock.now_millis().max(0) as u64;
        let exp_ms = now_ms + keys.ttl.as_millis() as u64;
        let claims = Claims {
            id: identity.id,
            account: identity.account.clone(),
            username: identity.username.clone(),
            roles,
            iat: now_ms / 1000,
            exp: exp_ms / 1000,
            jti: uuid::Uuid::new_v4().to_string(),
            kind,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding).map_err(|e| TokenError::Signing(e.to_string()))?;
        debug!(target: "token", id = identity.id, jti = %claims.jti, kind = kind.as_str(), "token issued");
        Ok(token)
    }

    /// Verify signature, kind and expiry. Every failure collapses to `Invalid`.
    pub fn validate(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.keys(kind).decoding, &self.validation).map_err(|e| {
            debug!(target: "token", kind = kind.as_str(), error = %e, "token rejected");
            TokenError::Invalid
        })?;
        let claims = data.claims;
        if claims.kind != kind {
            debug!(target: "token", jti = %claims.jti, "token kind mismatch");
            return Err(TokenError::Invalid);
        }
        if self.clock.now_millis() >= claims.expires_at_ms() {
            debug!(target: "token", jti = %claims.jti, "token expired");
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new access token. Roles are re-resolved, so
    /// role changes made since login take effect here.
    pub fn refresh(&self, refresh_token: &str) -> Result<String, TokenError> {
        let claims = self.validate(refresh_token, TokenKind::Refresh)?;
        let identity = Identity { id: claims.id, account: claims.account, username: claims.username, ..Default::default() };
        let token = self.issue(&identity, TokenKind::Access)?;
        info!(target: "token", id = identity.id, "access token refreshed");
        Ok(token)
    }
}
