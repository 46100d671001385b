//! Request-time authorization decision.
//!
//! Stages run in a fixed order and the first failure ends the check:
//! token present, token valid, not revoked, roles taken from the token, operation
//! granted. Store failures at any stage deny.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::StoreError;

use super::principal::Operation;
use super::request_context::RequestContext;
use super::revocation::RevocationStore;
use super::resolver::PermissionResolver;
use super::token::{TokenKind, TokenService};

/// Last stage a request reached before it was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    NoToken,
    TokenPresent,
    Validated,
    NotRevoked,
    RolesResolved,
    AccessChecked,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("no credential presented")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token has been revoked")]
    Revoked,
    #[error("revocation state unavailable: {0}")]
    RevocationUnavailable(StoreError),
    #[error("permission state unavailable: {0}")]
    PermissionsUnavailable(StoreError),
    #[error("permission denied")]
    Forbidden,
}

impl Rejection {
    pub fn stage(&self) -> GateStage {
        match self {
            Rejection::MissingToken => GateStage::NoToken,
            Rejection::InvalidToken => GateStage::TokenPresent,
            Rejection::Revoked | Rejection::RevocationUnavailable(_) => GateStage::Validated,
            Rejection::PermissionsUnavailable(_) | Rejection::Forbidden => GateStage::RolesResolved,
        }
    }
}

/// Accepts a bare token or `Bearer <token>`. Blank values count as absent.
pub fn extract_token(header: Option<&str>) -> Option<&str> {
    let raw = header?.trim();
    let token = match raw.strip_prefix("Bearer") {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
        _ => raw,
    };
    if token.is_empty() { None } else { Some(token) }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    tokens: Arc<TokenService>,
    revocations: RevocationStore,
    resolver: Arc<PermissionResolver>,
}

impl AuthorizationGate {
    pub fn new(tokens: Arc<TokenService>, revocations: RevocationStore, resolver: Arc<PermissionResolver>) -> Self {
        Self { tokens, revocations, resolver }
    }

    /// Decide whether the bearer of `authorization` may perform `op`.
    pub fn authorize(&self, authorization: Option<&str>, op: &Operation) -> Result<RequestContext, Rejection> {
        let token = extract_token(authorization).ok_or(Rejection::MissingToken)?;

        let claims = self.tokens.validate(token, TokenKind::Access).map_err(|_| Rejection::InvalidToken)?;

        match self.revocations.is_revoked(&claims.jti) {
            Ok(false) => {}
            Ok(true) => {
                debug!(target: "gate", jti = %claims.jti, "revoked token presented");
                return Err(Rejection::Revoked);
            }
            Err(e) => {
                warn!(target: "gate", jti = %claims.jti, error = %e, "revocation check failed, denying");
                return Err(Rejection::RevocationUnavailable(e));
            }
        }

        match self.resolver.has_access(&claims.roles, op) {
            Ok(true) => {}
            Ok(false) => {
                debug!(target: "gate", id = claims.id, route = %op.route, verb = %op.verb, "operation not granted");
                return Err(Rejection::Forbidden);
            }
            Err(e) => {
                warn!(target: "gate", id = claims.id, error = %e, "permission lookup failed, denying");
                return Err(Rejection::PermissionsUnavailable(e));
            }
        }

        Ok(RequestContext { identity_id: claims.id, account: claims.account, roles: claims.roles, jti: claims.jti })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_optional() {
        assert_eq!(extract_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_token(Some("abc")), Some("abc"));
        assert_eq!(extract_token(Some("Bearer   ")), None);
        assert_eq!(extract_token(Some("")), None);
        assert_eq!(extract_token(None), None);
    }

    #[test]
    fn stages_follow_check_order() {
        assert_eq!(Rejection::MissingToken.stage(), GateStage::NoToken);
        assert_eq!(Rejection::InvalidToken.stage(), GateStage::TokenPresent);
        assert_eq!(Rejection::Revoked.stage(), GateStage::Validated);
        assert_eq!(Rejection::Forbidden.stage(), GateStage::RolesResolved);
    }
}
