//! Identity, credentials and request-time authorization.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod idgen;
mod lock;
mod token;
mod revocation;
mod resolver;
mod gate;
mod request_context;
mod provider;
mod auth_core;

pub use principal::{Identity, Operation, Profile, ROLE_ADMIN, ROLE_USER};
pub use idgen::{IdError, IdGenerator, IdParts, EPOCH_MS, MAX_DATACENTER_ID, MAX_WORKER_ID};
pub use lock::{DistributedLock, LockError, LockHandle, REGISTER_LOCK_PREFIX};
pub use token::{Claims, TokenError, TokenKind, TokenPair, TokenService};
pub use revocation::{RevocationStore, BLACKLIST_PREFIX};
pub use resolver::{PermissionResolver, API_PERMISSION_PREFIX, ROLE_PERMISSION_PREFIX, USER_ROLE_PREFIX};
pub use gate::{extract_token, AuthorizationGate, GateStage, Rejection};
pub use request_context::RequestContext;
pub use provider::{
    AccountService, AuthProvider, ChangePasswordRequest, LoginRequest, LoginResponse, RegisterRequest, UpdateProfileRequest,
};
pub use auth_core::AuthCore;
