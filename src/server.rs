//!
//! mental HTTP server
//! ------------------
//! Thin axum adapter over the authorization core.
//!
//! Responsibilities:
//! - Public account endpoints: login, registration, token refresh.
//! - A route-level middleware that runs the authorization gate for every protected
//!   route, keyed on the matched route pattern and the HTTP verb, and inserts the
//!   admitted `RequestContext` into the request extensions.
//! - Profile endpoints and a sample protected business route (`/scl`).
//! - Startup wiring: default catalog seeding, operation cache warm-up and the
//!   background KV sweeper.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{
    extract_token, AuthCore, AuthProvider, ChangePasswordRequest, LoginRequest, LoginResponse, Operation, Profile,
    RegisterRequest, RequestContext, UpdateProfileRequest, ROLE_ADMIN, ROLE_USER,
};
use crate::security::Argon2Hasher;
use crate::storage::{MemoryDirectory, MemoryKv};

pub const REFRESH_TOKEN_HEADER: &str = "refresh-token";
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub core: AuthCore,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Permission ids of the default catalog.
pub const PERM_PROFILE: i64 = 1;
pub const PERM_SCL_READ: i64 = 2;
pub const PERM_SCL_WRITE: i64 = 3;

/// Seed the default roles, permissions and operations. Both roles can manage their
/// own profile and read `/scl`; only admins can write it.
pub fn seed_default_catalog(dir: &MemoryDirectory) {
    for (route, verb) in [("/logout", "POST"), ("/user", "GET"), ("/user/base", "POST"), ("/user/password", "POST")] {
        dir.add_operation(PERM_PROFILE, Operation::new(route, verb));
    }
    dir.add_operation(PERM_SCL_READ, Operation::new("/scl", "GET"));
    dir.add_operation(PERM_SCL_WRITE, Operation::new("/scl", "POST"));
    for role in [ROLE_USER, ROLE_ADMIN] {
        dir.grant_permission(role, PERM_PROFILE);
        dir.grant_permission(role, PERM_SCL_READ);
    }
    dir.grant_permission(ROLE_ADMIN, PERM_SCL_WRITE);
}

/// Build the router. Protected routes sit behind `require_auth`.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/user", get(get_profile))
        .route("/user/base", post(update_profile))
        .route("/user/password", post(change_password))
        .route("/scl", get(scl_list).post(scl_submit))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(|| async { "mental ok" }))
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/refresh-token", post(refresh_token))
        .merge(protected)
        .with_state(state)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn require_auth(State(state): State<AppState>, matched: MatchedPath, mut req: Request, next: Next) -> Result<Response, AppError> {
    let op = Operation::new(matched.as_str(), req.method().as_str());
    let authorization = header_str(req.headers(), "authorization").map(str::to_string);
    let gate = state.core.gate.clone();
    let checked = op.clone();
    let ctx = blocking(move || Ok(gate.authorize(authorization.as_deref(), &checked)?)).await?;
    debug!(target: "gate", id = ctx.identity_id, route = %op.route, verb = %op.verb, "request admitted");
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Run blocking core work (store round trips, password hashing) off the async workers.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::internal("task_failed".to_string(), e.to_string()))?
}

async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> AppResult<Json<LoginResponse>> {
    let accounts = state.core.accounts.clone();
    Ok(Json(blocking(move || accounts.login(&req)).await?))
}

async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> AppResult<impl IntoResponse> {
    let accounts = state.core.accounts.clone();
    let profile = blocking(move || accounts.register(&req)).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn refresh_token(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<RefreshResponse>> {
    let refresh = extract_token(header_str(&headers, REFRESH_TOKEN_HEADER))
        .ok_or_else(|| AppError::auth("missing_token", "refresh-token header is required"))?;
    let access_token = state.core.accounts.refresh(refresh)?;
    Ok(Json(RefreshResponse { access_token, refresh_token: refresh.to_string() }))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<serde_json::Value>> {
    let token = extract_token(header_str(&headers, "authorization"))
        .ok_or_else(|| AppError::auth("missing_token", "authorization header is required"))?;
    state.core.accounts.logout(token)?;
    Ok(Json(json!({"status": "ok"})))
}

async fn get_profile(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Profile>> {
    Ok(Json(state.core.accounts.profile(ctx.identity_id)?))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<Profile>> {
    Ok(Json(state.core.accounts.update_profile(ctx.identity_id, &req)?))
}

async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<ChangePasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let accounts = state.core.accounts.clone();
    blocking(move || accounts.change_password(ctx.identity_id, &req)).await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn scl_list(Extension(ctx): Extension<RequestContext>) -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "account": ctx.account, "items": []}))
}

async fn scl_submit(Extension(ctx): Extension<RequestContext>, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "account": ctx.account, "received": body}))
}

/// Start the HTTP server on `http_port` with in-memory stores.
pub async fn run_with_port(http_port: u16, cfg: AuthConfig) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kv = MemoryKv::new(clock.clone());
    let directory = MemoryDirectory::new();
    seed_default_catalog(&directory);

    let core = AuthCore::build(&cfg, Arc::new(kv.clone()), Arc::new(directory), Arc::new(Argon2Hasher), clock)?;
    let warmed = core.resolver.preload_operations()?;
    info!(target: "startup", permissions = warmed, "default catalog loaded");

    // Start background KV sweeper
    {
        let kv = kv.clone();
        tokio::spawn(async move {
            loop {
                let removed = kv.sweep();
                if removed > 0 { debug!(target: "kv", removed, "expired keys swept"); }
                tokio::time::sleep(SWEEP_INTERVAL).await;
            }
        });
    }

    let app = router(AppState { core });
    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!(target: "startup", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
