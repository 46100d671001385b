//! Account lifecycle integration tests: registration under contention, login,
//! logout, refresh and profile edits against the in-memory stores.

mod common;

use std::sync::{Arc, Barrier};
use std::time::Duration;

use anyhow::Result;

use common::Harness;
use mental::identity::{
    AuthProvider, ChangePasswordRequest, DistributedLock, IdGenerator, LoginRequest, RegisterRequest, TokenKind,
    UpdateProfileRequest,
};
use mental::storage::{Directory, KvBackend};

fn reg(account: &str, role_id: i64) -> RegisterRequest {
    RegisterRequest { account: account.into(), password: "pw".into(), role_id }
}

#[test]
fn register_assigns_generated_id_and_role() -> Result<()> {
    let h = Harness::new()?;
    let profile = h.core.accounts.register(&reg("alice", 1))?;
    assert_eq!(profile.account, "alice");

    let stored = h.dir.find_by_account("alice")?.expect("stored identity");
    let parts = IdGenerator::decode(stored.id);
    assert_eq!(parts.timestamp_ms, common::T0);
    assert_eq!((parts.worker_id, parts.datacenter_id), (1, 1));
    assert_eq!(stored.password_digest, "plain:pw");
    assert_eq!(h.dir.role_ids_for(stored.id)?.into_iter().collect::<Vec<_>>(), vec![1]);
    // lock released after success
    assert!(!h.kv.exists("mental:register:alice")?);
    Ok(())
}

#[test]
fn register_validates_input() -> Result<()> {
    let h = Harness::new()?;
    assert_eq!(h.core.accounts.register(&reg("alice", 3)).unwrap_err().code_str(), "invalid_role");
    assert_eq!(h.core.accounts.register(&reg("", 1)).unwrap_err().http_status(), 400);
    let no_pw = RegisterRequest { account: "bob".into(), password: String::new(), role_id: 1 };
    assert_eq!(h.core.accounts.register(&no_pw).unwrap_err().code_str(), "missing_field");
    assert_eq!(h.dir.identity_count(), 0);
    Ok(())
}

#[test]
fn duplicate_account_is_a_conflict() -> Result<()> {
    let h = Harness::new()?;
    h.core.accounts.register(&reg("alice", 1))?;
    let err = h.core.accounts.register(&reg("alice", 2)).unwrap_err();
    assert_eq!(err.http_status(), 409);
    assert_eq!(err.code_str(), "account_exists");
    Ok(())
}

#[test]
fn held_registration_lock_reports_in_progress() -> Result<()> {
    let h = Harness::new()?;
    let lock = DistributedLock::new(Arc::new(h.kv.clone()));
    let held = lock.acquire_registration("alice", h.cfg.register_lock_ttl())?;
    let err = h.core.accounts.register(&reg("alice", 1)).unwrap_err();
    assert_eq!((err.http_status(), err.code_str()), (409, "in_progress"));
    held.release()?;
    h.core.accounts.register(&reg("alice", 1))?;
    Ok(())
}

#[test]
fn concurrent_registrations_admit_at_most_one() -> Result<()> {
    let h = Harness::new()?;
    let accounts = h.core.accounts.clone();
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let accounts = accounts.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                accounts.register(&reg("carol", 1))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().expect("thread")).collect();
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    for err in results.into_iter().filter_map(|r| r.err()) {
        assert_eq!(err.http_status(), 409, "unexpected {}", err);
    }
    assert_eq!(h.dir.identity_count(), 1);
    Ok(())
}

#[test]
fn login_failures_are_indistinguishable() -> Result<()> {
    let h = Harness::new()?;
    h.core.accounts.register(&reg("alice", 1))?;
    let unknown = h.core.accounts.login(&LoginRequest { account: "nobody".into(), password: "pw".into() }).unwrap_err();
    let wrong = h.core.accounts.login(&LoginRequest { account: "alice".into(), password: "nope".into() }).unwrap_err();
    assert_eq!(unknown, wrong);
    assert_eq!(unknown.http_status(), 401);

    let ok = h.login("alice", "pw")?;
    assert_eq!(ok.profile.account, "alice");
    assert!(h.core.tokens.validate(&ok.refresh_token, TokenKind::Refresh).is_ok());
    Ok(())
}

#[test]
fn logout_revokes_only_that_token() -> Result<()> {
    let h = Harness::new()?;
    h.register("alice", "pw", 1)?;
    let first = h.login("alice", "pw")?;
    let second = h.login("alice", "pw")?;
    h.core.accounts.logout(&first.access_token)?;

    let c1 = h.core.tokens.validate(&first.access_token, TokenKind::Access)?;
    let c2 = h.core.tokens.validate(&second.access_token, TokenKind::Access)?;
    assert!(h.core.revocations.is_revoked(&c1.jti)?);
    assert!(!h.core.revocations.is_revoked(&c2.jti)?);
    assert_eq!(h.kv.ttl(&format!("mental:blacklist:{}", c1.jti)), Some(h.cfg.access_ttl()));
    Ok(())
}

#[test]
fn refresh_issues_new_access_token() -> Result<()> {
    let h = Harness::new()?;
    let id = h.register("alice", "pw", 1)?;
    let pair = h.login("alice", "pw")?;
    h.clock.advance(Duration::from_secs(20 * 60));
    assert!(h.core.tokens.validate(&pair.access_token, TokenKind::Access).is_err());

    let fresh = h.core.accounts.refresh(&pair.refresh_token)?;
    let claims = h.core.tokens.validate(&fresh, TokenKind::Access)?;
    assert_eq!((claims.id, claims.account.as_str()), (id, "alice"));
    // an access token cannot be used to refresh
    assert_eq!(h.core.accounts.refresh(&fresh).unwrap_err().http_status(), 401);
    Ok(())
}

#[test]
fn profile_updates_and_password_change() -> Result<()> {
    let h = Harness::new()?;
    let id = h.register("alice", "pw", 1)?;

    h.clock.advance(Duration::from_secs(60));
    let p = h.core.accounts.update_profile(id, &UpdateProfileRequest { username: "Alice".into(), email: String::new() })?;
    let stored = h.dir.find_by_id(id)?.expect("stored identity");
    assert_eq!((stored.created_at_ms, stored.updated_at_ms), (common::T0, common::T0 + 60_000));
    assert_eq!((p.username.as_str(), p.email.as_str()), ("Alice", ""));
    let p = h.core.accounts.update_profile(id, &UpdateProfileRequest { username: String::new(), email: "a@example.com".into() })?;
    assert_eq!((p.username.as_str(), p.email.as_str()), ("Alice", "a@example.com"));

    let wrong = ChangePasswordRequest { old_password: "bad".into(), new_password: "pw2".into() };
    assert_eq!(h.core.accounts.change_password(id, &wrong).unwrap_err().code_str(), "invalid_credentials");
    h.clock.advance(Duration::from_secs(60));
    h.core.accounts.change_password(id, &ChangePasswordRequest { old_password: "pw".into(), new_password: "pw2".into() })?;
    assert_eq!(h.dir.find_by_id(id)?.expect("stored identity").updated_at_ms, common::T0 + 120_000);
    assert!(h.login("alice", "pw").is_err());
    assert!(h.login("alice", "pw2").is_ok());

    assert_eq!(h.core.accounts.profile(12345).unwrap_err().http_status(), 404);
    Ok(())
}
