//! Cold start: reading stored credentials and validating them.

use super::harness::{Harness, HarnessOptions, VerifyScript};
use crate::router::Route;
use crate::session_fsm::SessionPhase;
use crate::SessionError;
use bazaar_storage::{KeyValueStorage, Role};
use std::time::Duration;

#[tokio::test]
async fn test_valid_stored_session_routes_once() {
    let h = Harness::new();
    h.seed("abc", Role::Client).await;

    let session = h.manager.restore().await.unwrap();

    assert_eq!(session.phase, SessionPhase::Authenticated);
    assert!(session.is_authenticated);
    assert!(!session.is_loading);
    assert_eq!(session.token.as_deref(), Some("abc"));
    assert_eq!(session.role, Role::Client);
    assert!(session.verified_at.is_some());
    assert_eq!(h.authority.verified_tokens(), vec!["abc"]);
    assert_eq!(h.routes(), vec![Route::Home(Role::Client)]);
    assert_eq!(
        h.phases(),
        vec![
            SessionPhase::Restoring,
            SessionPhase::Validating,
            SessionPhase::Authenticated
        ]
    );
}

#[tokio::test]
async fn test_incomplete_freelancer_goes_to_profile_completion() {
    let h = Harness::with_options(HarnessOptions {
        profile_complete: false,
        ..Default::default()
    });
    h.seed("abc", Role::Freelancer).await;

    h.manager.restore().await.unwrap();

    assert_eq!(h.routes(), vec![Route::CompleteProfile(Role::Freelancer)]);
}

#[tokio::test]
async fn test_no_stored_token_skips_verification() {
    let h = Harness::new();

    let session = h.manager.restore().await.unwrap();

    assert_eq!(session.phase, SessionPhase::Unauthenticated);
    assert!(!session.is_loading);
    assert!(session.token.is_none());
    assert_eq!(h.authority.verify_calls(), 0);
    assert!(h.routes().is_empty());
    assert_eq!(
        h.phases(),
        vec![SessionPhase::Restoring, SessionPhase::Unauthenticated]
    );
}

#[tokio::test]
async fn test_not_authenticated_until_verification_resolves() {
    let h = Harness::new();
    h.seed("abc", Role::Admin).await;
    h.authority.close_gate();

    let manager = h.manager.clone();
    let restore = tokio::spawn(async move { manager.restore().await });
    h.authority.wait_entered().await;

    let pending = h.manager.snapshot();
    assert_eq!(pending.phase, SessionPhase::Validating);
    assert_eq!(pending.token.as_deref(), Some("abc"));
    assert_eq!(pending.role, Role::Admin);
    assert!(!pending.is_authenticated);
    assert!(pending.is_loading);
    assert!(h.routes().is_empty());

    h.authority.release(1);
    let session = restore.await.unwrap().unwrap();
    assert!(session.is_authenticated);
    assert_eq!(h.routes(), vec![Route::Home(Role::Admin)]);
}

#[tokio::test]
async fn test_rejected_token_purges_credentials() {
    let h = Harness::new();
    h.seed("abc", Role::Company).await;
    h.authority.set_verify(VerifyScript::Invalid);

    let err = h.manager.restore().await.unwrap_err();

    assert!(matches!(err, SessionError::RemoteRejected(_)));
    assert_eq!(h.stored().await, None);
    assert!(h.storage.is_empty());
    let session = h.manager.snapshot();
    assert_eq!(session.phase, SessionPhase::Unauthenticated);
    assert!(session.token.is_none());
    assert!(session.user.is_none());
    assert_eq!(session.role, Role::Client);
    assert!(h.routes().is_empty());
}

#[tokio::test]
async fn test_unreachable_authority_revokes_session() {
    let h = Harness::new();
    h.seed("abc", Role::Client).await;
    h.authority.set_verify(VerifyScript::Unreachable);

    let err = h.manager.restore().await.unwrap_err();

    assert!(matches!(err, SessionError::RemoteUnreachable(_)));
    assert_eq!(h.stored().await, None);
    assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
}

#[tokio::test]
async fn test_hung_verification_times_out() {
    let h = Harness::with_options(HarnessOptions {
        verify_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    h.seed("abc", Role::Client).await;
    h.authority.set_verify(VerifyScript::Hang);

    let err = h.manager.restore().await.unwrap_err();

    assert!(matches!(err, SessionError::Timeout));
    assert_eq!(h.stored().await, None);
    assert!(!h.manager.snapshot().is_loading);
}

#[tokio::test]
async fn test_validation_waits_for_navigation() {
    let h = Harness::with_options(HarnessOptions {
        navigation_ready: false,
        ..Default::default()
    });
    h.seed("abc", Role::Client).await;

    let manager = h.manager.clone();
    let restore = tokio::spawn(async move { manager.restore().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.manager.phase(), SessionPhase::Validating);
    assert_eq!(h.authority.verify_calls(), 0);
    assert!(!restore.is_finished());

    h.manager.mark_navigation_ready();
    let session = restore.await.unwrap().unwrap();
    assert!(session.is_authenticated);
    assert_eq!(h.authority.verify_calls(), 1);
    assert_eq!(h.routes(), vec![Route::Home(Role::Client)]);
}

#[tokio::test]
async fn test_corrupt_storage_is_purged_without_verification() {
    let h = Harness::new();
    h.storage.set("@jwt", "\"abc\"").unwrap();
    h.storage.set("@role", "\"client\"").unwrap();
    h.storage.set("@user", "{ not json").unwrap();

    let session = h.manager.restore().await.unwrap();

    assert_eq!(session.phase, SessionPhase::Unauthenticated);
    assert_eq!(h.authority.verify_calls(), 0);
    assert!(h.storage.is_empty());
}

#[tokio::test]
async fn test_restore_runs_once() {
    let h = Harness::new();
    h.seed("abc", Role::Client).await;

    h.manager.restore().await.unwrap();
    let again = h.manager.restore().await.unwrap();

    assert!(again.is_authenticated);
    assert_eq!(h.authority.verify_calls(), 1);
    assert_eq!(h.routes().len(), 1);
}
