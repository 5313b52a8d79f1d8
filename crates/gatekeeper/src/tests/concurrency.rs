//! Superseding and routing-once guarantees.

use super::harness::{grant, Harness, LoginScript, VerifyScript};
use crate::router::Route;
use crate::session_fsm::SessionPhase;
use crate::SessionError;
use bazaar_storage::Role;

#[tokio::test]
async fn test_second_sign_in_supersedes_first() {
    let h = Harness::new();
    h.authority.close_gate();

    let first = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.sign_in("alice", "pw").await })
    };
    h.authority.wait_entered().await;

    h.authority
        .set_login(LoginScript::Grant(grant("second", Role::Freelancer)));
    let second = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.sign_in("alice", "pw").await })
    };

    assert!(matches!(
        first.await.unwrap(),
        Err(SessionError::Superseded)
    ));
    h.authority.wait_entered().await;
    h.authority.release(1);

    let session = second.await.unwrap().unwrap();
    assert_eq!(session.token.as_deref(), Some("second"));
    assert_eq!(h.stored().await.unwrap().token, "second");
    assert_eq!(h.routes(), vec![Route::Home(Role::Freelancer)]);
}

#[tokio::test]
async fn test_revalidate_does_not_route_again() {
    let h = Harness::new();
    h.manager.sign_in("alice", "pw").await.unwrap();

    let session = h.manager.revalidate().await.unwrap();

    assert!(session.is_authenticated);
    assert_eq!(h.authority.verified_tokens(), vec!["xyz"]);
    assert_eq!(h.routes(), vec![Route::Home(Role::Client)]);
}

#[tokio::test]
async fn test_failed_revalidation_revokes() {
    let h = Harness::new();
    h.manager.sign_in("alice", "pw").await.unwrap();
    h.authority.set_verify(VerifyScript::Invalid);

    let err = h.manager.revalidate().await.unwrap_err();

    assert!(matches!(err, SessionError::RemoteRejected(_)));
    assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
    assert_eq!(h.stored().await, None);
}

#[tokio::test]
async fn test_revalidate_supersedes_inflight_validation() {
    let h = Harness::new();
    h.seed("abc", Role::Client).await;
    h.authority.close_gate();

    let restore = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.restore().await })
    };
    h.authority.wait_entered().await;

    let revalidate = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.revalidate().await })
    };

    assert!(matches!(
        restore.await.unwrap(),
        Err(SessionError::Superseded)
    ));
    h.authority.wait_entered().await;
    h.authority.release(1);

    let session = revalidate.await.unwrap().unwrap();
    assert!(session.is_authenticated);
    assert_eq!(h.authority.verify_calls(), 2);
    // The restored session had not been routed yet, so it is routed exactly once
    assert_eq!(h.routes(), vec![Route::Home(Role::Client)]);
}

#[tokio::test]
async fn test_revalidate_without_session_is_rejected() {
    let h = Harness::new();
    h.manager.restore().await.unwrap();

    let err = h.manager.revalidate().await.unwrap_err();

    assert!(matches!(err, SessionError::InvalidStateTransition(_)));
    assert_eq!(h.authority.verify_calls(), 0);
}

#[tokio::test]
async fn test_subscribers_see_latest_snapshot() {
    let h = Harness::new();
    let mut rx = h.manager.subscribe();
    assert_eq!(rx.borrow().phase, SessionPhase::Uninitialized);

    h.manager.sign_in("alice", "pw").await.unwrap();

    assert!(rx.has_changed().unwrap());
    let session = rx.borrow_and_update().clone();
    assert!(session.is_authenticated);
    assert_eq!(session.token.as_deref(), Some("xyz"));
}
