//! Session runtime wiring.
//!
//! Builds the whole subsystem from configuration and hands out
//! `SessionHandle`s, the only surface the rest of the application uses. A
//! handle can only be obtained from a runtime, so there is no way to reach
//! the session outside its owning scope.

use crate::authority::{HttpSessionAuthority, Registration};
use crate::oauth::LoopbackHandoff;
use crate::oauth_bridge::OAuthBridge;
use crate::router::Navigator;
use crate::session::{SessionManager, SessionStateCallback};
use crate::session_fsm::{Session, SessionPhase};
use crate::SessionResult;
use bazaar_config::{Config, Paths};
use bazaar_storage::create_credential_store;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Owns the session manager for the lifetime of the process.
pub struct SessionRuntime {
    manager: Arc<SessionManager>,
}

impl SessionRuntime {
    /// Wire the HTTP authority, file-backed credential store and, when a
    /// client id is configured, loopback provider sign-in.
    pub fn from_config(
        config: &Config,
        paths: &Paths,
        navigator: Arc<dyn Navigator>,
    ) -> SessionResult<Self> {
        Ok(Self::with_manager(build_manager(config, paths, navigator)?))
    }

    pub fn with_manager(manager: SessionManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            manager: self.manager.clone(),
        }
    }

    /// Restore the stored session in the background.
    pub fn spawn_restore(&self) -> JoinHandle<SessionResult<Session>> {
        let manager = self.manager.clone();
        tokio::spawn(async move { manager.restore().await })
    }
}

fn build_manager(
    config: &Config,
    paths: &Paths,
    navigator: Arc<dyn Navigator>,
) -> SessionResult<SessionManager> {
    paths.ensure_dirs()?;

    let store = create_credential_store(&paths.credentials_file());
    let authority = Arc::new(HttpSessionAuthority::new(config.api_url()?));
    let handoff = Arc::new(LoopbackHandoff::new(
        config.oauth.callback_port,
        config.oauth.timeout_secs,
    ));

    let mut manager = SessionManager::new(store, authority, navigator)
        .with_verify_timeout(config.verify_timeout());
    if let Some(bridge) = OAuthBridge::from_settings(&config.oauth, handoff)? {
        manager = manager.with_oauth(Arc::new(bridge));
    }

    info!(
        api_url = %config.api_url,
        provider_sign_in = manager.has_provider(),
        "Session runtime ready"
    );
    Ok(manager)
}

/// Read snapshots and the fixed set of session operations.
#[derive(Clone)]
pub struct SessionHandle {
    manager: Arc<SessionManager>,
}

impl SessionHandle {
    pub fn snapshot(&self) -> Session {
        self.manager.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.manager.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.manager.phase()
    }

    pub fn has_provider(&self) -> bool {
        self.manager.has_provider()
    }

    pub fn mark_navigation_ready(&self) {
        self.manager.mark_navigation_ready();
    }

    pub fn set_state_callback(&self, callback: SessionStateCallback) {
        self.manager.set_state_callback(callback);
    }

    pub async fn restore(&self) -> SessionResult<Session> {
        self.manager.restore().await
    }

    pub async fn sign_in(&self, identifier: &str, secret: &str) -> SessionResult<Session> {
        self.manager.sign_in(identifier, secret).await
    }

    pub async fn sign_up(&self, registration: &Registration) -> SessionResult<Session> {
        self.manager.sign_up(registration).await
    }

    pub async fn sign_in_with_provider(&self) -> SessionResult<Session> {
        self.manager.sign_in_with_provider().await
    }

    pub async fn sign_out(&self) -> SessionResult<Session> {
        self.manager.sign_out().await
    }

    pub async fn revalidate(&self) -> SessionResult<Session> {
        self.manager.revalidate().await
    }
}
