//! Session manager: the single owner of the in-memory session.
//!
//! Every mutation goes through the session FSM and is published as an
//! immutable `Session` snapshot on a watch channel. Readers never lock.
//!
//! Concurrency model:
//! - Each operation that will eventually write the session takes a *ticket*.
//!   Issuing a ticket supersedes every older one; a superseded operation
//!   drops its result instead of committing it.
//! - Commits (ticket check, persistence, FSM transition, publish) run under a
//!   single async commit lock, so sign-out always observes a consistent state
//!   and nothing that started before it can resurrect the session.
//! - Routing happens at most once per session *epoch*. An epoch starts when
//!   credentials are restored or a sign-in succeeds and ends on sign-out or
//!   rejection. Revalidation stays in the same epoch.
//! - Routing never reaches a navigator that has not signalled ready; the
//!   route is held back and dispatched once it does, unless the epoch has
//!   ended by then.

use crate::authority::{AuthGrant, Registration, SessionAuthority};
use crate::oauth_bridge::OAuthBridge;
use crate::router::{AssumeComplete, Navigator, ProfileProbe, RoleRouter};
use crate::session_fsm::{
    Session, SessionMachine, SessionMachineInput, SessionPhase, SessionStateChanged,
};
use crate::{SessionError, SessionResult};
use bazaar_config::DEFAULT_VERIFY_TIMEOUT_SECS;
use bazaar_storage::{CredentialOrigin, CredentialStore, PersistedCredentials, UserProfile};
use chrono::Utc;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Callback type for session phase change notifications.
pub type SessionStateCallback = Box<dyn Fn(SessionStateChanged) + Send + Sync>;

#[derive(Debug, Default)]
struct RoutingGuard {
    epoch: u64,
    routed: Option<u64>,
}

/// Everything a routing decision needs, detached from the manager so a
/// deferred route can run on its own task.
#[derive(Clone)]
struct RouteDispatch {
    navigator: Arc<dyn Navigator>,
    probe: Arc<dyn ProfileProbe>,
    guard: Arc<Mutex<RoutingGuard>>,
    session: watch::Receiver<Session>,
}

impl RouteDispatch {
    async fn route(&self, epoch: u64) {
        let session = self.session.borrow().clone();
        if !session.is_authenticated {
            return;
        }

        let complete = if session.role.requires_profile() {
            self.probe
                .is_complete(session.role, session.user.as_ref())
                .await
        } else {
            true
        };

        let mut routing = lock(&self.guard);
        if routing.epoch != epoch || routing.routed == Some(epoch) {
            debug!(epoch, "Routing skipped");
            return;
        }
        routing.routed = Some(epoch);

        let route = RoleRouter::decide(session.role, complete);
        info!(route = %route, role = %session.role, profile_complete = complete, "Routing");
        RoleRouter::dispatch(self.navigator.as_ref(), route);
    }
}

pub struct SessionManager {
    store: CredentialStore,
    authority: Arc<dyn SessionAuthority>,
    navigator: Arc<dyn Navigator>,
    probe: Arc<dyn ProfileProbe>,
    oauth: Option<Arc<OAuthBridge>>,
    verify_timeout: Duration,
    fsm: Mutex<SessionMachine>,
    session: watch::Sender<Session>,
    navigation_ready: watch::Sender<bool>,
    ticket: watch::Sender<u64>,
    commit: tokio::sync::Mutex<()>,
    routing: Arc<Mutex<RoutingGuard>>,
    /// Provider access token of the current session, revoked on sign-out.
    provider_token: Mutex<Option<String>>,
    state_callback: Mutex<Option<SessionStateCallback>>,
}

impl SessionManager {
    pub fn new(
        store: CredentialStore,
        authority: Arc<dyn SessionAuthority>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            store,
            authority,
            navigator,
            probe: Arc::new(AssumeComplete),
            oauth: None,
            verify_timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
            fsm: Mutex::new(SessionMachine::new()),
            session: watch::Sender::new(Session::default()),
            navigation_ready: watch::Sender::new(false),
            ticket: watch::Sender::new(0),
            commit: tokio::sync::Mutex::new(()),
            routing: Arc::new(Mutex::new(RoutingGuard::default())),
            provider_token: Mutex::new(None),
            state_callback: Mutex::new(None),
        }
    }

    pub fn with_profile_probe(mut self, probe: Arc<dyn ProfileProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_oauth(mut self, bridge: Arc<OAuthBridge>) -> Self {
        self.oauth = Some(bridge);
        self
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Set a callback to be notified of phase changes.
    pub fn set_state_callback(&self, callback: SessionStateCallback) {
        *lock(&self.state_callback) = Some(callback);
    }

    /// Current session snapshot.
    pub fn snapshot(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Stream of session snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from(lock(&self.fsm).state())
    }

    /// Signal that the navigator can accept redirects. Deferred validations
    /// resume once this is called.
    pub fn mark_navigation_ready(&self) {
        self.navigation_ready.send_replace(true);
        debug!("Navigation ready");
    }

    pub fn is_navigation_ready(&self) -> bool {
        *self.navigation_ready.borrow()
    }

    pub fn has_provider(&self) -> bool {
        self.oauth.is_some()
    }

    /// Read stored credentials once and validate them.
    ///
    /// Only the first call does anything; later calls return the current
    /// snapshot. Resolves to `Authenticated` or `Unauthenticated`, unless a
    /// newer operation supersedes it.
    pub async fn restore(&self) -> SessionResult<Session> {
        let ticket = {
            let _commit = self.commit.lock().await;
            if self.phase() != SessionPhase::Uninitialized {
                debug!("Session already restored");
                return Ok(self.snapshot());
            }
            let ticket = self.next_ticket();
            self.apply(SessionMachineInput::RestoreRequested, |s| s)?;
            ticket
        };

        let loaded = self.store.load().await;

        let commit = self.commit.lock().await;
        self.ensure_current(ticket)?;
        match loaded {
            Ok(Some(credentials)) => {
                info!(
                    user_id = %credentials.user.id,
                    role = %credentials.role,
                    "Stored credentials found, validating"
                );
                self.next_epoch();
                *lock(&self.provider_token) = match credentials.origin {
                    CredentialOrigin::Provider => Some(credentials.token.clone()),
                    CredentialOrigin::Password => None,
                };
                // Provisional: not authenticated until the authority agrees
                self.apply(SessionMachineInput::CredentialsFound, |_| Session {
                    token: Some(credentials.token),
                    role: credentials.role,
                    user: Some(credentials.user),
                    ..Session::default()
                })?;
                drop(commit);
                self.validate(ticket).await
            }
            Ok(None) => {
                info!("No stored credentials");
                self.apply(SessionMachineInput::NoCredentials, |_| {
                    Session::empty(SessionPhase::Unauthenticated)
                })
            }
            Err(e) => {
                warn!(error = %e, "Credential store unreadable");
                self.apply(SessionMachineInput::NoCredentials, |_| {
                    Session::empty(SessionPhase::Unauthenticated)
                })?;
                Err(e.into())
            }
        }
    }

    /// Re-verify the current token, superseding any validation in flight.
    /// Does not route again.
    pub async fn revalidate(&self) -> SessionResult<Session> {
        let ticket = {
            let _commit = self.commit.lock().await;
            self.apply(SessionMachineInput::Revalidate, |s| s)?;
            self.next_ticket()
        };
        self.validate(ticket).await
    }

    pub async fn sign_in(&self, identifier: &str, secret: &str) -> SessionResult<Session> {
        info!(identifier = %identifier, "Signing in");
        self.authenticate(self.authority.login(identifier, secret))
            .await
    }

    pub async fn sign_up(&self, registration: &Registration) -> SessionResult<Session> {
        info!(username = %registration.username, role = %registration.role, "Registering");
        self.authenticate(self.authority.register(registration))
            .await
    }

    /// Run the provider flow and, if it succeeds, establish a session.
    ///
    /// A failed or abandoned provider flow leaves the current session as it
    /// was.
    pub async fn sign_in_with_provider(&self) -> SessionResult<Session> {
        let bridge = self.oauth.clone().ok_or_else(|| {
            SessionError::Config("Provider sign-in is not configured".to_string())
        })?;
        let started_at = *self.ticket.borrow();

        let grant = bridge.sign_in().await?;

        let commit = self.commit.lock().await;
        if let Err(e) = self.ensure_current(started_at) {
            drop(commit);
            bridge.revoke(&grant.access_token).await;
            return Err(e);
        }
        self.apply(SessionMachineInput::SignInAttempt, |s| s)?;
        let ticket = self.next_ticket();
        let session = self
            .establish(
                ticket,
                grant.access_token,
                grant.user,
                CredentialOrigin::Provider,
            )
            .await;
        drop(commit);
        self.route_current().await;
        session
    }

    /// Clear everything. Always ends `Unauthenticated`; calling it again is a
    /// no-op apart from re-clearing storage.
    pub async fn sign_out(&self) -> SessionResult<Session> {
        let commit = self.commit.lock().await;
        self.next_ticket();
        self.next_epoch();
        self.apply(SessionMachineInput::SignOutRequested, |s| s)?;

        let provider_token = lock(&self.provider_token).take();
        let cleared = self.store.clear().await;
        let session = self.apply(SessionMachineInput::SignOutComplete, |_| {
            Session::empty(SessionPhase::Unauthenticated)
        })?;
        drop(commit);
        info!("Signed out");

        if let (Some(token), Some(bridge)) = (provider_token, self.oauth.as_ref()) {
            bridge.revoke(&token).await;
        }

        cleared?;
        Ok(session)
    }

    async fn authenticate<F>(&self, remote: F) -> SessionResult<Session>
    where
        F: Future<Output = SessionResult<AuthGrant>> + Send,
    {
        let ticket = {
            let _commit = self.commit.lock().await;
            self.apply(SessionMachineInput::SignInAttempt, |s| s)?;
            self.next_ticket()
        };

        let result = tokio::select! {
            result = remote => result,
            _ = self.superseded(ticket) => return Err(SessionError::Superseded),
        };

        let commit = self.commit.lock().await;
        self.ensure_current(ticket)?;
        let session = match result {
            Ok(grant) => {
                self.establish(ticket, grant.token, grant.user, CredentialOrigin::Password)
                    .await
            }
            Err(e) => {
                warn!(error = %e, "Sign-in failed");
                self.revoke_locked(SessionMachineInput::SignInFailed).await?;
                Err(e)
            }
        };
        drop(commit);
        self.route_current().await;
        session
    }

    /// Persist then flip to `Authenticated`. Caller holds the commit lock
    /// and has already moved the machine into `SigningIn`.
    async fn establish(
        &self,
        ticket: u64,
        token: String,
        user: UserProfile,
        origin: CredentialOrigin,
    ) -> SessionResult<Session> {
        let role = user.role();
        let credentials =
            PersistedCredentials::new(token.clone(), role, user.clone()).with_origin(origin);
        if let Err(e) = self.store.save(credentials).await {
            warn!(error = %e, "Could not persist credentials");
            self.revoke_locked(SessionMachineInput::SignInFailed).await?;
            return Err(e.into());
        }

        *lock(&self.provider_token) = match origin {
            CredentialOrigin::Provider => Some(token.clone()),
            CredentialOrigin::Password => None,
        };
        self.next_epoch();
        let session = self.apply(SessionMachineInput::SignInSucceeded, |_| Session {
            token: Some(token),
            role,
            user: Some(user),
            verified_at: Some(Utc::now()),
            ..Session::default()
        })?;
        info!(user_id = ?session.user.as_ref().map(|u| &u.id), role = %role, ticket, "Session established");
        Ok(session)
    }

    /// Verify the current token. The machine is already in `Validating`.
    async fn validate(&self, ticket: u64) -> SessionResult<Session> {
        self.wait_for_navigation(ticket).await?;

        let token = self.snapshot().token;
        let verdict = match token {
            Some(token) => {
                debug!(ticket, "Verifying token");
                tokio::select! {
                    verdict = tokio::time::timeout(
                        self.verify_timeout,
                        self.authority.verify_token(&token),
                    ) => verdict,
                    _ = self.superseded(ticket) => return Err(SessionError::Superseded),
                }
            }
            None => Ok(Ok(false)),
        };
        let outcome = match verdict {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(SessionError::RemoteRejected(
                "Token is no longer valid".to_string(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::Timeout),
        };

        let commit = self.commit.lock().await;
        self.ensure_current(ticket)?;
        match outcome {
            Ok(()) => {
                let session = self.apply(SessionMachineInput::Verified, |s| Session {
                    verified_at: Some(Utc::now()),
                    ..s
                })?;
                drop(commit);
                info!(role = %session.role, "Session verified");
                self.route_current().await;
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Session validation failed, clearing credentials");
                self.revoke_locked(SessionMachineInput::Rejected).await?;
                Err(e)
            }
        }
    }

    /// Clear storage and reset the session via `input`. Caller holds the
    /// commit lock.
    async fn revoke_locked(&self, input: SessionMachineInput) -> SessionResult<Session> {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Could not clear credentials");
        }
        lock(&self.provider_token).take();
        self.next_epoch();
        self.apply(input, |_| Session::empty(SessionPhase::Unauthenticated))
    }

    /// Route the current session if it is authenticated and this epoch has
    /// not been routed yet. Held back until navigation is ready.
    async fn route_current(&self) {
        let epoch = lock(&self.routing).epoch;
        let dispatch = RouteDispatch {
            navigator: self.navigator.clone(),
            probe: self.probe.clone(),
            guard: self.routing.clone(),
            session: self.session.subscribe(),
        };

        if self.is_navigation_ready() {
            dispatch.route(epoch).await;
            return;
        }

        debug!(epoch, "Routing deferred until navigation is ready");
        let mut ready = self.navigation_ready.subscribe();
        tokio::spawn(async move {
            let ready = ready.wait_for(|ready| *ready).await.is_ok();
            if ready {
                dispatch.route(epoch).await;
            }
        });
    }

    async fn wait_for_navigation(&self, ticket: u64) -> SessionResult<()> {
        if self.is_navigation_ready() {
            return Ok(());
        }
        debug!(ticket, "Validation deferred until navigation is ready");

        let mut ready = self.navigation_ready.subscribe();
        let ready = async move {
            let _ = ready.wait_for(|ready| *ready).await;
        };
        tokio::select! {
            _ = ready => Ok(()),
            _ = self.superseded(ticket) => Err(SessionError::Superseded),
        }
    }

    /// Resolves once a newer ticket has been issued.
    fn superseded(&self, ticket: u64) -> impl Future<Output = ()> + Send + 'static {
        let mut tickets = self.ticket.subscribe();
        async move {
            let _ = tickets.wait_for(|current| *current != ticket).await;
        }
    }

    fn next_ticket(&self) -> u64 {
        let mut issued = 0;
        self.ticket.send_modify(|ticket| {
            *ticket += 1;
            issued = *ticket;
        });
        issued
    }

    fn ensure_current(&self, ticket: u64) -> SessionResult<()> {
        if *self.ticket.borrow() == ticket {
            Ok(())
        } else {
            debug!(ticket, "Operation superseded");
            Err(SessionError::Superseded)
        }
    }

    fn next_epoch(&self) {
        lock(&self.routing).epoch += 1;
    }

    /// Transition the FSM, publish the updated snapshot and notify the
    /// callback if the phase changed.
    fn apply<F>(&self, input: SessionMachineInput, update: F) -> SessionResult<Session>
    where
        F: FnOnce(Session) -> Session,
    {
        let (old_phase, new_phase) = {
            let mut fsm = lock(&self.fsm);
            let old_phase = SessionPhase::from(fsm.state());
            fsm.consume(&input).map_err(|_| {
                SessionError::InvalidStateTransition(format!(
                    "Cannot apply {:?} in state {:?}",
                    input, old_phase
                ))
            })?;
            (old_phase, SessionPhase::from(fsm.state()))
        };

        let next = update(self.snapshot()).with_phase(new_phase);
        self.session.send_replace(next.clone());

        if old_phase != new_phase {
            debug!(
                old_state = ?old_phase,
                new_state = ?new_phase,
                "Session state transition"
            );
            self.notify_state_change(&next);
        }

        Ok(next)
    }

    fn notify_state_change(&self, session: &Session) {
        let callback = lock(&self.state_callback);
        if let Some(callback) = callback.as_ref() {
            callback(SessionStateChanged {
                phase: session.phase,
                user_id: session.user.as_ref().map(|u| u.id.clone()),
                role: session.user.as_ref().map(|u| u.role()),
            });
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
