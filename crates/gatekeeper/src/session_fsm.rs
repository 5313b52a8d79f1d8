//! Session lifecycle state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │  Uninitialized  │ (initial)
//! └────────┬────────┘
//!          │ RestoreRequested
//!          ▼
//! ┌─────────────────┐  NoCredentials   ┌─────────────────┐
//! │    Restoring    │ ───────────────► │ Unauthenticated │ ◄──────────────┐
//! └────────┬────────┘                  └────────┬────────┘                │
//!          │ CredentialsFound                   │ SignInAttempt           │
//!          ▼                                    ▼                         │
//! ┌─────────────────┐  Rejected        ┌─────────────────┐  SignInFailed  │
//! │   Validating    │ ───────────────► │    SigningIn    │ ───────────────┤
//! └────────┬────────┘  (Unauth.)       └────────┬────────┘                │
//!          │ Verified                           │ SignInSucceeded         │
//!          ▼                                    ▼                         │
//! ┌─────────────────────────────────────────────────────┐                 │
//! │                   Authenticated                     │                 │
//! └────────┬────────────────────────────────────────────┘                 │
//!          │ SignOutRequested (also from any other state)                 │
//!          ▼                                                              │
//! ┌─────────────────┐  SignOutComplete                                    │
//! │   SigningOut    │ ────────────────────────────────────────────────────┘
//! └─────────────────┘
//! ```
//!
//! `Revalidate` moves `Authenticated` (or a running `Validating`) back into
//! `Validating`. `SignInAttempt` is accepted everywhere except `SigningOut`.

use bazaar_storage::{Role, UserProfile};
use chrono::{DateTime, Utc};
use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Uninitialized)

    Uninitialized => {
        RestoreRequested => Restoring,
        SignInAttempt => SigningIn,
        SignOutRequested => SigningOut
    },
    Restoring => {
        NoCredentials => Unauthenticated,
        CredentialsFound => Validating,
        SignInAttempt => SigningIn,
        SignOutRequested => SigningOut
    },
    Validating => {
        Verified => Authenticated,
        Rejected => Unauthenticated,
        // A newer trigger supersedes the running validation
        Revalidate => Validating,
        SignInAttempt => SigningIn,
        SignOutRequested => SigningOut
    },
    SigningIn => {
        SignInSucceeded => Authenticated,
        SignInFailed => Unauthenticated,
        SignInAttempt => SigningIn,
        SignOutRequested => SigningOut
    },
    Authenticated => {
        Revalidate => Validating,
        SignInAttempt => SigningIn,
        SignOutRequested => SigningOut
    },
    SigningOut => {
        SignOutComplete => Unauthenticated,
        SignOutRequested => SigningOut
    },
    Unauthenticated => {
        SignInAttempt => SigningIn,
        SignOutRequested => SigningOut
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Lifecycle phase for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Restoring,
    Validating,
    SigningIn,
    Authenticated,
    SigningOut,
    Unauthenticated,
}

impl SessionPhase {
    /// Phases during which the session outcome is not yet known.
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            SessionPhase::Uninitialized
                | SessionPhase::Restoring
                | SessionPhase::Validating
                | SessionPhase::SigningIn
        )
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionPhase::Authenticated)
    }
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Uninitialized => SessionPhase::Uninitialized,
            SessionMachineState::Restoring => SessionPhase::Restoring,
            SessionMachineState::Validating => SessionPhase::Validating,
            SessionMachineState::SigningIn => SessionPhase::SigningIn,
            SessionMachineState::Authenticated => SessionPhase::Authenticated,
            SessionMachineState::SigningOut => SessionPhase::SigningOut,
            SessionMachineState::Unauthenticated => SessionPhase::Unauthenticated,
        }
    }
}

/// Immutable snapshot of the current session, handed to readers.
///
/// `is_loading` and `is_authenticated` are derived from `phase` and cannot
/// disagree with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: Option<String>,
    pub role: Role,
    pub user: Option<UserProfile>,
    pub is_loading: bool,
    pub is_authenticated: bool,
    pub phase: SessionPhase,
    /// When the authority last confirmed the token (or issued it).
    pub verified_at: Option<DateTime<Utc>>,
}

impl Session {
    pub(crate) fn empty(phase: SessionPhase) -> Self {
        Self {
            token: None,
            role: Role::default(),
            user: None,
            is_loading: phase.is_loading(),
            is_authenticated: phase.is_authenticated(),
            phase,
            verified_at: None,
        }
    }

    pub(crate) fn with_phase(mut self, phase: SessionPhase) -> Self {
        self.phase = phase;
        self.is_loading = phase.is_loading();
        self.is_authenticated = phase.is_authenticated();
        self
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::empty(SessionPhase::Uninitialized)
    }
}

/// Payload for session phase change notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateChanged {
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}
