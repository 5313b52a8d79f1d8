//! Session and identity subsystem for the Bazaar marketplace client.
//!
//! This crate provides:
//! - `SessionManager`, the FSM-driven single owner of the session
//! - `HttpSessionAuthority` for login, registration and token verification
//! - Provider sign-in (OAuth authorization code + PKCE) via `OAuthBridge`
//! - `RoleRouter`, which decides where an authenticated user lands
//! - `SessionRuntime`/`SessionHandle` wiring everything from configuration

mod authority;
mod error;
mod oauth;
mod oauth_bridge;
mod router;
mod runtime;
mod session;
mod session_fsm;

#[cfg(test)]
mod tests;

pub use authority::{AuthGrant, HttpSessionAuthority, Registration, SessionAuthority};
pub use error::{SessionError, SessionResult};
pub use oauth::{
    BrowserHandoff, CallbackOutcome, LoopbackHandoff, OAuthCallbackServer, PendingCallback,
    ProviderCallback,
};
pub use oauth_bridge::{
    oauth_machine, DiscoveryDocument, DiscoverySource, OAuthBridge, OAuthMachine,
    OAuthMachineInput, OAuthMachineState, Pkce, ProviderGrant,
};
pub use router::{AssumeComplete, Navigator, ProfileProbe, RoleRouter, Route};
pub use runtime::{SessionHandle, SessionRuntime};
pub use session::{SessionManager, SessionStateCallback};
pub use session_fsm::session_machine;
pub use session_fsm::{
    Session, SessionMachine, SessionMachineInput, SessionMachineState, SessionPhase,
    SessionStateChanged,
};

pub use bazaar_storage::{Role, RoleDescriptor, UserProfile};
