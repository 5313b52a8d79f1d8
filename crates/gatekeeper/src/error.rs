//! Session subsystem error types.

use thiserror::Error;

/// Session error type.
///
/// Every remote failure is caught at its call site and mapped onto one of
/// these variants; none escapes as a panic.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The authority answered but refused (bad credentials, revoked token,
    /// malformed response).
    #[error("Rejected by server: {0}")]
    RemoteRejected(String),

    /// The authority could not be reached.
    #[error("Server unreachable: {0}")]
    RemoteUnreachable(String),

    /// The user closed or declined the provider consent screen.
    #[error("Provider sign-in was cancelled")]
    OAuthAbandoned,

    /// A provider sign-in step failed.
    #[error("Provider sign-in failed: {0}")]
    OAuthFailed(String),

    /// A remote call exceeded its time budget
    #[error("Operation timed out")]
    Timeout,

    /// A newer sign-in, sign-out or validation replaced this operation
    #[error("Operation superseded by a newer session change")]
    Superseded,

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] bazaar_storage::StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this failure, coming from a sign-in or validation, leaves the
    /// session unauthenticated.
    pub fn revokes_session(&self) -> bool {
        matches!(
            self,
            SessionError::RemoteRejected(_)
                | SessionError::RemoteUnreachable(_)
                | SessionError::Timeout
                | SessionError::Storage(_)
        )
    }

    /// Text suitable for display next to a sign-in form.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::RemoteRejected(_) => {
                "We couldn't sign you in. Check your details and try again.".to_string()
            }
            SessionError::RemoteUnreachable(_) | SessionError::Timeout => {
                "We couldn't reach the server. Check your connection and try again.".to_string()
            }
            SessionError::OAuthAbandoned => "Sign-in was cancelled.".to_string(),
            SessionError::OAuthFailed(_) => {
                "Signing in with your provider failed. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<bazaar_config::CoreError> for SessionError {
    fn from(e: bazaar_config::CoreError) -> Self {
        SessionError::Config(e.to_string())
    }
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failures_revoke() {
        assert!(SessionError::RemoteRejected("401".into()).revokes_session());
        assert!(SessionError::RemoteUnreachable("dns".into()).revokes_session());
        assert!(SessionError::Timeout.revokes_session());
    }

    #[test]
    fn test_oauth_failures_do_not_revoke() {
        assert!(!SessionError::OAuthAbandoned.revokes_session());
        assert!(!SessionError::OAuthFailed("exchange".into()).revokes_session());
        assert!(!SessionError::Superseded.revokes_session());
    }

    #[test]
    fn test_unreachable_and_rejected_messages_differ() {
        let rejected = SessionError::RemoteRejected("401".into()).user_message();
        let unreachable = SessionError::RemoteUnreachable("dns".into()).user_message();
        assert_ne!(rejected, unreachable);
        assert!(unreachable.contains("reach"));
    }
}
