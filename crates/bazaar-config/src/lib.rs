//! Core configuration, paths and logging for the Bazaar session subsystem.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, OAuthSettings, DEFAULT_API_URL, DEFAULT_LOG_LEVEL, DEFAULT_OAUTH_CALLBACK_PORT,
    DEFAULT_OAUTH_ISSUER, DEFAULT_OAUTH_TIMEOUT_SECS, DEFAULT_VERIFY_TIMEOUT_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging_with_path;
pub use paths::Paths;
