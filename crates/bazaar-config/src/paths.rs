//! File system paths used by the session subsystem.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory name under the user's home directory.
const BASE_DIR_NAME: &str = ".bazaar";
/// Credentials file name (the `@jwt`/`@role`/`@user` key-value store).
const CREDENTIALS_FILE_NAME: &str = "credentials.json";
/// Structured log file name under the logs directory.
const LOG_FILE_NAME: &str = "session.jsonl";

/// Resolves every on-disk location from a single base directory.
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Create a Paths instance rooted at `~/.bazaar`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Base directory (~/.bazaar).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Config file path (~/.bazaar/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Durable credential store (~/.bazaar/credentials.json).
    pub fn credentials_file(&self) -> PathBuf {
        self.base_dir.join(CREDENTIALS_FILE_NAME)
    }

    /// Logs directory (~/.bazaar/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Structured log file (~/.bazaar/logs/session.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Create the base and logs directories if missing.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
