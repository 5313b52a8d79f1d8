//! Durable storage for the Bazaar session subsystem.
//!
//! This crate provides:
//! - A small key-value storage abstraction with file and in-memory backends
//! - The persisted user model (`Role`, `UserProfile`)
//! - `CredentialStore`, the all-or-none projection of a session onto three keys

mod credentials;
mod file;
mod keys;
mod memory;
mod model;
mod traits;

pub use credentials::{CredentialOrigin, CredentialStore, PersistedCredentials};
pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use model::{Role, RoleDescriptor, UserProfile};
pub use traits::KeyValueStorage;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Blocking storage task failed to complete
    #[error("Storage task failed: {0}")]
    Task(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Encoding(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default durable storage backed by `path`.
pub fn create_storage(path: &Path) -> Arc<dyn KeyValueStorage> {
    let storage = FileStorage::new(path);
    tracing::debug!(path = %storage.path().display(), "Using file storage");
    Arc::new(storage)
}

/// Create a CredentialStore over the default durable storage.
pub fn create_credential_store(path: &Path) -> CredentialStore {
    CredentialStore::new(create_storage(path))
}
