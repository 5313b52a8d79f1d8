//! Persisted session credentials.
//!
//! The token, role and user profile are stored under three independent keys
//! (`@jwt`, `@role`, `@user`), each JSON-encoded. A recoverable session needs
//! all three keys present and mutually consistent; anything else is purged on
//! load. `save` refuses what `load` would purge.
//!
//! An optional fourth key, `@origin`, records whether the token came from the
//! identity provider. It is written and cleared with the other three.

use crate::{KeyValueStorage, Role, StorageError, StorageKeys, StorageResult, UserProfile};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a persisted token was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialOrigin {
    /// Marketplace login or registration.
    #[default]
    Password,
    /// Identity provider sign-in; the token is revocable at the provider.
    Provider,
}

/// The durable projection of a session. Constructed whole, saved whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCredentials {
    pub token: String,
    pub role: Role,
    pub user: UserProfile,
    #[serde(default)]
    pub origin: CredentialOrigin,
}

impl PersistedCredentials {
    pub fn new(token: impl Into<String>, role: Role, user: UserProfile) -> Self {
        Self {
            token: token.into(),
            role,
            user,
            origin: CredentialOrigin::Password,
        }
    }

    pub fn with_origin(mut self, origin: CredentialOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// The rules `load` applies before accepting stored credentials.
    fn check(&self) -> Result<(), String> {
        if self.token.trim().is_empty() {
            return Err("token: empty".to_string());
        }
        if self.user.role() != self.role {
            return Err(format!(
                "role mismatch: stored {} but user carries {}",
                self.role,
                self.user.role()
            ));
        }
        Ok(())
    }
}

/// Async facade over a blocking key-value backend.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Write all three fields and the origin marker.
    ///
    /// Credentials that `load` would reject are refused with
    /// `StorageError::Encoding` and nothing is written.
    pub async fn save(&self, credentials: PersistedCredentials) -> StorageResult<()> {
        credentials.check().map_err(StorageError::Encoding)?;

        let storage = self.storage.clone();
        run_blocking(move || {
            let entries = [
                (StorageKeys::TOKEN, serde_json::to_string(&credentials.token)?),
                (StorageKeys::ROLE, serde_json::to_string(&credentials.role)?),
                (StorageKeys::USER, serde_json::to_string(&credentials.user)?),
                (StorageKeys::ORIGIN, serde_json::to_string(&credentials.origin)?),
            ];
            storage.set_many(&entries)?;
            debug!(
                user_id = %credentials.user.id,
                role = %credentials.role,
                origin = ?credentials.origin,
                "Credentials saved"
            );
            Ok(())
        })
        .await
    }

    /// Read the stored credentials.
    ///
    /// Returns `Ok(None)` when nothing usable is stored. Partial, unparsable
    /// or inconsistent entries are purged before returning `Ok(None)`.
    pub async fn load(&self) -> StorageResult<Option<PersistedCredentials>> {
        let storage = self.storage.clone();
        run_blocking(move || {
            let token = storage.get(StorageKeys::TOKEN)?;
            let role = storage.get(StorageKeys::ROLE)?;
            let user = storage.get(StorageKeys::USER)?;

            let (token, role, user) = match (token, role, user) {
                (None, None, None) => {
                    if storage.has(StorageKeys::ORIGIN)? {
                        debug!("Stray origin marker without credentials, purging");
                        storage.delete(StorageKeys::ORIGIN)?;
                    }
                    return Ok(None);
                }
                (Some(token), Some(role), Some(user)) => (token, role, user),
                _ => {
                    warn!("Partial credentials found in storage, purging");
                    storage.delete_many(&StorageKeys::ALL)?;
                    return Ok(None);
                }
            };
            let origin = storage.get(StorageKeys::ORIGIN)?;

            match decode(&token, &role, &user, origin.as_deref()) {
                Ok(credentials) => Ok(Some(credentials)),
                Err(reason) => {
                    warn!(reason = %reason, "Stored credentials are corrupt, purging");
                    storage.delete_many(&StorageKeys::ALL)?;
                    Ok(None)
                }
            }
        })
        .await
    }

    /// Remove all three keys. Idempotent.
    pub async fn clear(&self) -> StorageResult<()> {
        let storage = self.storage.clone();
        run_blocking(move || {
            storage.delete_many(&StorageKeys::ALL)?;
            debug!("Credentials cleared");
            Ok(())
        })
        .await
    }
}

fn decode(
    token: &str,
    role: &str,
    user: &str,
    origin: Option<&str>,
) -> Result<PersistedCredentials, String> {
    let token: String = serde_json::from_str(token).map_err(|e| format!("token: {}", e))?;
    let role: Role = serde_json::from_str(role).map_err(|e| format!("role: {}", e))?;
    let user: UserProfile = serde_json::from_str(user).map_err(|e| format!("user: {}", e))?;
    let origin: CredentialOrigin = match origin {
        Some(origin) => serde_json::from_str(origin).map_err(|e| format!("origin: {}", e))?,
        None => CredentialOrigin::Password,
    };

    let credentials = PersistedCredentials {
        token,
        role,
        user,
        origin,
    };
    credentials.check()?;
    Ok(credentials)
}

async fn run_blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileStorage, MemoryStorage, RoleDescriptor};

    fn user(role: Role) -> UserProfile {
        UserProfile {
            id: "42".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            role: RoleDescriptor::new(role),
        }
    }

    fn store() -> (Arc<MemoryStorage>, CredentialStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage.clone());
        (storage, store)
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let (_, store) = store();
        for role in Role::ALL {
            let credentials = PersistedCredentials::new("abc", role, user(role));
            store.save(credentials.clone()).await.unwrap();
            assert_eq!(store.load().await.unwrap(), Some(credentials));
        }
    }

    #[tokio::test]
    async fn test_values_are_json_encoded() {
        let (storage, store) = store();
        store
            .save(PersistedCredentials::new("abc", Role::Admin, user(Role::Admin)))
            .await
            .unwrap();

        assert_eq!(storage.get("@jwt").unwrap().as_deref(), Some("\"abc\""));
        assert_eq!(storage.get("@role").unwrap().as_deref(), Some("\"admin\""));
        assert!(storage.get("@user").unwrap().unwrap().contains("\"username\":\"alice\""));
    }

    #[tokio::test]
    async fn test_provider_origin_roundtrip() {
        let (storage, store) = store();
        let credentials = PersistedCredentials::new("ya29.token", Role::Client, user(Role::Client))
            .with_origin(CredentialOrigin::Provider);
        store.save(credentials.clone()).await.unwrap();

        assert_eq!(storage.get("@origin").unwrap().as_deref(), Some("\"provider\""));
        assert_eq!(store.load().await.unwrap(), Some(credentials));
    }

    #[tokio::test]
    async fn test_missing_origin_means_password() {
        let (storage, store) = store();
        storage.set("@jwt", "\"abc\"").unwrap();
        storage.set("@role", "\"client\"").unwrap();
        storage
            .set("@user", &serde_json::to_string(&user(Role::Client)).unwrap())
            .unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.origin, CredentialOrigin::Password);
    }

    #[tokio::test]
    async fn test_stray_origin_is_purged() {
        let (storage, store) = store();
        storage.set("@origin", "\"provider\"").unwrap();

        assert_eq!(store.load().await.unwrap(), None);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_role_mismatch() {
        let (storage, store) = store();
        let result = store
            .save(PersistedCredentials::new("abc", Role::Admin, user(Role::Client)))
            .await;

        assert!(matches!(result, Err(StorageError::Encoding(_))));
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_blank_token() {
        let (storage, store) = store();
        for token in ["", "   "] {
            let result = store
                .save(PersistedCredentials::new(token, Role::Client, user(Role::Client)))
                .await;
            assert!(matches!(result, Err(StorageError::Encoding(_))));
        }
        assert!(storage.is_empty());
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejected_save_keeps_previous_credentials() {
        let (_, store) = store();
        let credentials = PersistedCredentials::new("abc", Role::Company, user(Role::Company));
        store.save(credentials.clone()).await.unwrap();

        let result = store
            .save(PersistedCredentials::new("def", Role::Client, user(Role::Admin)))
            .await;
        assert!(result.is_err());
        assert_eq!(store.load().await.unwrap(), Some(credentials));
    }

    #[tokio::test]
    async fn test_load_empty_store() {
        let (_, store) = store();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_removes_everything_and_is_idempotent() {
        let (storage, store) = store();
        store
            .save(PersistedCredentials::new("abc", Role::Client, user(Role::Client)))
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(storage.is_empty());
        assert_eq!(store.load().await.unwrap(), None);

        store
            .save(
                PersistedCredentials::new("ghi", Role::Client, user(Role::Client))
                    .with_origin(CredentialOrigin::Provider),
            )
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(storage.is_empty());

        store.clear().await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_partial_credentials_are_purged() {
        let (storage, store) = store();
        storage.set("@jwt", "\"abc\"").unwrap();
        storage.set("@role", "\"client\"").unwrap();

        assert_eq!(store.load().await.unwrap(), None);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_user_is_purged() {
        let (storage, store) = store();
        storage.set("@jwt", "\"abc\"").unwrap();
        storage.set("@role", "\"client\"").unwrap();
        storage.set("@user", "{ this is not json").unwrap();

        assert_eq!(store.load().await.unwrap(), None);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_unquoted_token_is_purged() {
        let (storage, store) = store();
        storage.set("@jwt", "abc").unwrap();
        storage.set("@role", "\"client\"").unwrap();
        storage
            .set("@user", &serde_json::to_string(&user(Role::Client)).unwrap())
            .unwrap();

        assert_eq!(store.load().await.unwrap(), None);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_role_mismatch_is_purged() {
        let (storage, store) = store();
        storage.set("@jwt", "\"abc\"").unwrap();
        storage.set("@role", "\"admin\"").unwrap();
        storage
            .set("@user", &serde_json::to_string(&user(Role::Client)).unwrap())
            .unwrap();

        assert_eq!(store.load().await.unwrap(), None);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let credentials = PersistedCredentials::new("abc", Role::Company, user(Role::Company));

        CredentialStore::new(Arc::new(FileStorage::new(&path)))
            .save(credentials.clone())
            .await
            .unwrap();

        let reopened = crate::create_credential_store(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(credentials));
    }
}
