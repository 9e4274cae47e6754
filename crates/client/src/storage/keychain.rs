//! Keychain integration for recorder credentials.
//!
//! Credentials are stored as one JSON blob per connection identity
//! (`user@host:port`) using the `keyring` crate:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (via D-Bus)

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The service name used for keychain entries.
const SERVICE_NAME: &str = "nvrlink";

/// Errors that can occur during keychain operations.
#[derive(Debug, Error)]
pub enum KeychainError {
    /// The requested entry was not found in the keychain.
    #[error("Credentials not found in keychain: {0}")]
    NotFound(String),

    /// Access to the keychain was denied.
    #[error("Keychain access denied: {0}")]
    AccessDenied(String),

    /// The keychain service is unavailable.
    #[error("Keychain service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The stored blob could not be encoded or decoded.
    #[error("Credential encoding error: {0}")]
    EncodingError(String),

    /// A platform-specific keychain error occurred.
    #[error("Keychain error: {0}")]
    PlatformError(String),
}

/// Result type for keychain operations.
pub type KeychainResult<T> = Result<T, KeychainError>;

/// Trait for keychain backend implementations.
pub trait KeychainBackend: Send + Sync {
    /// Retrieve a secret from the keychain.
    fn get_secret(&self, service: &str, key: &str) -> KeychainResult<String>;

    /// Store a secret in the keychain.
    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeychainResult<()>;

    /// Delete a secret from the keychain.
    fn delete_secret(&self, service: &str, key: &str) -> KeychainResult<()>;
}

/// Keychain backend using the system keychain.
#[cfg(not(test))]
pub struct SystemKeychain;

#[cfg(not(test))]
fn map_keyring_error(err: keyring::Error, key: &str) -> KeychainError {
    match err {
        keyring::Error::NoEntry => KeychainError::NotFound(key.to_string()),
        keyring::Error::NoStorageAccess(_) => {
            KeychainError::AccessDenied("No storage access".to_string())
        }
        keyring::Error::PlatformFailure(_) => {
            KeychainError::ServiceUnavailable("Platform failure".to_string())
        }
        keyring::Error::TooLong(_, _) => KeychainError::EncodingError("Value too long".to_string()),
        keyring::Error::Invalid(_, _) => {
            KeychainError::EncodingError("Invalid entry attribute".to_string())
        }
        keyring::Error::Ambiguous(_) => {
            KeychainError::PlatformError("Ambiguous keychain entry".to_string())
        }
        other => KeychainError::PlatformError(other.to_string()),
    }
}

#[cfg(not(test))]
impl KeychainBackend for SystemKeychain {
    fn get_secret(&self, service: &str, key: &str) -> KeychainResult<String> {
        let entry = keyring::Entry::new(service, key)
            .map_err(|e| KeychainError::PlatformError(e.to_string()))?;
        entry.get_password().map_err(|e| map_keyring_error(e, key))
    }

    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeychainResult<()> {
        let entry = keyring::Entry::new(service, key)
            .map_err(|e| KeychainError::PlatformError(e.to_string()))?;
        entry.set_password(value).map_err(|e| map_keyring_error(e, key))
    }

    fn delete_secret(&self, service: &str, key: &str) -> KeychainResult<()> {
        let entry = keyring::Entry::new(service, key)
            .map_err(|e| KeychainError::PlatformError(e.to_string()))?;
        entry.delete_credential().map_err(|e| map_keyring_error(e, key))
    }
}

/// Mock keychain backend for testing.
#[cfg(test)]
#[derive(Default)]
pub struct MockKeychain {
    storage: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl MockKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_key(service: &str, key: &str) -> String {
        format!("{}:{}", service, key)
    }
}

#[cfg(test)]
impl KeychainBackend for MockKeychain {
    fn get_secret(&self, service: &str, key: &str) -> KeychainResult<String> {
        let storage = self.storage.lock().unwrap();
        storage
            .get(&Self::make_key(service, key))
            .cloned()
            .ok_or_else(|| KeychainError::NotFound(key.to_string()))
    }

    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeychainResult<()> {
        let mut storage = self.storage.lock().unwrap();
        storage.insert(Self::make_key(service, key), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, service: &str, key: &str) -> KeychainResult<()> {
        let mut storage = self.storage.lock().unwrap();
        match storage.remove(&Self::make_key(service, key)) {
            Some(_) => Ok(()),
            None => Err(KeychainError::NotFound(key.to_string())),
        }
    }
}

/// Account credentials for one recorder.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub username: String,
    pub password: String,
}

impl StoredCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Connection identity used as the keychain entry name.
pub fn connection_identity(username: &str, host: &str, port: u16) -> String {
    format!("{username}@{host}:{port}")
}

/// Credential store keyed by connection identity.
pub struct CredentialStore<B: KeychainBackend> {
    backend: B,
    service: String,
}

impl<B: KeychainBackend> CredentialStore<B> {
    /// Create a store with the given backend.
    pub fn new(backend: B) -> Self {
        Self::with_service(backend, SERVICE_NAME)
    }

    /// Create a store with a custom service name.
    pub fn with_service(backend: B, service: impl Into<String>) -> Self {
        Self {
            backend,
            service: service.into(),
        }
    }

    /// Stores `credentials` under `identity`, replacing any previous entry.
    pub fn put(&self, identity: &str, credentials: &StoredCredentials) -> KeychainResult<()> {
        let blob = serde_json::to_string(credentials)
            .map_err(|e| KeychainError::EncodingError(e.to_string()))?;
        self.backend.set_secret(&self.service, identity, &blob)?;
        tracing::debug!("Stored credentials for {}", identity);
        Ok(())
    }

    pub fn get(&self, identity: &str) -> KeychainResult<StoredCredentials> {
        let blob = self.backend.get_secret(&self.service, identity)?;
        serde_json::from_str(&blob).map_err(|e| KeychainError::EncodingError(e.to_string()))
    }

    pub fn delete(&self, identity: &str) -> KeychainResult<()> {
        self.backend.delete_secret(&self.service, identity)
    }

    /// Check if credentials exist for `identity`.
    pub fn contains(&self, identity: &str) -> bool {
        self.get(identity).is_ok()
    }
}

#[cfg(not(test))]
impl CredentialStore<SystemKeychain> {
    /// Create a store backed by the system keychain.
    pub fn system() -> Self {
        Self::new(SystemKeychain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> CredentialStore<MockKeychain> {
        CredentialStore::new(MockKeychain::new())
    }

    #[test]
    fn test_put_and_get() {
        let store = create_test_store();
        let identity = connection_identity("admin", "10.0.0.2", 80);
        let credentials = StoredCredentials::new("admin", "pa55word");

        store.put(&identity, &credentials).unwrap();
        assert_eq!(store.get(&identity).unwrap(), credentials);
        assert!(store.contains(&identity));
    }

    #[test]
    fn test_identity_format() {
        assert_eq!(connection_identity("admin", "nvr.local", 8080), "admin@nvr.local:8080");
    }

    #[test]
    fn test_get_missing() {
        let store = create_test_store();
        assert!(matches!(store.get("nobody@x:1"), Err(KeychainError::NotFound(_))));
        assert!(!store.contains("nobody@x:1"));
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        store.put("a@b:1", &StoredCredentials::new("a", "p")).unwrap();
        store.delete("a@b:1").unwrap();
        assert!(matches!(store.get("a@b:1"), Err(KeychainError::NotFound(_))));
        assert!(matches!(store.delete("a@b:1"), Err(KeychainError::NotFound(_))));
    }

    #[test]
    fn test_overwrite() {
        let store = create_test_store();
        store.put("a@b:1", &StoredCredentials::new("a", "old")).unwrap();
        store.put("a@b:1", &StoredCredentials::new("a", "new")).unwrap();
        assert_eq!(store.get("a@b:1").unwrap().password, "new");
    }

    #[test]
    fn test_corrupt_blob_is_encoding_error() {
        let backend = MockKeychain::new();
        backend.set_secret(SERVICE_NAME, "a@b:1", "not json").unwrap();
        let store = CredentialStore::new(backend);
        assert!(matches!(store.get("a@b:1"), Err(KeychainError::EncodingError(_))));
    }

    #[test]
    fn test_custom_service_is_isolated() {
        let store = CredentialStore::with_service(MockKeychain::new(), "other");
        store.put("a@b:1", &StoredCredentials::new("a", "p")).unwrap();
        assert!(store.backend.get_secret(SERVICE_NAME, "a@b:1").is_err());
        assert!(store.backend.get_secret("other", "a@b:1").is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", StoredCredentials::new("admin", "s3cret"));
        assert!(debug.contains("admin"));
        assert!(!debug.contains("s3cret"));
    }
}
