//! Secure storage for recorder credentials.

pub mod keychain;

pub use keychain::{
    connection_identity, CredentialStore, KeychainBackend, KeychainError, KeychainResult,
    StoredCredentials,
};

#[cfg(not(test))]
pub use keychain::SystemKeychain;
