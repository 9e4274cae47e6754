//! Error types for the protocol crate.

use thiserror::Error;

use crate::messages::RpcError;

/// Code used for locally synthesized decode failures.
pub const DECODE_ERROR_CODE: i64 = -1;

/// Failures of the hybrid encryption layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The negotiated public key string is malformed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// None of the client profiles is offered by the device.
    #[error("no supported cipher in server list {0:?}")]
    NoCipherMatch(Vec<String>),

    /// The OS entropy source failed.
    #[error("random generation failed: {0}")]
    RandomGenerationFailed(String),

    /// Block or RSA encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Encrypted content is not valid base64.
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// Key length does not match the selected profile.
    #[error("invalid key size: expected {expected} bytes, got {actual} bytes")]
    InvalidKeySize {
        /// Key length required by the profile.
        expected: usize,
        /// Key length supplied.
        actual: usize,
    },
}

/// Failures of the challenge-response authentication flows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The challenge header or payload lacks mandatory fields.
    #[error("invalid digest challenge: {0}")]
    InvalidDigestHeader(String),

    /// A credential field needed to answer the challenge is missing.
    #[error("missing credential: {0}")]
    MissingCredentials(String),

    /// The device challenged again after credentials were presented.
    #[error("authentication rejected: device issued a second challenge")]
    Rechallenge,

    /// The device asked for a password scheme this client does not speak.
    #[error("unsupported login scheme: {0}")]
    UnsupportedScheme(String),

    /// The digest challenge names a hash this client does not implement.
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Network or connectivity failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport gave up waiting for the device.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// An error reported by the device, or a locally synthesized decode
    /// failure carrying [`DECODE_ERROR_CODE`].
    #[error("rpc error {0}")]
    Rpc(RpcError),

    /// Key parsing, cipher negotiation or block cipher failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Authentication handshake failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A call was made in a state that does not allow it.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

/// Coarse classification of a [`ProtocolError`], used by callers to pick a
/// user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Decode,
    Remote,
    Crypto,
    Auth,
    Precondition,
}

impl ProtocolError {
    /// Builds the local decode failure `RpcError(-1, context)`.
    pub fn decode(context: impl Into<String>) -> Self {
        ProtocolError::Rpc(RpcError::new(DECODE_ERROR_CODE, context))
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Transport(_) | ProtocolError::Timeout(_) => ErrorKind::Transport,
            ProtocolError::Rpc(err) if err.code == DECODE_ERROR_CODE => ErrorKind::Decode,
            ProtocolError::Rpc(_) => ErrorKind::Remote,
            ProtocolError::Crypto(_) => ErrorKind::Crypto,
            ProtocolError::Auth(_) => ErrorKind::Auth,
            ProtocolError::Precondition(_) => ErrorKind::Precondition,
        }
    }

    /// Returns the remote error code, if this error carries one.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            ProtocolError::Rpc(err) => Some(err.code),
            _ => None,
        }
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<RpcError> for ProtocolError {
    fn from(err: RpcError) -> Self {
        ProtocolError::Rpc(err)
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::decode(err.to_string())
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => ProtocolError::Timeout(err.to_string()),
            _ => ProtocolError::Transport(err.to_string()),
        }
    }
}
