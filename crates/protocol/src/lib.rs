//! # nvrlink Protocol Library
//!
//! Wire types and cryptographic primitives for talking to network video
//! recorders over their JSON RPC interface.
//!
//! ## Overview
//!
//! - **Message Definitions**: request/response envelopes and method names
//! - **Negotiation**: the device's advertised public key and cipher list
//! - **Hybrid Encryption**: per-call AES keys wrapped with raw RSA
//! - **Digest Authentication**: HTTP digest and RPC login credential math
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Inner RPC request             │  {method, params}
//! ├─────────────────────────────────────────┤
//! │      AES (RPAC-256 CBC / AES-128 ECB)   │  zero IV, zero padding
//! ├─────────────────────────────────────────┤
//! │     system.multiSec {salt,cipher,..}    │  salt = RSA-wrapped key
//! ├─────────────────────────────────────────┤
//! │            JSON over HTTP               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{hybrid, NegotiationStore};
//! use serde_json::json;
//!
//! let store = NegotiationStore::new();
//! store
//!     .update("RPAC", vec!["AES-128".into(), "RPAC-256".into()], "N:c5a7,E:3")
//!     .unwrap();
//!
//! let crypto = store.snapshot().unwrap();
//! let (packet, key) = hybrid::encrypt(&json!({"method": "x"}), &crypto).unwrap();
//! assert_eq!(packet.cipher, "RPAC-256");
//! assert_eq!(key.decrypt(&packet.content).unwrap(), Some(json!({"method": "x"})));
//! ```
//!
//! ## Modules
//!
//! - [`bigint`]: Hex and modular arithmetic helpers
//! - [`negotiation`]: Negotiated crypto snapshot store
//! - [`hybrid`]: Payload encryption and decryption
//! - [`digest`]: Challenge-response credential computation
//! - [`messages`]: Protocol message definitions
//! - [`error`]: Error types

pub mod bigint;
pub mod digest;
pub mod error;
pub mod hybrid;
pub mod messages;
pub mod negotiation;

pub use digest::{compute_digest_response, compute_login_password, DigestAlgorithm, DigestChallenge};
pub use error::{AuthError, CryptoError, ErrorKind, ProtocolError, Result, DECODE_ERROR_CODE};
pub use hybrid::{CryptoProfile, EphemeralKey};
pub use messages::{
    EncryptInfo, EncryptedPacket, LoginChallenge, RpcError, RpcRequest, RpcResponse,
};
pub use negotiation::{NegotiatedCrypto, NegotiationStore};
