//! # nvrlink Client Library
//!
//! Authenticated, encrypted RPC client for network video recorders.
//!
//! ## Modules
//!
//! - [`rpc`]: Session manager (login, plain and encrypted calls, logout)
//! - [`session`]: Session token, request counter and login state
//! - [`transport`]: JSON-over-HTTP transport
//! - [`auth`]: Digest-authenticated CGI access and capability probe
//! - [`modules`]: Camera and system RPC modules
//! - [`storage`]: Keychain-backed credential store
//! - [`config`]: TOML configuration

pub mod auth;
pub mod config;
pub mod modules;
pub mod rpc;
pub mod session;
pub mod storage;
pub mod transport;

pub use auth::{probe_system_info, AuthState, DeviceProperties, DigestAuthenticator};
pub use config::{default_config_path, Config, ConfigError};
pub use modules::{Camera, CameraState, DeviceInfo, SoftwareVersion, SystemInfo};
pub use rpc::{RpcClient, SendOutcome};
pub use session::{ClientState, Session};
pub use transport::{Endpoint, EndpointPaths, HttpTransport, RpcTransport};
