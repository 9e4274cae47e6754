//! Device RPC modules.
//!
//! Each module is a lightweight view borrowing an [`RpcClient`](crate::rpc::RpcClient);
//! obtain one with [`RpcClient::cameras`](crate::rpc::RpcClient::cameras) or
//! [`RpcClient::system`](crate::rpc::RpcClient::system).

pub mod camera;
pub mod system;

pub use camera::{Camera, CameraModule, CameraState, DeviceInfo};
pub use system::{SoftwareVersion, SystemInfo, SystemModule};
