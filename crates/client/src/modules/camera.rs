//! Remote camera channels.

use std::collections::HashMap;

use protocol::error::Result;
use protocol::messages::methods;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::rpc::RpcClient;

/// Connection parameters of the camera behind a channel.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub http_port: u16,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default, rename = "SerialNo")]
    pub serial_number: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Fields this client does not model, kept for updates.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl std::fmt::Debug for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceInfo")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("device_type", &self.device_type)
            .field("name", &self.name)
            .field("vendor", &self.vendor)
            .field("serial_number", &self.serial_number)
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// One channel of the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub channel: i64,
    #[serde(rename = "Enable", default)]
    pub enabled: bool,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "DeviceInfo")]
    pub device_info: DeviceInfo,
    /// Merged from the plain connection-state call; never sent to the device.
    #[serde(skip)]
    pub connection_state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Camera {
    /// Copy without the stored camera password, for display.
    pub fn redacted(&self) -> Camera {
        let mut camera = self.clone();
        camera.device_info.password = None;
        camera
    }
}

#[derive(Debug, Default, Deserialize)]
struct CameraList {
    #[serde(default)]
    camera: Vec<Value>,
}

/// Connection state of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraState {
    pub channel: i64,
    #[serde(default)]
    pub connection_state: String,
}

#[derive(Debug, Default, Deserialize)]
struct CameraStates {
    #[serde(default)]
    states: Vec<CameraState>,
}

/// Camera operations, borrowed from an [`RpcClient`].
#[derive(Debug, Clone, Copy)]
pub struct CameraModule<'a> {
    client: &'a RpcClient,
}

impl<'a> CameraModule<'a> {
    pub fn new(client: &'a RpcClient) -> Self {
        Self { client }
    }

    /// Fetches all channels and merges in their connection state.
    ///
    /// The encrypted listing and the plain state query run concurrently.
    /// Entries without a usable `DeviceInfo` are dropped.
    pub async fn get_all(&self) -> Result<Vec<Camera>> {
        let (list, states) = tokio::try_join!(
            self.client
                .send_encrypted::<CameraList>(methods::SEC_GET_CAMERA_ALL, json!({})),
            self.states(),
        )?;

        Ok(merge_states(decode_cameras(list.camera), &states))
    }

    /// Plain connection-state query for every channel.
    pub async fn states(&self) -> Result<Vec<CameraState>> {
        let states: CameraStates = self
            .client
            .call_typed(
                methods::GET_CAMERA_STATE,
                Some(json!({ "uniqueChannels": [-1] })),
            )
            .await?;
        Ok(states.states)
    }

    /// Sends an encrypted update for `camera`, then re-fetches every channel.
    pub async fn set(&self, camera: &Camera) -> Result<Vec<Camera>> {
        self.client
            .send_encrypted::<Value>(methods::SEC_SET_CAMERA, json!({ "cameras": [camera] }))
            .await?;
        tracing::info!(channel = camera.channel, "camera updated");
        self.get_all().await
    }
}

fn decode_cameras(raw: Vec<Value>) -> Vec<Camera> {
    raw.into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let has_device_info = entry
                .get("DeviceInfo")
                .is_some_and(|info| !info.is_null());
            if !has_device_info {
                tracing::warn!(index, "dropping camera entry without DeviceInfo");
                return None;
            }

            match serde_json::from_value::<Camera>(entry) {
                Ok(camera) => Some(camera),
                Err(err) => {
                    tracing::warn!(index, "dropping undecodable camera entry: {}", err);
                    None
                }
            }
        })
        .collect()
}

fn merge_states(mut cameras: Vec<Camera>, states: &[CameraState]) -> Vec<Camera> {
    let by_channel: HashMap<i64, &str> = states
        .iter()
        .map(|state| (state.channel, state.connection_state.as_str()))
        .collect();

    for camera in &mut cameras {
        camera.connection_state = by_channel.get(&camera.channel).map(|s| s.to_string());
    }
    cameras
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(channel: i64, address: &str) -> Value {
        json!({
            "channel": channel,
            "Enable": true,
            "Type": "Remote",
            "VideoStream": "Main",
            "DeviceInfo": {
                "Address": address,
                "Port": 37777,
                "HttpPort": 80,
                "DeviceType": "IPC-HDW2431T",
                "Name": format!("Cam {channel}"),
                "Vendor": "Private",
                "SerialNo": format!("SN{channel}"),
                "UserName": "admin",
                "Password": "hunter2",
                "Mac": "00:11:22:33:44:55"
            }
        })
    }

    #[test]
    fn test_decode_camera_keeps_unknown_fields() {
        let cameras = decode_cameras(vec![entry(0, "10.0.0.10")]);
        assert_eq!(cameras.len(), 1);
        let camera = &cameras[0];
        assert_eq!(camera.channel, 0);
        assert!(camera.enabled);
        assert_eq!(camera.device_info.address, "10.0.0.10");
        assert_eq!(camera.device_info.serial_number, "SN0");
        assert_eq!(camera.extra.get("VideoStream"), Some(&json!("Main")));
        assert_eq!(camera.device_info.extra.get("Mac"), Some(&json!("00:11:22:33:44:55")));

        let back = serde_json::to_value(camera).unwrap();
        assert_eq!(back["DeviceInfo"]["Mac"], json!("00:11:22:33:44:55"));
        assert_eq!(back["VideoStream"], json!("Main"));
        assert!(back.get("connection_state").is_none());
    }

    #[test]
    fn test_decode_drops_missing_or_null_device_info() {
        let raw = vec![
            entry(0, "10.0.0.10"),
            json!({"channel": 1, "Enable": false, "DeviceInfo": null}),
            json!({"channel": 2, "Enable": false}),
            json!({"channel": 3, "DeviceInfo": {"Port": 1}}),
            entry(4, "10.0.0.14"),
        ];
        let channels: Vec<i64> = decode_cameras(raw).iter().map(|c| c.channel).collect();
        assert_eq!(channels, vec![0, 4]);
    }

    #[test]
    fn test_merge_states_by_channel() {
        let cameras = decode_cameras(vec![entry(0, "a"), entry(1, "b"), entry(2, "c")]);
        let states = vec![
            CameraState {
                channel: 2,
                connection_state: "Connected".into(),
            },
            CameraState {
                channel: 0,
                connection_state: "Unconnect".into(),
            },
        ];

        let merged = merge_states(cameras, &states);
        assert_eq!(merged[0].connection_state.as_deref(), Some("Unconnect"));
        assert_eq!(merged[1].connection_state, None);
        assert_eq!(merged[2].connection_state.as_deref(), Some("Connected"));
    }

    #[test]
    fn test_redacted_and_debug_hide_password() {
        let camera = decode_cameras(vec![entry(0, "a")]).remove(0);
        assert!(!format!("{camera:?}").contains("hunter2"));
        assert_eq!(camera.redacted().device_info.password, None);
        assert_eq!(camera.device_info.password.as_deref(), Some("hunter2"));
    }
}
