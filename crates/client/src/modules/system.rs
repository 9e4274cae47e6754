//! Device identity and firmware queries.

use protocol::error::Result;
use protocol::messages::methods;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rpc::RpcClient;

/// Answer of `magicBox.getSystemInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub processor: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub update_serial: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Firmware version details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SoftwareVersion {
    pub version: String,
    #[serde(default)]
    pub build_date: String,
    #[serde(default)]
    pub web_version: String,
    #[serde(default)]
    pub security_base_line_version: String,
}

#[derive(Debug, Deserialize)]
struct SoftwareVersionReply {
    version: SoftwareVersion,
}

/// System queries, borrowed from an [`RpcClient`].
#[derive(Debug, Clone, Copy)]
pub struct SystemModule<'a> {
    client: &'a RpcClient,
}

impl<'a> SystemModule<'a> {
    pub fn new(client: &'a RpcClient) -> Self {
        Self { client }
    }

    pub async fn info(&self) -> Result<SystemInfo> {
        self.client.call_typed(methods::GET_SYSTEM_INFO, None).await
    }

    pub async fn software_version(&self) -> Result<SoftwareVersion> {
        let reply: SoftwareVersionReply = self
            .client
            .call_typed(methods::GET_SOFTWARE_VERSION, None)
            .await?;
        Ok(reply.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_info_decodes_known_and_extra_fields() {
        let info: SystemInfo = serde_json::from_value(json!({
            "deviceType": "DHI-NVR4108HS-4KS2",
            "processor": "ST7108",
            "serialNumber": "6G0123PAZ00001",
            "updateSerial": "NVR4XXX-4KS2",
            "hardwareVersion": "1.00"
        }))
        .unwrap();
        assert_eq!(info.device_type, "DHI-NVR4108HS-4KS2");
        assert_eq!(info.serial_number, "6G0123PAZ00001");
        assert_eq!(info.extra.get("hardwareVersion"), Some(&json!("1.00")));
    }

    #[test]
    fn test_software_version_reply() {
        let reply: SoftwareVersionReply = serde_json::from_value(json!({
            "version": {
                "Version": "4.001.0000000.3",
                "BuildDate": "2021-01-20",
                "WebVersion": "3.2.1.935178"
            }
        }))
        .unwrap();
        assert_eq!(reply.version.version, "4.001.0000000.3");
        assert_eq!(reply.version.build_date, "2021-01-20");
        assert_eq!(reply.version.security_base_line_version, "");
    }
}
