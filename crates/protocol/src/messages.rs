//! JSON envelopes exchanged with the recorder.
//!
//! Every call is a JSON object POSTed to one of the device endpoints. Regular
//! responses share one generic envelope; the encryption bootstrap call is the
//! only exception and is decoded straight into [`EncryptInfo`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Well-known RPC method names.
pub mod methods {
    /// Login probe and credential submission.
    pub const LOGIN: &str = "global.login";
    /// Session teardown.
    pub const LOGOUT: &str = "global.logout";
    /// Session keep-alive.
    pub const KEEP_ALIVE: &str = "global.keepAlive";
    /// Encryption bootstrap, served on the outside-command endpoint.
    pub const GET_ENCRYPT_INFO: &str = "Security.getEncryptInfo";
    /// Carrier method for every encrypted call.
    pub const MULTI_SEC: &str = "system.multiSec";
    /// Encrypted camera listing.
    pub const SEC_GET_CAMERA_ALL: &str = "LogicDeviceManager.secGetCameraAll";
    /// Encrypted camera update.
    pub const SEC_SET_CAMERA: &str = "LogicDeviceManager.secSetCamera";
    /// Plain camera connection states.
    pub const GET_CAMERA_STATE: &str = "LogicDeviceManager.getCameraState";
    /// Plain system information.
    pub const GET_SYSTEM_INFO: &str = "magicBox.getSystemInfo";
    /// Plain firmware version.
    pub const GET_SOFTWARE_VERSION: &str = "magicBox.getSoftwareVersion";
}

/// Error codes the device uses to announce a login challenge.
pub const LOGIN_CHALLENGE_CODES: [i64; 2] = [401, 268_632_079];

/// Request envelope.
///
/// `None` fields are left out of the serialized object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Remote method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Session token assigned at login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// Request identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Remote object handle, for instance-bound methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<i64>,
}

impl RpcRequest {
    /// Creates a request with no parameters, session or id.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
            session: None,
            id: None,
            object: None,
        }
    }

    /// Sets the parameters.
    pub fn with_params(mut self, params: Option<Value>) -> Self {
        self.params = params;
        self
    }

    /// Sets the session token.
    pub fn with_session(mut self, session: Option<String>) -> Self {
        self.session = session;
        self
    }

    /// Sets the request id.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the remote object handle.
    pub fn with_object(mut self, object: i64) -> Self {
        self.object = Some(object);
        self
    }
}

/// An error object, either reported by the device or synthesized locally.
///
/// Devices sometimes attach extra fields next to `code` and `message`
/// (challenge parameters, for instance); they are kept in `detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Device-assigned error code.
    pub code: i64,
    /// Human-readable reason.
    #[serde(default)]
    pub message: String,
    /// Any other fields of the error object.
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

impl RpcError {
    /// Creates an error without extra detail.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: Map::new(),
        }
    }

    /// Returns true when this code announces a login challenge.
    pub fn is_login_challenge(&self) -> bool {
        LOGIN_CHALLENGE_CODES.contains(&self.code)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Generic response envelope.
///
/// `result` is kept untyped: most methods answer `true`/`false` there, some
/// answer a payload, and a login challenge answers `false` where a payload
/// would otherwise be expected.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl RpcResponse {
    /// Parses a response body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| ProtocolError::decode(format!("malformed response envelope: {e}")))
    }

    /// Returns the boolean `result`, if `result` is a boolean.
    pub fn result_flag(&self) -> Option<bool> {
        self.result.as_ref().and_then(Value::as_bool)
    }

    /// Returns the typed payload: `params` when present, otherwise a
    /// non-boolean `result`. A boolean `result` never counts as payload.
    pub fn payload(&self) -> Option<&Value> {
        match (&self.params, &self.result) {
            (Some(params), _) if !params.is_null() => Some(params),
            (_, Some(result)) if !result.is_boolean() && !result.is_null() => Some(result),
            _ => None,
        }
    }

    /// Decodes the payload into `T`.
    ///
    /// `context` names the call in the decode error.
    pub fn decode_payload<T: DeserializeOwned>(&self, context: &str) -> Result<T> {
        let payload = self
            .payload()
            .ok_or_else(|| ProtocolError::decode(format!("{context}: response carries no payload")))?;
        serde_json::from_value(payload.clone())
            .map_err(|e| ProtocolError::decode(format!("{context}: {e}")))
    }

    /// Converts a device `error` into `Err`, passing the response through otherwise.
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(err) => Err(ProtocolError::Rpc(err)),
            None => Ok(self),
        }
    }
}

/// Parameters of the encrypted carrier call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPacket {
    /// Profile label, `"<NAME>-<bits>"`.
    pub cipher: String,
    /// RSA-wrapped symmetric key, hex.
    pub salt: String,
    /// AES ciphertext, base64.
    pub content: String,
}

/// Encrypted response parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EncryptedContent {
    pub content: String,
}

/// Answer of the encryption bootstrap call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptInfo {
    /// Asymmetric algorithm name, e.g. `"RPAC"`.
    pub asymmetric: String,
    /// Symmetric ciphers the device accepts.
    pub cipher: Vec<String>,
    /// Public key, `"N:<hex>,E:<hex>"`.
    #[serde(rename = "pub")]
    pub public_key: String,
}

/// Login challenge parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginChallenge {
    pub realm: String,
    /// Server nonce.
    pub random: String,
    /// Password scheme requested by the device; `None` means the default
    /// digest scheme.
    pub encryption: Option<String>,
}

impl LoginChallenge {
    /// Extracts a challenge from a login response.
    ///
    /// Parameters are looked up in `params` first and then in the error
    /// object, since devices differ in where they put them.
    pub fn from_response(response: &RpcResponse) -> Option<Self> {
        let from_params = response
            .params
            .as_ref()
            .and_then(Value::as_object)
            .and_then(Self::from_fields);

        from_params.or_else(|| {
            response
                .error
                .as_ref()
                .and_then(|err| Self::from_fields(&err.detail))
        })
    }

    fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);

        Some(Self {
            realm: text("realm")?,
            random: text("random").or_else(|| text("nonce"))?,
            encryption: text("encryption"),
        })
    }
}
