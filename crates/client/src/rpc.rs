//! RPC session manager.
//!
//! [`RpcClient`] owns the session for one recorder: it runs the login
//! handshake, numbers requests, attaches the session token, negotiates the
//! device's public key and runs encrypted calls through `system.multiSec`.
//!
//! ```text
//! New ──login probe──► LoginChallengeSent ──credentials──► Authenticated
//!  │                                                          │
//!  └──────────────direct success──────────────────────────────┤
//!                                                             ▼
//!                                                         LoggedOut
//! ```

use std::sync::Arc;

use protocol::digest::compute_login_password;
use protocol::error::{AuthError, ProtocolError, Result};
use protocol::hybrid;
use protocol::messages::{
    methods, EncryptInfo, EncryptedContent, LoginChallenge, RpcError, RpcRequest, RpcResponse,
};
use protocol::negotiation::NegotiationStore;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::modules::camera::{Camera, CameraModule};
use crate::modules::system::{SoftwareVersion, SystemInfo, SystemModule};
use crate::session::{ClientState, Session};
use crate::transport::{Endpoint, RpcTransport};

/// Client type announced at login.
pub const CLIENT_TYPE: &str = "Web3.0";

/// Login type announced at login.
pub const LOGIN_TYPE: &str = "Direct";

/// Keep-alive interval requested from the device, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 300;

/// Result of [`RpcClient::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// A regular response without an `error` object.
    Reply(RpcResponse),
    /// The device challenged a first-stage login probe.
    Challenge(RpcResponse),
}

impl SendOutcome {
    /// Returns the reply, turning a challenge into its error.
    pub fn into_reply(self) -> Result<RpcResponse> {
        match self {
            SendOutcome::Reply(response) => Ok(response),
            SendOutcome::Challenge(response) => Err(ProtocolError::Rpc(
                response
                    .error
                    .unwrap_or_else(|| RpcError::new(401, "login challenge")),
            )),
        }
    }
}

/// Session manager for one recorder connection.
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    session: Session,
    crypto: Arc<NegotiationStore>,
}

impl RpcClient {
    /// Creates a client with its own negotiation store.
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self::with_store(transport, Arc::new(NegotiationStore::new()))
    }

    /// Creates a client around an existing negotiation store.
    pub fn with_store(transport: Arc<dyn RpcTransport>, crypto: Arc<NegotiationStore>) -> Self {
        Self {
            transport,
            session: Session::new(),
            crypto,
        }
    }

    pub fn state(&self) -> ClientState {
        self.session.state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The negotiation store shared by this connection's calls.
    pub fn negotiation(&self) -> &Arc<NegotiationStore> {
        &self.crypto
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.has_token()
    }

    /// Adopts an existing session token.
    pub fn set_session(&self, token: impl Into<String>) {
        self.session.set_token(token.into());
    }

    /// Drops the session token and resets the request counter.
    pub fn clear_session(&self) {
        self.session.clear();
    }

    /// Builds, posts and decodes one request.
    ///
    /// `session` is attached only when `include_session` is set and a token
    /// is held. A device `error` is raised as [`ProtocolError::Rpc`], except
    /// for a challenge code answering a first-stage login probe (a login on
    /// the login endpoint sent without a session), which is handed back as
    /// [`SendOutcome::Challenge`].
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        endpoint: Endpoint,
        include_session: bool,
    ) -> Result<SendOutcome> {
        let first_stage =
            endpoint == Endpoint::Login && method == methods::LOGIN && !include_session;
        self.dispatch(method, params, endpoint, include_session, first_stage)
            .await
    }

    /// Shared body of [`send`](Self::send). `first_stage` marks a login probe
    /// whose challenge is returned instead of raised.
    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        endpoint: Endpoint,
        include_session: bool,
        first_stage: bool,
    ) -> Result<SendOutcome> {
        let (id, session) = self.session.begin_request(include_session);
        let request = RpcRequest::new(method)
            .with_params(params)
            .with_session(session)
            .with_id(id);

        let body = serde_json::to_vec(&request)
            .map_err(|e| ProtocolError::decode(format!("{method}: request serialization: {e}")))?;

        tracing::debug!(method, id, ?endpoint, "sending request");
        let reply = self.transport.post(endpoint, body).await?;
        let response = RpcResponse::from_slice(&reply)?;
        tracing::debug!(method, id = ?response.id, "received response");

        let Some(error) = &response.error else {
            return Ok(SendOutcome::Reply(response));
        };

        if first_stage && error.is_login_challenge() {
            return Ok(SendOutcome::Challenge(response));
        }

        tracing::debug!(method, code = error.code, "device returned error");
        Err(ProtocolError::Rpc(error.clone()))
    }

    /// Plain call on the regular endpoint. Requires a session.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<RpcResponse> {
        self.require_session()?;
        self.send(method, params, Endpoint::Rpc, true)
            .await?
            .into_reply()
    }

    /// Plain call decoded into `T`.
    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        self.call(method, params).await?.decode_payload(method)
    }

    /// Logs in, answering one challenge if the device issues it.
    ///
    /// Any previous session is dropped first, so a failed re-login leaves the
    /// client without a token and the probe starts a fresh request counter.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        if username.is_empty() {
            return Err(AuthError::MissingCredentials("username".to_string()).into());
        }

        self.session.clear();
        self.session.set_state(ClientState::New);
        let probe = json!({
            "userName": username,
            "password": "",
            "clientType": CLIENT_TYPE,
            "loginType": LOGIN_TYPE,
        });

        match self
            .dispatch(methods::LOGIN, Some(probe), Endpoint::Login, false, true)
            .await?
        {
            SendOutcome::Reply(response) => {
                tracing::info!("login accepted without challenge");
                self.finish_login(response)
            }
            SendOutcome::Challenge(response) => {
                self.session.set_state(ClientState::LoginChallengeSent);

                let challenge = LoginChallenge::from_response(&response).ok_or_else(|| {
                    AuthError::InvalidDigestHeader(
                        "login challenge lacks realm or random".to_string(),
                    )
                })?;
                tracing::debug!(realm = %challenge.realm, "answering login challenge");

                let answer = compute_login_password(username, password, &challenge)?;
                let credentials = json!({
                    "userName": username,
                    "password": answer,
                    "clientType": CLIENT_TYPE,
                    "loginType": LOGIN_TYPE,
                    "authorityType": challenge.encryption.as_deref().unwrap_or("Default"),
                });

                let outcome = self
                    .dispatch(methods::LOGIN, Some(credentials), Endpoint::Login, false, false)
                    .await;

                match outcome {
                    Ok(SendOutcome::Reply(response)) => {
                        tracing::info!("login accepted");
                        self.finish_login(response)
                    }
                    Ok(SendOutcome::Challenge(_)) => Err(AuthError::Rechallenge.into()),
                    Err(ProtocolError::Rpc(err)) if err.is_login_challenge() => {
                        tracing::warn!(code = err.code, "device challenged submitted credentials");
                        Err(AuthError::Rechallenge.into())
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn finish_login(&self, response: RpcResponse) -> Result<()> {
        if response.result_flag() == Some(false) {
            return Err(ProtocolError::decode(
                "global.login: device returned result=false without error",
            ));
        }

        let token = response
            .session
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ProtocolError::decode("global.login: response carries no session"))?;

        self.session.establish(token, response.id.unwrap_or(0));
        Ok(())
    }

    /// Fetches the device's public key and ciphers and stores them.
    pub async fn get_encryption_info(&self) -> Result<EncryptInfo> {
        let (id, session) = self.session.begin_request(true);
        let request = RpcRequest::new(methods::GET_ENCRYPT_INFO)
            .with_session(session)
            .with_id(id);
        let body = serde_json::to_vec(&request)?;

        tracing::debug!(method = methods::GET_ENCRYPT_INFO, id, "sending request");
        let reply = self.transport.post(Endpoint::OutsideCmd, body).await?;

        if let Some(error) = RpcResponse::from_slice(&reply).ok().and_then(|r| r.error) {
            tracing::debug!(code = error.code, "device refused encryption info");
            return Err(ProtocolError::Rpc(error));
        }

        let info: EncryptInfo = serde_json::from_slice(&reply).map_err(|e| {
            ProtocolError::decode(format!("{}: {e}", methods::GET_ENCRYPT_INFO))
        })?;

        self.crypto
            .update(info.asymmetric.clone(), info.cipher.clone(), &info.public_key)?;
        tracing::info!(
            asymmetric = %info.asymmetric,
            ciphers = ?info.cipher,
            "negotiated payload encryption"
        );
        Ok(info)
    }

    /// Runs `method` through the encrypted carrier and decodes the answer.
    ///
    /// Each call generates its own symmetric key; the response is only ever
    /// decrypted with the key of the call that sent the request.
    pub async fn send_encrypted<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: Value,
    ) -> Result<T> {
        self.require_session()?;
        let crypto = self.crypto.snapshot().ok_or_else(|| {
            ProtocolError::Precondition("payload encryption has not been negotiated".to_string())
        })?;

        let inner = json!({ "method": method, "params": payload });
        let (packet, key) = hybrid::encrypt(&inner, &crypto)?;
        tracing::debug!(method, cipher = %packet.cipher, "sending encrypted request");

        let params = serde_json::to_value(&packet)?;
        let response = self.call(methods::MULTI_SEC, Some(params)).await?;
        let content: EncryptedContent = response.decode_payload(method)?;

        let decrypted = key.decrypt(&content.content)?.ok_or_else(|| {
            ProtocolError::decode(format!("{method}: encrypted response could not be decrypted"))
        })?;

        decode_decrypted(method, decrypted)
    }

    /// `global.keepAlive`; returns the timeout granted by the device.
    pub async fn keep_alive(&self, timeout_secs: u64) -> Result<u64> {
        let response = self
            .call(
                methods::KEEP_ALIVE,
                Some(json!({ "timeout": timeout_secs, "active": true })),
            )
            .await?;

        Ok(response
            .payload()
            .and_then(|payload| payload.get("timeout"))
            .and_then(Value::as_u64)
            .unwrap_or(timeout_secs))
    }

    /// Ends the session.
    ///
    /// The remote logout is best effort; local state is cleared either way.
    pub async fn logout(&self) -> Result<()> {
        if self.session.has_token() {
            if let Err(err) = self.call(methods::LOGOUT, None).await {
                tracing::warn!("logout request failed: {}", err);
            }
        }

        self.session.clear();
        self.crypto.reset();
        self.session.set_state(ClientState::LoggedOut);
        tracing::info!("logged out");
        Ok(())
    }

    fn require_session(&self) -> Result<()> {
        if self.session.has_token() {
            Ok(())
        } else {
            Err(ProtocolError::Precondition("no active session".to_string()))
        }
    }

    pub fn cameras(&self) -> CameraModule<'_> {
        CameraModule::new(self)
    }

    pub fn system(&self) -> SystemModule<'_> {
        SystemModule::new(self)
    }

    /// All cameras with their connection state merged in.
    pub async fn get_all_cameras(&self) -> Result<Vec<Camera>> {
        self.cameras().get_all().await
    }

    /// Updates one camera and returns the refreshed list.
    pub async fn sec_set_camera(&self, camera: &Camera) -> Result<Vec<Camera>> {
        self.cameras().set(camera).await
    }

    pub async fn get_system_info(&self) -> Result<SystemInfo> {
        self.system().info().await
    }

    pub async fn get_software_version(&self) -> Result<SoftwareVersion> {
        self.system().software_version().await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("session", &self.session)
            .field("negotiated", &self.crypto.is_negotiated())
            .finish()
    }
}

/// Decodes a decrypted inner response.
///
/// An inner `error` is raised; otherwise `params`, then a non-boolean
/// `result`, then the whole value is decoded into `T`.
fn decode_decrypted<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let error: RpcError = serde_json::from_value(error.clone())
            .map_err(|e| ProtocolError::decode(format!("{method}: malformed error: {e}")))?;
        return Err(ProtocolError::Rpc(error));
    }

    let payload = match (value.get("params"), value.get("result")) {
        (Some(params), _) if !params.is_null() => params.clone(),
        (_, Some(result)) if !result.is_boolean() && !result.is_null() => result.clone(),
        _ => value,
    };

    serde_json::from_value(payload).map_err(|e| ProtocolError::decode(format!("{method}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Thing {
        x: i64,
    }

    #[test]
    fn test_decode_decrypted_prefers_params() {
        let value = json!({"result": true, "params": {"x": 1}});
        assert_eq!(decode_decrypted::<Thing>("m", value).unwrap(), Thing { x: 1 });
    }

    #[test]
    fn test_decode_decrypted_typed_result() {
        let value = json!({"result": {"x": 2}});
        assert_eq!(decode_decrypted::<Thing>("m", value).unwrap(), Thing { x: 2 });
    }

    #[test]
    fn test_decode_decrypted_whole_value() {
        let value = json!({"x": 3});
        assert_eq!(decode_decrypted::<Thing>("m", value).unwrap(), Thing { x: 3 });
    }

    #[test]
    fn test_decode_decrypted_raises_inner_error() {
        let value = json!({"result": false, "error": {"code": 268959743, "message": "Unknown error"}});
        let err = decode_decrypted::<Value>("m", value).unwrap_err();
        assert_eq!(err.rpc_code(), Some(268959743));
    }

    #[test]
    fn test_decode_decrypted_mismatch_is_decode_error() {
        let err = decode_decrypted::<Thing>("secGetThing", json!({"params": {"y": 1}})).unwrap_err();
        assert_eq!(err.rpc_code(), Some(-1));
        assert!(err.to_string().contains("secGetThing"));
    }

    #[test]
    fn test_challenge_outcome_into_reply_is_error() {
        let outcome = SendOutcome::Challenge(RpcResponse {
            error: Some(RpcError::new(401, "Unauthorized")),
            ..Default::default()
        });
        assert_eq!(outcome.into_reply().unwrap_err().rpc_code(), Some(401));
    }
}
