//! HTTP digest authentication for the CGI channel.
//!
//! The recorder's CGI resources sit behind RFC 2617 digest authentication.
//! [`DigestAuthenticator`] probes a resource without credentials, answers the
//! `401` challenge once, and fails if the device challenges again.

use std::time::Duration;

use protocol::digest::{generate_client_nonce, DigestChallenge, INITIAL_NONCE_COUNT};
use protocol::error::{AuthError, ProtocolError, Result};
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use url::Url;

use crate::config::Config;
use crate::transport::map_reqwest_error;

/// Authentication state of a [`DigestAuthenticator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
}

/// Digest-authenticated GET client.
pub struct DigestAuthenticator {
    http: reqwest::Client,
    username: String,
    password: String,
    state: AuthState,
}

impl DigestAuthenticator {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self {
            http,
            username: username.into(),
            password: password.into(),
            state: AuthState::Unauthenticated,
        })
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// GETs `url`, answering a digest challenge once, and returns the body.
    pub async fn get(&mut self, url: &str) -> Result<String> {
        let url = Url::parse(url)
            .map_err(|e| ProtocolError::Transport(format!("invalid URL {url}: {e}")))?;

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return self.accept(response).await;
        }

        let header = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AuthError::InvalidDigestHeader("401 without WWW-Authenticate".to_string())
            })?;
        let challenge = DigestChallenge::parse(header)?;
        tracing::debug!(realm = %challenge.realm, "answering digest challenge");

        let authorization = challenge.authorization(
            &self.username,
            &self.password,
            "GET",
            &request_uri(&url),
            &generate_client_nonce(),
            INITIAL_NONCE_COUNT,
        )?;

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.state = AuthState::Unauthenticated;
            return Err(AuthError::Rechallenge.into());
        }

        self.accept(response).await
    }

    async fn accept(&mut self, response: reqwest::Response) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::Transport(format!(
                "device answered HTTP {status}"
            )));
        }

        self.state = AuthState::Authenticated;
        response.text().await.map_err(map_reqwest_error)
    }
}

impl std::fmt::Debug for DigestAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestAuthenticator")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("state", &self.state)
            .finish()
    }
}

/// Path and query of `url`, as used for the digest `uri` field.
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Ordered `key=value` properties reported by a CGI resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProperties(Vec<(String, String)>);

impl DeviceProperties {
    /// Parses a `key=value` per line body. Lines without `=` are skipped.
    pub fn parse(body: &str) -> Self {
        Self(
            body.lines()
                .filter_map(|line| line.split_once('='))
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .filter(|(key, _)| !key.is_empty())
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Capability discovery over the digest-protected CGI channel.
pub async fn probe_system_info(config: &Config, password: &str) -> Result<DeviceProperties> {
    let url = format!("{}{}", config.base_url(), config.transport.probe_path);
    let mut authenticator = DigestAuthenticator::new(
        config.device.username.clone(),
        password,
        config.transport.timeout(),
    )?;

    let body = authenticator.get(&url).await?;
    let properties = DeviceProperties::parse(&body);
    tracing::info!(count = properties.len(), "probed device properties");
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_uri_keeps_query() {
        let url = Url::parse("http://h/cgi-bin/magicBox.cgi?action=getSystemInfo").unwrap();
        assert_eq!(request_uri(&url), "/cgi-bin/magicBox.cgi?action=getSystemInfo");
        let url = Url::parse("http://h/cgi-bin/x").unwrap();
        assert_eq!(request_uri(&url), "/cgi-bin/x");
    }

    #[test]
    fn test_device_properties_parse() {
        let body = "deviceType=NVR4108\r\nprocessor=ST7108\r\n\r\nserialNumber = ABC=1\r\ngarbage\n";
        let props = DeviceProperties::parse(body);
        assert_eq!(props.len(), 3);
        assert_eq!(props.get("deviceType"), Some("NVR4108"));
        assert_eq!(props.get("serialNumber"), Some("ABC=1"));
        assert_eq!(
            props.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            vec!["deviceType", "processor", "serialNumber"]
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let auth = DigestAuthenticator::new("admin", "topsecret", Duration::from_secs(1)).unwrap();
        let debug = format!("{auth:?}");
        assert!(!debug.contains("topsecret"));
        assert_eq!(auth.state(), AuthState::Unauthenticated);
    }
}
