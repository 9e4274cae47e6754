//! JSON-over-HTTP transport to the recorder.
//!
//! [`RpcTransport`] is the seam between the session manager and the network:
//! it moves one serialized request to one of the logical endpoints and hands
//! back the raw response body. [`HttpTransport`] is the production
//! implementation; tests plug in an in-memory one.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use protocol::error::{ProtocolError, Result};
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::config::{Config, TransportConfig};

/// Logical device endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Login and challenge handshakes.
    Login,
    /// Regular calls.
    Rpc,
    /// Pre-authentication commands (encryption bootstrap).
    OutsideCmd,
}

/// Path suffix for each [`Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPaths {
    pub login: String,
    pub rpc: String,
    pub outside_cmd: String,
}

impl EndpointPaths {
    pub fn path(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Login => &self.login,
            Endpoint::Rpc => &self.rpc,
            Endpoint::OutsideCmd => &self.outside_cmd,
        }
    }
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for EndpointPaths {
    fn from(config: &TransportConfig) -> Self {
        Self {
            login: config.login_path.clone(),
            rpc: config.rpc_path.clone(),
            outside_cmd: config.outside_cmd_path.clone(),
        }
    }
}

/// Trait for request/response transports.
///
/// Implementations must apply their own timeout; the session manager never
/// waits on a call without one.
pub trait RpcTransport: Send + Sync {
    /// POSTs a JSON body to `endpoint` and returns the response body.
    fn post<'a>(
        &'a self,
        endpoint: Endpoint,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    paths: EndpointPaths,
}

impl HttpTransport {
    /// Creates a transport for `base_url` (`scheme://host:port`).
    pub fn new(base_url: &str, paths: EndpointPaths, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| ProtocolError::Transport(format!("invalid base URL {base_url}: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self {
            client,
            base,
            paths,
        })
    }

    /// Creates a transport from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.base_url(),
            EndpointPaths::from(&config.transport),
            config.transport.timeout(),
        )
    }

    /// Full URL of `endpoint`.
    pub fn url(&self, endpoint: Endpoint) -> Result<Url> {
        self.base
            .join(self.paths.path(endpoint))
            .map_err(|e| ProtocolError::Transport(format!("invalid endpoint path: {e}")))
    }

    async fn post_inner(&self, endpoint: Endpoint, body: Vec<u8>) -> Result<Vec<u8>> {
        let url = self.url(endpoint)?;
        tracing::trace!("POST {} ({} bytes)", url, body.len());

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::Transport(format!(
                "device answered HTTP {status}"
            )));
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(bytes.to_vec())
    }
}

impl RpcTransport for HttpTransport {
    fn post<'a>(
        &'a self,
        endpoint: Endpoint,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(self.post_inner(endpoint, body))
    }
}

/// Maps a reqwest failure onto the transport error kinds.
pub fn map_reqwest_error(err: reqwest::Error) -> ProtocolError {
    if err.is_timeout() {
        ProtocolError::Timeout(err.to_string())
    } else if err.is_decode() {
        ProtocolError::decode(err.to_string())
    } else {
        ProtocolError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn transport(base: &str, timeout: Duration) -> HttpTransport {
        HttpTransport::new(base, EndpointPaths::default(), timeout).unwrap()
    }

    #[test]
    fn test_endpoint_urls() {
        let transport = transport("http://10.0.0.2:8080", Duration::from_secs(5));
        assert_eq!(
            transport.url(Endpoint::Login).unwrap().as_str(),
            "http://10.0.0.2:8080/RPC2_Login"
        );
        assert_eq!(
            transport.url(Endpoint::Rpc).unwrap().as_str(),
            "http://10.0.0.2:8080/RPC2"
        );
        assert_eq!(
            transport.url(Endpoint::OutsideCmd).unwrap().as_str(),
            "http://10.0.0.2:8080/OutsideCmd"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpTransport::new("not a url", EndpointPaths::default(), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Transport(_)));
    }

    #[test]
    fn test_from_config_uses_configured_paths() {
        let mut config = Config::default();
        config.device.host = "nvr.local".to_string();
        config.transport.rpc_path = "/api/RPC2".to_string();

        let transport = HttpTransport::from_config(&config).unwrap();
        assert_eq!(
            transport.url(Endpoint::Rpc).unwrap().as_str(),
            "http://nvr.local/api/RPC2"
        );
    }

    #[tokio::test]
    async fn test_post_returns_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            assert!(request.starts_with("POST /RPC2 "));

            let body = r#"{"result":true,"id":1}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        let transport = transport(&format!("http://{addr}"), Duration::from_secs(5));
        let body = transport.post(Endpoint::Rpc, b"{}".to_vec()).await.unwrap();
        assert_eq!(body, br#"{"result":true,"id":1}"#);
    }

    #[tokio::test]
    async fn test_http_error_status_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let transport = transport(&format!("http://{addr}"), Duration::from_secs(5));
        let err = transport.post(Endpoint::Rpc, b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Transport(_)));
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let transport = transport(&format!("http://{addr}"), Duration::from_millis(200));
        let err = transport.post(Endpoint::Rpc, b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(_)), "got {err:?}");
    }
}
