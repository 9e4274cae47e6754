//! Digest challenge-response credentials.
//!
//! Two flavours are used against the recorder:
//! - HTTP digest (RFC 2069/2617, plus the RFC 7616 SHA-256 variant) on the
//!   CGI channel used for capability discovery,
//! - the RPC login hash, which answers a `realm`/`random` challenge carried in
//!   a JSON error payload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::Md5;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::AuthError;
use crate::messages::LoginChallenge;

/// Length of a generated client nonce.
pub const CLIENT_NONCE_LENGTH: usize = 8;

/// Nonce count sent with the single credential submission.
pub const INITIAL_NONCE_COUNT: u32 = 1;

/// Hash used for the digest computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Parses the `algorithm` challenge parameter; `None` means MD5.
    pub fn from_param(param: Option<&str>) -> Result<Self, AuthError> {
        match param.map(str::to_ascii_uppercase).as_deref() {
            None | Some("MD5") => Ok(DigestAlgorithm::Md5),
            Some("SHA-256") => Ok(DigestAlgorithm::Sha256),
            Some(_) => Err(AuthError::UnsupportedAlgorithm(
                param.unwrap_or_default().to_string(),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha256 => "SHA-256",
        }
    }

    /// Lowercase hex digest of `input`.
    pub fn hex(&self, input: &str) -> String {
        match self {
            DigestAlgorithm::Md5 => hex::encode(Md5::digest(input.as_bytes())),
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parses a challenge header value.
    ///
    /// The leading `Digest` scheme token is optional. Values may be quoted or
    /// bare; parameter names are case-insensitive.
    pub fn parse(header: &str) -> Result<Self, AuthError> {
        let mut rest = header.trim();
        if let Some((scheme, tail)) = rest.split_once(char::is_whitespace) {
            if scheme.eq_ignore_ascii_case("digest") {
                rest = tail;
            }
        }

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = None;

        for (key, value) in parse_params(rest) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                _ => {}
            }
        }

        let realm =
            realm.ok_or_else(|| AuthError::InvalidDigestHeader("missing realm".to_string()))?;
        let nonce =
            nonce.ok_or_else(|| AuthError::InvalidDigestHeader("missing nonce".to_string()))?;

        Ok(Self {
            realm,
            nonce,
            qop,
            opaque,
            algorithm,
        })
    }

    /// The qop to answer with: `auth` when offered, else none.
    pub fn selected_qop(&self) -> Option<&'static str> {
        self.qop.as_deref().and_then(|offered| {
            offered
                .split(',')
                .map(str::trim)
                .any(|q| q.eq_ignore_ascii_case("auth"))
                .then_some("auth")
        })
    }

    /// Renders the `Authorization` header value answering this challenge.
    pub fn authorization(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        client_nonce: &str,
        nonce_count: u32,
    ) -> Result<String, AuthError> {
        if username.is_empty() {
            return Err(AuthError::MissingCredentials("username".to_string()));
        }

        let algorithm = DigestAlgorithm::from_param(self.algorithm.as_deref())?;
        let qop = self.selected_qop();
        let nc = format_nonce_count(nonce_count);
        let response = compute_digest_response(
            algorithm,
            username,
            password,
            &self.realm,
            &self.nonce,
            method,
            uri,
            qop,
            client_nonce,
            &nc,
        );

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            quote_escape(username),
            quote_escape(&self.realm),
            quote_escape(&self.nonce),
            quote_escape(uri),
            response
        );
        if self.algorithm.is_some() {
            header.push_str(&format!(", algorithm={}", algorithm.as_str()));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", quote_escape(opaque)));
        }
        if let Some(qop) = qop {
            header.push_str(&format!(
                ", qop={qop}, nc={nc}, cnonce=\"{}\"",
                quote_escape(client_nonce)
            ));
        }
        Ok(header)
    }
}

/// Computes the digest `response` value.
///
/// `HA1 = H(username:realm:password)`, `HA2 = H(method:uri)`, then
/// `H(HA1:nonce:nc:cnonce:qop:HA2)` with qop or `H(HA1:nonce:HA2)` without.
#[allow(clippy::too_many_arguments)]
pub fn compute_digest_response(
    algorithm: DigestAlgorithm,
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
    qop: Option<&str>,
    client_nonce: &str,
    nonce_count: &str,
) -> String {
    let ha1 = algorithm.hex(&format!("{username}:{realm}:{password}"));
    let ha2 = algorithm.hex(&format!("{method}:{uri}"));
    match qop {
        Some(qop) => algorithm.hex(&format!(
            "{ha1}:{nonce}:{nonce_count}:{client_nonce}:{qop}:{ha2}"
        )),
        None => algorithm.hex(&format!("{ha1}:{nonce}:{ha2}")),
    }
}

/// Eight random alphanumeric characters.
pub fn generate_client_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_NONCE_LENGTH)
        .map(char::from)
        .collect()
}

/// Renders a nonce count as eight hex digits.
pub fn format_nonce_count(count: u32) -> String {
    format!("{count:08x}")
}

/// Computes the password field answering an RPC login challenge.
///
/// `Default` (and an absent scheme) is
/// `MD5(user:random:MD5(user:realm:password))`, both hashes upper-case hex.
/// `Basic` sends `base64(user:password)`.
pub fn compute_login_password(
    username: &str,
    password: &str,
    challenge: &LoginChallenge,
) -> Result<String, AuthError> {
    if username.is_empty() {
        return Err(AuthError::MissingCredentials("username".to_string()));
    }

    match challenge.encryption.as_deref() {
        None | Some("Default") => {
            let ha1 = md5_upper(&format!("{username}:{}:{password}", challenge.realm));
            Ok(md5_upper(&format!("{username}:{}:{ha1}", challenge.random)))
        }
        Some("Basic") => Ok(BASE64.encode(format!("{username}:{password}"))),
        Some(other) => Err(AuthError::UnsupportedScheme(other.to_string())),
    }
}

fn md5_upper(input: &str) -> String {
    hex::encode_upper(Md5::digest(input.as_bytes()))
}

fn quote_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Splits `k=v, k="v, w", ...` into pairs, unescaping quoted values.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        let key = key.trim().to_string();

        if chars.peek() != Some(&'=') {
            if chars.peek().is_none() {
                break;
            }
            // Bare token without a value.
            continue;
        }
        chars.next();

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        if !key.is_empty() {
            pairs.push((key, value));
        }
    }

    pairs
}
