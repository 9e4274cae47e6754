//! Hybrid RSA/AES payload encryption.
//!
//! Each encrypted call gets a fresh symmetric key. The key is wrapped with the
//! device's RSA public key and sent as `salt`; the JSON payload is AES
//! encrypted with it and sent as `content`. The device answers with content
//! encrypted under the same key.
//!
//! The construction is fixed by the device firmware and must match it byte
//! for byte:
//! - the RSA wrap is textbook `m^e mod n` with no padding scheme,
//! - AES runs with an all-zero IV,
//! - plaintext is padded with `0x00` bytes to the block size (no PKCS#7).

use std::fmt;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes256};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::bigint;
use crate::error::CryptoError;
use crate::messages::EncryptedPacket;
use crate::negotiation::NegotiatedCrypto;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

const ZERO_IV: [u8; AES_BLOCK_SIZE] = [0u8; AES_BLOCK_SIZE];

/// Profile family name, as it appears in the device's cipher list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileName {
    Rpac,
    Aes,
}

impl ProfileName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileName::Rpac => "RPAC",
            ProfileName::Aes => "AES",
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AES chaining mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockMode {
    Cbc,
    Ecb,
}

/// A symmetric profile: key length and chaining mode are fixed per name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CryptoProfile {
    pub name: ProfileName,
    /// Symmetric key length in bytes.
    pub key_length: usize,
    pub block_mode: BlockMode,
}

impl CryptoProfile {
    /// AES-256 in CBC mode.
    pub const RPAC: CryptoProfile = CryptoProfile {
        name: ProfileName::Rpac,
        key_length: 32,
        block_mode: BlockMode::Cbc,
    };

    /// AES-128 in ECB mode.
    pub const AES: CryptoProfile = CryptoProfile {
        name: ProfileName::Aes,
        key_length: 16,
        block_mode: BlockMode::Ecb,
    };

    /// Wire label, `"<NAME>-<bits>"`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.name, self.key_length * 8)
    }
}

/// Client preference order. Earlier entries win.
pub const PROFILE_PREFERENCE: [CryptoProfile; 2] = [CryptoProfile::RPAC, CryptoProfile::AES];

/// Per-call symmetric key together with the profile it was generated for.
///
/// Owned by exactly one call and wiped when dropped.
pub struct EphemeralKey {
    bytes: Zeroizing<Vec<u8>>,
    profile: CryptoProfile,
}

impl EphemeralKey {
    /// Generates a fresh key for `profile`.
    pub fn generate(profile: CryptoProfile) -> Result<Self, CryptoError> {
        Ok(Self {
            bytes: generate_symmetric_key(profile.key_length)?,
            profile,
        })
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Profile this key belongs to.
    pub fn profile(&self) -> CryptoProfile {
        self.profile
    }

    /// Decrypts device content encrypted under this key.
    pub fn decrypt(&self, content: &str) -> Result<Option<Value>, CryptoError> {
        decrypt_payload(content, &self.bytes, self.profile)
    }
}

impl fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKey")
            .field("profile", &self.profile.label())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Picks the first client profile whose name appears in any server cipher.
pub fn select_profile<S: AsRef<str>>(server_ciphers: &[S]) -> Result<CryptoProfile, CryptoError> {
    PROFILE_PREFERENCE
        .iter()
        .find(|profile| {
            server_ciphers
                .iter()
                .any(|cipher| cipher.as_ref().contains(profile.name.as_str()))
        })
        .copied()
        .ok_or_else(|| {
            CryptoError::NoCipherMatch(
                server_ciphers
                    .iter()
                    .map(|c| c.as_ref().to_string())
                    .collect(),
            )
        })
}

/// Fills a new buffer of `length` bytes from the OS entropy source.
pub fn generate_symmetric_key(length: usize) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut key = Zeroizing::new(vec![0u8; length]);
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| CryptoError::RandomGenerationFailed(e.to_string()))?;
    Ok(key)
}

/// Raw RSA: `key^exponent mod modulus`, hex encoded at the modulus width.
pub fn wrap_key(key: &[u8], modulus: &BigUint, exponent: &BigUint) -> Result<String, CryptoError> {
    let message = bigint::from_be_bytes(key);
    let wrapped = bigint::mod_pow(&message, exponent, modulus)?;
    Ok(bigint::to_hex_padded(&wrapped, bigint::byte_len(modulus)))
}

/// Serializes `payload`, zero-pads it and encrypts it; returns base64.
pub fn encrypt_payload<T: Serialize + ?Sized>(
    payload: &T,
    key: &[u8],
    profile: CryptoProfile,
) -> Result<String, CryptoError> {
    check_key(key, profile)?;

    let mut plaintext = serde_json::to_vec(payload)
        .map_err(|e| CryptoError::EncryptionFailed(format!("payload serialization: {e}")))?;
    zero_pad(&mut plaintext);

    let ciphertext = aes_encrypt(profile.block_mode, key, &plaintext)?;
    Ok(BASE64.encode(ciphertext))
}

/// Decrypts base64 content and parses the JSON inside.
///
/// Returns `Ok(None)` when the content decrypts to something that is not
/// JSON, even after a Latin-1 reinterpretation. Only a bad key size or
/// non-base64 input is an error.
pub fn decrypt_payload(
    content: &str,
    key: &[u8],
    profile: CryptoProfile,
) -> Result<Option<Value>, CryptoError> {
    check_key(key, profile)?;

    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let ciphertext = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;

    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Ok(None);
    }

    let Some(mut plaintext) = aes_decrypt(profile.block_mode, key, &ciphertext) else {
        return Ok(None);
    };
    strip_zero_padding(&mut plaintext);

    if let Ok(value) = serde_json::from_slice::<Value>(&plaintext) {
        return Ok(Some(value));
    }

    // Some firmware emits Latin-1 inside otherwise valid JSON.
    let latin1: String = plaintext.iter().map(|&b| char::from(b)).collect();
    Ok(serde_json::from_str::<Value>(&latin1).ok())
}

/// Full request-side pipeline: select, generate, wrap, encrypt.
///
/// The returned key is the only way to read the paired response; callers
/// keep it for the duration of the call and drop it afterwards.
pub fn encrypt<T: Serialize + ?Sized>(
    payload: &T,
    crypto: &NegotiatedCrypto,
) -> Result<(EncryptedPacket, EphemeralKey), CryptoError> {
    let profile = select_profile(crypto.ciphers.as_slice())?;
    let key = EphemeralKey::generate(profile)?;

    let salt = wrap_key(key.as_bytes(), &crypto.modulus, &crypto.exponent)?;
    let content = encrypt_payload(payload, key.as_bytes(), profile)?;

    let packet = EncryptedPacket {
        cipher: profile.label(),
        salt,
        content,
    };
    Ok((packet, key))
}

fn check_key(key: &[u8], profile: CryptoProfile) -> Result<(), CryptoError> {
    if key.len() != profile.key_length {
        return Err(CryptoError::InvalidKeySize {
            expected: profile.key_length,
            actual: key.len(),
        });
    }
    Ok(())
}

fn zero_pad(buf: &mut Vec<u8>) {
    let rem = buf.len() % AES_BLOCK_SIZE;
    if rem != 0 {
        buf.resize(buf.len() + AES_BLOCK_SIZE - rem, 0);
    }
}

fn strip_zero_padding(buf: &mut Vec<u8>) {
    let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    buf.truncate(end);
}

fn aes_encrypt(mode: BlockMode, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match (mode, key.len()) {
        (BlockMode::Ecb, 16) => ecb_encrypt::<Aes128>(key, data),
        (BlockMode::Ecb, 32) => ecb_encrypt::<Aes256>(key, data),
        (BlockMode::Cbc, 16) => cbc_encrypt::<Aes128>(key, data),
        (BlockMode::Cbc, 32) => cbc_encrypt::<Aes256>(key, data),
        (_, len) => Err(CryptoError::EncryptionFailed(format!(
            "unsupported AES key length {len}"
        ))),
    }
}

fn aes_decrypt(mode: BlockMode, key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    match (mode, key.len()) {
        (BlockMode::Ecb, 16) => ecb_decrypt::<Aes128>(key, data),
        (BlockMode::Ecb, 32) => ecb_decrypt::<Aes256>(key, data),
        (BlockMode::Cbc, 16) => cbc_decrypt::<Aes128>(key, data),
        (BlockMode::Cbc, 32) => cbc_decrypt::<Aes256>(key, data),
        _ => None,
    }
}

fn ecb_encrypt<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    let cipher = ecb::Encryptor::<C>::new_from_slice(key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(data))
}

fn cbc_encrypt<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    let cipher = cbc::Encryptor::<C>::new_from_slices(key, &ZERO_IV)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(data))
}

fn ecb_decrypt<C>(key: &[u8], data: &[u8]) -> Option<Vec<u8>>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    let cipher = ecb::Decryptor::<C>::new_from_slice(key).ok()?;
    cipher.decrypt_padded_vec_mut::<NoPadding>(data).ok()
}

fn cbc_decrypt<C>(key: &[u8], data: &[u8]) -> Option<Vec<u8>>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    let cipher = cbc::Decryptor::<C>::new_from_slices(key, &ZERO_IV).ok()?;
    cipher.decrypt_padded_vec_mut::<NoPadding>(data).ok()
}
