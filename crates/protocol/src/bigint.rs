//! Arbitrary-precision helpers for the raw RSA key wrap.

use num_bigint::BigUint;

use crate::error::CryptoError;

/// Parses an unsigned big-endian hex string (no prefix, either case).
pub fn parse_hex(text: &str) -> Result<BigUint, CryptoError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CryptoError::InvalidPublicKey("empty hex component".to_string()));
    }
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CryptoError::InvalidPublicKey(format!(
            "non-hex component: {text}"
        )));
    }
    BigUint::parse_bytes(text.as_bytes(), 16)
        .ok_or_else(|| CryptoError::InvalidPublicKey(format!("non-hex component: {text}")))
}

/// Interprets `bytes` as a big-endian unsigned integer.
pub fn from_be_bytes(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Computes `base^exponent mod modulus`.
pub fn mod_pow(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> Result<BigUint, CryptoError> {
    if modulus.bits() == 0 {
        return Err(CryptoError::EncryptionFailed("modulus is zero".to_string()));
    }
    Ok(base.modpow(exponent, modulus))
}

/// Number of bytes needed to hold `value` (at least one).
pub fn byte_len(value: &BigUint) -> usize {
    (value.bits() as usize).div_ceil(8).max(1)
}

/// Renders `value` as lowercase hex, left-padded with zeros to `width_bytes`.
///
/// Values wider than `width_bytes` are rendered in full.
pub fn to_hex_padded(value: &BigUint, width_bytes: usize) -> String {
    let bytes = value.to_bytes_be();
    let mut padded = vec![0u8; width_bytes.saturating_sub(bytes.len())];
    padded.extend_from_slice(&bytes);
    hex::encode(padded)
}
