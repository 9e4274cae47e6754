//! Negotiated crypto parameters for one authenticated connection.
//!
//! The store holds a single immutable snapshot behind a lock. Writers build
//! the complete replacement first and swap it in with one write, so readers
//! see either the old record or the new one and never a mix of both.

use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::RwLock;

use crate::bigint;
use crate::error::CryptoError;

/// The device's advertised crypto parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedCrypto {
    /// Asymmetric algorithm name as reported by the device.
    pub asymmetric: String,
    /// Symmetric ciphers accepted by the device, in device order.
    pub ciphers: Vec<String>,
    /// RSA modulus.
    pub modulus: BigUint,
    /// RSA public exponent.
    pub exponent: BigUint,
}

impl NegotiatedCrypto {
    /// Builds a record from the device's `"N:<hex>,E:<hex>"` public key.
    pub fn parse(
        asymmetric: impl Into<String>,
        ciphers: Vec<String>,
        public_key: &str,
    ) -> Result<Self, CryptoError> {
        let (modulus, exponent) = parse_public_key(public_key)?;
        Ok(Self {
            asymmetric: asymmetric.into(),
            ciphers,
            modulus,
            exponent,
        })
    }
}

/// Parses `"N:<hexModulus>,E:<hexExponent>"`.
pub fn parse_public_key(text: &str) -> Result<(BigUint, BigUint), CryptoError> {
    let mut modulus = None;
    let mut exponent = None;

    for part in text.split(',') {
        let (tag, value) = part.trim().split_once(':').ok_or_else(|| {
            CryptoError::InvalidPublicKey(format!("component without tag: {part:?}"))
        })?;
        let slot = match tag.trim() {
            "N" => &mut modulus,
            "E" => &mut exponent,
            other => {
                return Err(CryptoError::InvalidPublicKey(format!(
                    "unknown component tag {other:?}"
                )))
            }
        };
        if slot.is_some() {
            return Err(CryptoError::InvalidPublicKey(format!(
                "duplicate component {tag:?}"
            )));
        }
        *slot = Some(bigint::parse_hex(value)?);
    }

    let modulus = modulus
        .ok_or_else(|| CryptoError::InvalidPublicKey("missing modulus".to_string()))?;
    let exponent = exponent
        .ok_or_else(|| CryptoError::InvalidPublicKey("missing exponent".to_string()))?;

    if modulus.bits() == 0 {
        return Err(CryptoError::InvalidPublicKey("zero modulus".to_string()));
    }

    Ok((modulus, exponent))
}

/// Store of the current [`NegotiatedCrypto`] snapshot.
///
/// Share it with `Arc<NegotiationStore>`; every connection gets its own
/// instance.
#[derive(Debug, Default)]
pub struct NegotiationStore {
    current: RwLock<Option<Arc<NegotiatedCrypto>>>,
}

impl NegotiationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the public key and replaces the stored record.
    ///
    /// On error the previous record is left untouched.
    pub fn update(
        &self,
        asymmetric: impl Into<String>,
        ciphers: Vec<String>,
        public_key: &str,
    ) -> Result<(), CryptoError> {
        let record = NegotiatedCrypto::parse(asymmetric, ciphers, public_key)?;
        *self.current.write() = Some(Arc::new(record));
        Ok(())
    }

    /// Clears the stored record.
    pub fn reset(&self) {
        *self.current.write() = None;
    }

    /// Returns the current record.
    pub fn snapshot(&self) -> Option<Arc<NegotiatedCrypto>> {
        self.current.read().clone()
    }

    /// Returns true once a record has been stored.
    pub fn is_negotiated(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn current_asymmetric(&self) -> Option<String> {
        self.snapshot().map(|c| c.asymmetric.clone())
    }

    pub fn current_ciphers(&self) -> Option<Vec<String>> {
        self.snapshot().map(|c| c.ciphers.clone())
    }

    pub fn current_modulus(&self) -> Option<BigUint> {
        self.snapshot().map(|c| c.modulus.clone())
    }

    pub fn current_exponent(&self) -> Option<BigUint> {
        self.snapshot().map(|c| c.exponent.clone())
    }
}
