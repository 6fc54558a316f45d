//! Commitment codec for the commit-reveal reservation scheme.
//!
//! A reservation publishes only `hash160(nonce ++ name)`. The nonce is the capability:
//! whoever holds it can activate the reservation, the name alone is not enough.

use rand::rngs::OsRng;
use rand::RngCore;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use crate::core::name::Name;
use crate::error::{RegistryError, Result};

/// Length of a commitment (and of key/script ids) in bytes.
pub const HASH160_LEN: usize = 20;

/// `ripemd160(sha256(data))`.
pub fn hash160(data: &[u8]) -> [u8; HASH160_LEN] {
    let sha = Sha256::digest(data);
    let digest = Ripemd160::digest(sha);
    let mut out = [0u8; HASH160_LEN];
    out.copy_from_slice(&digest);
    out
}

/// Committed hash carried by a RESERVE output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment([u8; HASH160_LEN]);

impl Commitment {
    pub fn from_bytes(bytes: [u8; HASH160_LEN]) -> Self {
        Self(bytes)
    }

    /// Exact-length conversion; a prefix or over-long slice is not a commitment.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH160_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; HASH160_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", self.to_hex())
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Reservation nonce.
///
/// Fresh nonces are a random `u64` in big-number byte form: minimal little-endian bytes,
/// plus a trailing `0x00` when the top bit of the last byte is set so the number never
/// reads as negative. Zero is the empty vector. Nonces supplied by callers are taken
/// verbatim; only the bytes matter for the commitment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    /// Draws a nonce from the operating system CSPRNG.
    pub fn random() -> Self {
        Self::from_u64(OsRng.next_u64())
    }

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = value.to_le_bytes().to_vec();
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        if bytes.last().map_or(false, |b| b & 0x80 != 0) {
            bytes.push(0);
        }
        Self(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        hex::decode(s.trim())
            .map(Self)
            .map_err(|e| RegistryError::InvalidNonce(format!("{}: {}", s, e)))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the nonce is a capability; keep it out of casual debug output
        write!(f, "Nonce(<{} bytes>)", self.0.len())
    }
}

/// `Commit(nonce, name) = hash160(nonce ++ name)`.
pub fn commit(nonce: &Nonce, name: &Name) -> Commitment {
    let mut preimage = Vec::with_capacity(nonce.as_bytes().len() + name.len());
    preimage.extend_from_slice(nonce.as_bytes());
    preimage.extend_from_slice(name.as_bytes());
    Commitment(hash160(&preimage))
}

/// True iff `commitment` is exactly `Commit(nonce, name)`.
pub fn verify(commitment: &Commitment, nonce: &Nonce, name: &Name) -> bool {
    commit(nonce, name) == *commitment
}
