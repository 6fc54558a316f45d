use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use serde_json;
use crate::core::commitment::hash160;
use crate::core::script::KeyId;
use crate::error::{RegistryError, Result};

const DOMAIN_SEPARATOR: &str = "NameregTransaction:";

/// Prefix mixed into every signed data payload so a payload signature can never be
/// replayed as a transaction signature.
pub const MESSAGE_MAGIC: &[u8] = b"Namereg Signed Message:\n";

/// Length of a compact recoverable signature: header byte + r + s.
pub const COMPACT_SIGNATURE_LEN: usize = 65;

/// Hashes a serializable value with domain separator
pub fn hash_message<T: serde::Serialize>(message: &T) -> Result<[u8; 32]> {
    let json = serde_json::to_string(message)
        .map_err(|e| RegistryError::Validation(format!("Failed to serialize message: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_SEPARATOR.as_bytes());
    hasher.update(json.as_bytes());
    let hash = hasher.finalize();

    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    Ok(result)
}

/// Double SHA-256 of `MESSAGE_MAGIC ++ payload`.
pub fn payload_digest(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(MESSAGE_MAGIC);
    hasher.update(payload);
    let first = hasher.finalize();
    let second = Sha256::digest(first);

    let mut result = [0u8; 32];
    result.copy_from_slice(&second);
    result
}

/// Key id (hash160 of the compressed public key) of a public key
pub fn key_id(public_key: &PublicKey) -> KeyId {
    KeyId(hash160(&public_key.serialize()))
}

/// Signs a data payload, returning a 65-byte compact recoverable signature.
///
/// Header byte is `27 + recovery_id + 4` (compressed key), so the signer's key id can be
/// recovered from the payload and signature alone.
pub fn sign_payload(private_key: &SecretKey, payload: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_LEN]> {
    let secp = Secp256k1::new();

    let digest = payload_digest(payload);
    let msg = Message::from_digest_slice(&digest)
        .map_err(|e| RegistryError::Signature(format!("Invalid payload digest: {}", e)))?;

    let signature = secp.sign_ecdsa_recoverable(&msg, private_key);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut out = [0u8; COMPACT_SIGNATURE_LEN];
    out[0] = 27 + recovery_id.to_i32() as u8 + 4;
    out[1..].copy_from_slice(&compact);
    Ok(out)
}

/// Recovers the public key that produced `signature` over `payload`.
pub fn recover_payload_signer(payload: &[u8], signature: &[u8]) -> Result<PublicKey> {
    let secp = Secp256k1::new();

    if signature.len() != COMPACT_SIGNATURE_LEN {
        return Err(RegistryError::Signature(format!(
            "Invalid signature length: expected {}, got {}",
            COMPACT_SIGNATURE_LEN,
            signature.len()
        )));
    }
    let header = signature[0];
    if !(27..=34).contains(&header) {
        return Err(RegistryError::Signature(format!("Invalid signature header: {}", header)));
    }
    let recovery_id = RecoveryId::from_i32(((header - 27) & 0x03) as i32)
        .map_err(|e| RegistryError::Signature(format!("Invalid recovery id: {}", e)))?;
    let recoverable = RecoverableSignature::from_compact(&signature[1..], recovery_id)
        .map_err(|e| RegistryError::Signature(format!("Invalid compact signature: {}", e)))?;

    let digest = payload_digest(payload);
    let msg = Message::from_digest_slice(&digest)
        .map_err(|e| RegistryError::Signature(format!("Invalid payload digest: {}", e)))?;

    secp.recover_ecdsa(&msg, &recoverable)
        .map_err(|e| RegistryError::Signature(format!("Recovery failed: {}", e)))
}

/// Verifies that `signature` over `payload` was made by the key behind `expected`.
pub fn verify_payload_signature(payload: &[u8], signature: &[u8], expected: &KeyId) -> Result<bool> {
    let signer = recover_payload_signer(payload, signature)?;
    Ok(key_id(&signer) == *expected)
}
