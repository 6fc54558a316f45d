use std::fmt;
use thiserror::Error;

/// Why an update found no active claim for a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactiveReason {
    /// The name was never claimed.
    Unclaimed,
    /// The name was claimed but the claim has expired.
    Expired,
}

impl fmt::Display for InactiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InactiveReason::Unclaimed => write!(f, "never claimed"),
            InactiveReason::Expired => write!(f, "claim expired"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Commitment mismatch: reservation {reservation} used a different nonce")]
    CommitmentMismatch { reservation: String },

    #[error("Name {name} is already active with tx {txid}")]
    AlreadyActive { name: String, txid: String },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Transaction {0} does not carry a reservation output")]
    NotAReservation(String),

    #[error("There are {count} pending operations on name {name}, including {first}")]
    PendingConflict { name: String, count: usize, first: String },

    #[error("No active claim for name {name}: {reason}")]
    NoActiveClaim { name: String, reason: InactiveReason },

    #[error("Claim on {name} is not in this wallet (owning tx {txid})")]
    ClaimNotOwnedLocally { name: String, txid: String },

    #[error("Payload too large: {len} bytes, maximum {max}. Split the payload across several operations")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Name too long: {0} bytes, maximum 255")]
    NameTooLong(usize),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Wallet is locked; unlock it first")]
    WalletLocked,

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Name not found: {0}")]
    NotFound(String),

    #[error("Invalid nonce: {0}")]
    InvalidNonce(String),

    #[error("Invalid filter pattern: {0}")]
    InvalidPattern(String),

    #[error("History store error: {0}")]
    Store(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("BIP39 error: {0}")]
    Bip39(String),

    #[error("BIP32 error: {0}")]
    Bip32(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

impl From<bip39::Error> for RegistryError {
    fn from(err: bip39::Error) -> Self {
        RegistryError::Bip39(err.to_string())
    }
}

impl From<secp256k1::Error> for RegistryError {
    fn from(err: secp256k1::Error) -> Self {
        RegistryError::Crypto(err.to_string())
    }
}

impl From<bip32::Error> for RegistryError {
    fn from(err: bip32::Error) -> Self {
        RegistryError::Bip32(err.to_string())
    }
}

impl From<regex::Error> for RegistryError {
    fn from(err: regex::Error) -> Self {
        RegistryError::InvalidPattern(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Config(err.to_string())
    }
}
