pub mod config;
pub mod core;
pub mod error;
pub mod keypool;
pub mod mnemonic;
pub mod signature;

pub use config::{RegistryConfig, MAX_DATA_LENGTH, MAX_VALUE_LENGTH};
pub use error::{InactiveReason, RegistryError, Result};
pub use keypool::{KeyPool, PoolKey};
pub use mnemonic::{validate_mnemonic, WalletSeed};
pub use signature::{key_id, payload_digest, recover_payload_signer, sign_payload, verify_payload_signature};

// Core API exports
pub use core::{Registry, Reservation};
pub use core::chain::{network_fee, ChainView, LedgerEvent, Wallet};
pub use core::commitment::{commit, hash160, verify, Commitment, Nonce};
pub use core::fee::{
    round_up_to_cent,
    Amount,
    LinearFeeSchedule,
    UpdateFeePolicy,
    CENT,
    COIN,
    MAX_CENT_MULTIPLE,
    MIN_AMOUNT,
};
pub use core::history::{
    scan,
    scan_all,
    ClaimHistoryStore,
    ClaimRecord,
    FilteredScan,
    MemoryHistoryStore,
    NameScan,
    ScanQuery,
    DEFAULT_SCAN_MAX_COUNT,
    SCAN_BATCH_SIZE,
};
pub use core::ledger::{MemoryLedger, MemoryWallet};
pub use core::lifecycle::{default_expiration_depth, expires_in, is_expired, ClaimStatus};
pub use core::machine::{verify_data, ActivateRequest, NameLocks, SignedData, UpdateRequest};
pub use core::name::{Name, MAX_NAME_LENGTH};
pub use core::pending::PendingSet;
pub use core::query::{ClaimView, FilterEntry, FilterQuery, FilterResult, OwnedClaimView, ScanEntry};
pub use core::script::{
    decode_claim_script,
    encode_claim_script,
    ClaimOp,
    ClaimOpcode,
    Destination,
    KeyId,
    ScriptId,
};
pub use core::transaction::{OutPoint, Transaction, TxId, TxOut, TxRequest, CLAIM_TX_VERSION};
