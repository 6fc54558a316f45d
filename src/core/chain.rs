//! Collaborator interfaces the registry consumes.
//!
//! The ledger/consensus engine and the wallet's key management and coin selection live
//! outside this crate. The registry only sees them through these traits, which makes the
//! protocol testable against the in-memory implementations in `core::ledger`.

use crate::core::fee::{round_up_to_cent, Amount};
use crate::core::script::Destination;
use crate::core::transaction::{Transaction, TxId, TxRequest};
use crate::error::Result;

/// Read access to the chain.
pub trait ChainView: Send + Sync {
    /// Current best height. Fails with `LedgerUnavailable` when the chain cannot be read.
    fn current_height(&self) -> Result<u64>;

    /// A transaction by id, with its confirmation height (`None` while unconfirmed).
    fn get_transaction(&self, txid: &TxId) -> Result<Option<(Transaction, Option<u64>)>>;

    /// Blocks a claim made at `height` stays active. Era dependent, treated as opaque.
    fn expiration_depth(&self, height: u64) -> u64;

    /// Raw anti-squat fee at `height`, before rounding. Non-decreasing in height.
    fn raw_network_fee(&self, height: u64) -> Amount;
}

/// The local wallet.
pub trait Wallet: Send + Sync {
    /// Fails with `WalletLocked` when keys are not available.
    fn ensure_unlocked(&self) -> Result<()>;

    /// A transaction known to this wallet.
    fn get_transaction(&self, txid: &TxId) -> Option<Transaction>;

    /// Builds and signs a transaction for `request`, adding funding inputs and change.
    /// Fails with `InsufficientFunds` or `WalletLocked`.
    fn create_and_sign(&self, request: TxRequest) -> Result<Transaction>;

    /// Hands a signed transaction to the network. Returns once local emission succeeded.
    fn broadcast(&self, tx: &Transaction) -> Result<()>;

    /// Every transaction this wallet knows about.
    fn my_transactions(&self) -> Vec<Transaction>;

    /// A fresh destination from the key pool.
    fn new_destination(&self) -> Result<Destination>;

    fn is_mine(&self, destination: &Destination) -> bool;

    /// Compact recoverable signature over a data payload with the wallet's first key.
    fn sign_payload(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Ledger events fed back into the registry by a background thread.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// A block at `height` confirmed these transactions.
    BlockConnected { height: u64, transactions: Vec<Transaction> },
    /// An unconfirmed transaction was dropped (double spend, eviction).
    TransactionEvicted { transaction: Transaction },
}

/// Anti-squat fee charged at `height`: the raw schedule rounded up to `CENT`.
pub fn network_fee(chain: &dyn ChainView, height: u64) -> Amount {
    round_up_to_cent(chain.raw_network_fee(height))
}
