// Core module for the name registry protocol
//
// COMMIT-REVEAL GUARANTEES:
// =========================
// 1. A reservation publishes only hash160(nonce ++ name); the name stays hidden
// 2. An activation reveals (name, nonce) and must match the reservation it spends
// 3. Two activations of one name can both be emitted; only the first confirmed is indexed
// 4. Expiration is a function of block height, never of wall-clock time
//
// INVARIANTS:
// - Every Activate/Update for a name is gated by the pending set
// - History is append-only and only receives confirmed records
// - All checks of an operation run before any transaction is constructed

pub mod chain;
pub mod commitment;
pub mod fee;
pub mod history;
pub mod ledger;
pub mod lifecycle;
pub mod machine;
pub mod name;
pub mod pending;
pub mod query;
pub mod script;
pub mod transaction;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use crate::config::RegistryConfig;
use crate::core::chain::{ChainView, Wallet};
use crate::core::commitment::{Commitment, Nonce};
use crate::core::history::{ClaimHistoryStore, ClaimRecord};
use crate::core::lifecycle::ClaimStatus;
use crate::core::machine::NameLocks;
use crate::core::name::Name;
use crate::core::pending::PendingSet;
use crate::core::transaction::TxId;
use crate::error::{RegistryError, Result};

/// A reservation emitted by this registry, kept until its activation confirms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub name: Name,
    pub nonce: Nonce,
    pub commitment: Commitment,
    pub txid: TxId,
}

/// Name registry engine
/// Owns the pending set, local reservations and per-name locks, and talks to the
/// chain, the wallet and the history store through injected collaborators.
///
/// Every state-machine operation and every ledger event for a name runs under that
/// name's lock, so read-decide-emit is atomic with respect to confirmation and
/// invalidation of the same name.
pub struct Registry {
    config: RegistryConfig,
    chain: Arc<dyn ChainView>,
    wallet: Arc<dyn Wallet>,
    store: Arc<dyn ClaimHistoryStore>,
    /// In-flight Activate/Update transactions per name
    pending: PendingSet,
    /// Local reservations by name; the latest reservation for a name wins
    reservations: RwLock<HashMap<Name, Reservation>>,
    locks: NameLocks,
}

impl Registry {
    /// Creates a registry over the given collaborators
    pub fn new(
        config: RegistryConfig,
        chain: Arc<dyn ChainView>,
        wallet: Arc<dyn Wallet>,
        store: Arc<dyn ClaimHistoryStore>,
    ) -> Self {
        Self {
            config,
            chain,
            wallet,
            store,
            pending: PendingSet::new(),
            reservations: RwLock::new(HashMap::new()),
            locks: NameLocks::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Gets the pending set (for inspection of in-flight operations)
    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    pub fn store(&self) -> &dyn ClaimHistoryStore {
        self.store.as_ref()
    }

    /// Local reservation recorded for `name`, if any
    pub fn reservation(&self, name: &Name) -> Option<Reservation> {
        self.reservations.read().get(name).cloned()
    }

    /// History of `name`, empty when the store never saw it
    fn history_or_empty(&self, name: &Name) -> Result<Vec<ClaimRecord>> {
        match self.store.read_history(name) {
            Ok(history) => Ok(history),
            Err(RegistryError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Claim status of `name` as of `height`
    fn status_at(&self, name: &Name, height: u64) -> Result<ClaimStatus> {
        let history = self.history_or_empty(name)?;
        let chain = &self.chain;
        Ok(ClaimStatus::evaluate(
            &history,
            self.pending.has_pending(name),
            height,
            |h| chain.expiration_depth(h),
        ))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("pending", &self.pending)
            .field("reservations", &self.reservations.read().len())
            .finish()
    }
}
