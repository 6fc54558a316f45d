//! In-memory reference ledger and wallet.
//!
//! Stand-ins for the external chain and wallet collaborators, good enough to drive the
//! registry end to end in tests, the CLI simulation, and local experiments.
//!
//! # Event delivery
//! `mine_block` and `evict` collect the resulting `LedgerEvent` while holding the ledger
//! lock, release it, and only then hand the event to subscribers. A subscriber that calls
//! back into the registry (which in turn reads the ledger) therefore never deadlocks.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info};
use crate::core::chain::{ChainView, LedgerEvent, Wallet};
use crate::core::fee::{Amount, LinearFeeSchedule};
use crate::core::lifecycle::default_expiration_depth;
use crate::core::script::{Destination, KeyId};
use crate::core::transaction::{OutPoint, Transaction, TxId, TxOut, TxRequest, CLAIM_TX_VERSION};
use crate::error::{RegistryError, Result};
use crate::keypool::KeyPool;
use crate::mnemonic::WalletSeed;
use crate::signature;

type DepthFn = Box<dyn Fn(u64) -> u64 + Send + Sync>;

#[derive(Debug, Default)]
struct LedgerState {
    height: u64,
    /// Every known transaction with its confirmation height
    transactions: HashMap<TxId, (Transaction, Option<u64>)>,
    /// Unconfirmed transactions in arrival order
    mempool: Vec<TxId>,
    /// Spent outpoints and the spending transaction (confirmed or not)
    spent: HashMap<OutPoint, TxId>,
}

/// In-memory chain with a mempool.
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    fee_schedule: LinearFeeSchedule,
    depth: DepthFn,
    available: AtomicBool,
    subscribers: Mutex<Vec<Sender<LedgerEvent>>>,
}

impl MemoryLedger {
    /// A ledger at `height` with the default fee schedule and expiration depth.
    pub fn new(height: u64) -> Self {
        Self::with_params(height, LinearFeeSchedule::default(), default_expiration_depth)
    }

    pub fn with_params<F>(height: u64, fee_schedule: LinearFeeSchedule, depth: F) -> Self
    where
        F: Fn(u64) -> u64 + Send + Sync + 'static,
    {
        Self {
            state: RwLock::new(LedgerState { height, ..LedgerState::default() }),
            fee_schedule,
            depth: Box::new(depth),
            available: AtomicBool::new(true),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Simulates the chain becoming unreadable (`LedgerUnavailable`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Receives every event produced from now on.
    pub fn subscribe(&self) -> Receiver<LedgerEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Accepts an unconfirmed transaction into the mempool.
    pub fn submit(&self, tx: Transaction) -> Result<()> {
        tx.validate_txid()?;
        tx.validate_claim_structure()?;

        let mut state = self.state.write();
        if state.transactions.contains_key(&tx.txid) {
            return Err(RegistryError::Validation(format!("duplicate transaction {}", tx.txid)));
        }
        for input in &tx.inputs {
            let exists = state
                .transactions
                .get(&input.txid)
                .is_some_and(|(prev, _)| (input.vout as usize) < prev.outputs.len());
            if !exists {
                return Err(RegistryError::Validation(format!(
                    "input {}:{} does not exist",
                    input.txid, input.vout
                )));
            }
            if let Some(spender) = state.spent.get(input) {
                return Err(RegistryError::Validation(format!(
                    "input {}:{} already spent by {}",
                    input.txid, input.vout, spender
                )));
            }
        }
        for input in &tx.inputs {
            state.spent.insert(*input, tx.txid);
        }
        debug!(txid = %tx.txid, "transaction entered mempool");
        state.mempool.push(tx.txid);
        state.transactions.insert(tx.txid, (tx, None));
        Ok(())
    }

    /// Confirms every mempool transaction in a new block.
    pub fn mine_block(&self) -> LedgerEvent {
        let event = {
            let mut state = self.state.write();
            state.height += 1;
            let height = state.height;
            let txids = std::mem::take(&mut state.mempool);
            let mut transactions = Vec::with_capacity(txids.len());
            for txid in txids {
                if let Some(entry) = state.transactions.get_mut(&txid) {
                    entry.1 = Some(height);
                    transactions.push(entry.0.clone());
                }
            }
            info!(height, count = transactions.len(), "block connected");
            LedgerEvent::BlockConnected { height, transactions }
        };
        self.deliver(&event);
        event
    }

    /// Mines `blocks` blocks, returning their events.
    pub fn advance(&self, blocks: u64) -> Vec<LedgerEvent> {
        (0..blocks).map(|_| self.mine_block()).collect()
    }

    /// Drops an unconfirmed transaction and frees the outputs it spent.
    pub fn evict(&self, txid: &TxId) -> Result<LedgerEvent> {
        let event = {
            let mut state = self.state.write();
            let Some(pos) = state.mempool.iter().position(|t| t == txid) else {
                return Err(RegistryError::NotFound(format!("unconfirmed transaction {}", txid)));
            };
            state.mempool.remove(pos);
            let (tx, _) = state
                .transactions
                .remove(txid)
                .ok_or_else(|| RegistryError::NotFound(format!("transaction {}", txid)))?;
            for input in &tx.inputs {
                state.spent.remove(input);
            }
            info!(txid = %txid, "transaction evicted");
            LedgerEvent::TransactionEvicted { transaction: tx }
        };
        self.deliver(&event);
        Ok(event)
    }

    pub fn mempool(&self) -> Vec<TxId> {
        self.state.read().mempool.clone()
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.state.read().spent.contains_key(outpoint)
    }

    /// A confirmed transaction by id.
    pub fn confirmed_transaction(&self, txid: &TxId) -> Option<Transaction> {
        match self.state.read().transactions.get(txid) {
            Some((tx, Some(_))) => Some(tx.clone()),
            _ => None,
        }
    }

    /// Confirmed transactions whose claim output pays to a destination accepted by
    /// `filter`, in block order.
    pub fn confirmed_claims_to<F>(&self, filter: F) -> Vec<Transaction>
    where
        F: Fn(&Destination) -> bool,
    {
        let state = self.state.read();
        let mut found: Vec<(u64, &Transaction)> = state
            .transactions
            .values()
            .filter_map(|(tx, height)| height.map(|h| (h, tx)))
            .filter(|(_, tx)| tx.claim_output().is_some_and(|claim| filter(&claim.destination)))
            .collect();
        found.sort_by_key(|(height, tx)| (*height, tx.serial, tx.txid));
        found.into_iter().map(|(_, tx)| tx.clone()).collect()
    }

    fn deliver(&self, event: &LedgerEvent) {
        // receivers that went away are dropped
        self.subscribers.lock().retain(|s| s.send(event.clone()).is_ok());
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::LedgerUnavailable("ledger is offline".to_string()))
        }
    }
}

impl ChainView for MemoryLedger {
    fn current_height(&self) -> Result<u64> {
        self.ensure_available()?;
        Ok(self.state.read().height)
    }

    fn get_transaction(&self, txid: &TxId) -> Result<Option<(Transaction, Option<u64>)>> {
        self.ensure_available()?;
        Ok(self.state.read().transactions.get(txid).cloned())
    }

    fn expiration_depth(&self, height: u64) -> u64 {
        (self.depth)(height)
    }

    fn raw_network_fee(&self, height: u64) -> Amount {
        self.fee_schedule.raw_fee(height)
    }
}

impl std::fmt::Debug for MemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryLedger")
            .field("height", &state.height)
            .field("transactions", &state.transactions.len())
            .field("mempool", &state.mempool.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct WalletState {
    balance: Amount,
    transactions: HashMap<TxId, Transaction>,
    order: Vec<TxId>,
    serial: u64,
}

/// In-memory wallet: a BIP32 key pool, a plain balance and its transactions.
///
/// The wallet knows the transactions it created plus every confirmed transaction whose
/// claim output pays to one of its keys, so a claim transferred in from another wallet
/// can be listed and updated here.
///
/// Funding is modelled as a single balance. Creating a claim transaction needs
/// `claim_amount + fee`, minus the value of the claim output it spends.
pub struct MemoryWallet {
    ledger: Arc<MemoryLedger>,
    keys: Mutex<KeyPool>,
    state: RwLock<WalletState>,
    locked: AtomicBool,
}

impl MemoryWallet {
    pub fn new(ledger: Arc<MemoryLedger>, seed: &WalletSeed, balance: Amount) -> Result<Self> {
        Ok(Self {
            ledger,
            keys: Mutex::new(KeyPool::new(seed, 0)?),
            state: RwLock::new(WalletState { balance, ..WalletState::default() }),
            locked: AtomicBool::new(false),
        })
    }

    /// A wallet with a fresh random seed.
    pub fn generate(ledger: Arc<MemoryLedger>, balance: Amount) -> Result<Self> {
        Self::new(ledger, &WalletSeed::generate()?, balance)
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    pub fn balance(&self) -> Amount {
        self.state.read().balance
    }

    /// Key id of the first key, the one that signs data payloads.
    pub fn signing_key_id(&self) -> Result<KeyId> {
        Ok(self.keys.lock().first_key()?.key_id)
    }

    /// A transaction this wallet created, or a confirmed one paying a claim to its keys.
    fn known_transaction(&self, txid: &TxId) -> Option<Transaction> {
        if let Some(tx) = self.state.read().transactions.get(txid) {
            return Some(tx.clone());
        }
        self.ledger
            .confirmed_transaction(txid)
            .filter(|tx| tx.claim_output().is_some_and(|claim| self.is_mine(&claim.destination)))
    }

    fn spent_value(&self, spend: &Option<OutPoint>) -> Result<Amount> {
        let Some(outpoint) = spend else {
            return Ok(Amount::ZERO);
        };
        let prev = self.known_transaction(&outpoint.txid).ok_or_else(|| {
            RegistryError::Validation(format!("wallet does not hold {}", outpoint.txid))
        })?;
        prev.outputs
            .get(outpoint.vout as usize)
            .map(|out| out.value)
            .ok_or_else(|| RegistryError::Validation(format!("no output {}:{}", outpoint.txid, outpoint.vout)))
    }

    fn required(tx: &Transaction) -> Amount {
        tx.outputs.iter().fold(tx.fee, |acc, out| acc + out.value)
    }
}

impl Wallet for MemoryWallet {
    fn ensure_unlocked(&self) -> Result<()> {
        if self.locked.load(Ordering::SeqCst) {
            Err(RegistryError::WalletLocked)
        } else {
            Ok(())
        }
    }

    fn get_transaction(&self, txid: &TxId) -> Option<Transaction> {
        self.known_transaction(txid)
    }

    fn create_and_sign(&self, request: TxRequest) -> Result<Transaction> {
        self.ensure_unlocked()?;
        let credit = self.spent_value(&request.spend)?;
        let required = request.claim_amount + request.fee;
        let available = self.balance() + credit;
        if required > available {
            return Err(RegistryError::InsufficientFunds {
                required: required.as_u64(),
                available: available.as_u64(),
            });
        }

        let serial = {
            let mut state = self.state.write();
            state.serial += 1;
            state.serial
        };
        Transaction::new(
            CLAIM_TX_VERSION,
            request.spend.into_iter().collect(),
            vec![TxOut { value: request.claim_amount, script: request.claim_script }],
            request.fee,
            request.data,
            serial,
        )
    }

    fn broadcast(&self, tx: &Transaction) -> Result<()> {
        let credit = match tx.inputs.first() {
            Some(input) => self.spent_value(&Some(*input))?,
            None => Amount::ZERO,
        };
        self.ledger.submit(tx.clone())?;

        let mut state = self.state.write();
        let required = Self::required(tx);
        state.balance = (state.balance + credit)
            .checked_sub(required)
            .unwrap_or(Amount::ZERO);
        state.order.push(tx.txid);
        state.transactions.insert(tx.txid, tx.clone());
        Ok(())
    }

    fn my_transactions(&self) -> Vec<Transaction> {
        let mut transactions: Vec<Transaction> = {
            let state = self.state.read();
            state
                .order
                .iter()
                .filter_map(|txid| state.transactions.get(txid).cloned())
                .collect()
        };
        let incoming = self.ledger.confirmed_claims_to(|destination| self.is_mine(destination));
        let created: HashSet<TxId> = transactions.iter().map(|tx| tx.txid).collect();
        transactions.extend(incoming.into_iter().filter(|tx| !created.contains(&tx.txid)));
        transactions
    }

    fn new_destination(&self) -> Result<Destination> {
        Ok(self.keys.lock().next_key()?.destination())
    }

    fn is_mine(&self, destination: &Destination) -> bool {
        match destination {
            Destination::KeyDestination(id) => self.keys.lock().contains(id),
            Destination::ScriptDestination(_) | Destination::NoDestination => false,
        }
    }

    fn sign_payload(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.ensure_unlocked()?;
        let key = self.keys.lock().first_key()?;
        Ok(signature::sign_payload(&key.secret_key, payload)?.to_vec())
    }
}

impl std::fmt::Debug for MemoryWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryWallet")
            .field("balance", &state.balance)
            .field("transactions", &state.transactions.len())
            .field("locked", &self.locked.load(Ordering::SeqCst))
            .finish()
    }
}

/// Txids of every transaction in `events`' blocks.
pub fn confirmed_txids(events: &[LedgerEvent]) -> HashSet<TxId> {
    events
        .iter()
        .filter_map(|e| match e {
            LedgerEvent::BlockConnected { transactions, .. } => Some(transactions.iter().map(|t| t.txid)),
            LedgerEvent::TransactionEvicted { .. } => None,
        })
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::commitment::{commit, Nonce};
    use crate::core::fee::{COIN, MIN_AMOUNT};
    use crate::core::name::Name;
    use crate::core::script::{encode_claim_script, ClaimOp};

    fn setup() -> (Arc<MemoryLedger>, MemoryWallet) {
        let ledger = Arc::new(MemoryLedger::new(100));
        let wallet = MemoryWallet::generate(ledger.clone(), Amount::new(10 * COIN)).unwrap();
        (ledger, wallet)
    }

    fn reserve_request(wallet: &MemoryWallet) -> TxRequest {
        let commitment = commit(&Nonce::from_u64(9), &Name::new("bob").unwrap());
        TxRequest {
            claim_script: encode_claim_script(&ClaimOp::Reserve { commitment }, &wallet.new_destination().unwrap()),
            claim_amount: MIN_AMOUNT,
            fee: Amount::ZERO,
            spend: None,
            data: Vec::new(),
        }
    }

    #[test]
    fn test_broadcast_and_mine() {
        let (ledger, wallet) = setup();
        let tx = wallet.create_and_sign(reserve_request(&wallet)).unwrap();
        wallet.broadcast(&tx).unwrap();
        assert_eq!(ledger.mempool(), vec![tx.txid]);
        assert_eq!(wallet.balance(), Amount::new(10 * COIN - MIN_AMOUNT.as_u64()));

        let event = ledger.mine_block();
        assert_eq!(confirmed_txids(&[event]), [tx.txid].into_iter().collect());
        let (_, height) = ledger.get_transaction(&tx.txid).unwrap().unwrap();
        assert_eq!(height, Some(101));
        assert_eq!(ledger.current_height().unwrap(), 101);
    }

    #[test]
    fn test_double_spend_rejected_and_evict_frees_input() {
        let (ledger, wallet) = setup();
        let reserve = wallet.create_and_sign(reserve_request(&wallet)).unwrap();
        wallet.broadcast(&reserve).unwrap();
        ledger.mine_block();

        let outpoint = OutPoint { txid: reserve.txid, vout: 0 };
        let spend = |serial_hint: u8| TxRequest {
            claim_script: vec![serial_hint],
            claim_amount: MIN_AMOUNT,
            fee: Amount::ZERO,
            spend: Some(outpoint),
            data: Vec::new(),
        };
        let first = wallet.create_and_sign(spend(1)).unwrap();
        wallet.broadcast(&first).unwrap();
        assert!(ledger.is_spent(&outpoint));

        let second = wallet.create_and_sign(spend(2)).unwrap();
        assert!(wallet.broadcast(&second).is_err());

        let event = ledger.evict(&first.txid).unwrap();
        assert!(matches!(event, LedgerEvent::TransactionEvicted { .. }));
        assert!(!ledger.is_spent(&outpoint));
        assert!(ledger.get_transaction(&first.txid).unwrap().is_none());
    }

    #[test]
    fn test_insufficient_funds_and_lock() {
        let ledger = Arc::new(MemoryLedger::new(0));
        let wallet = MemoryWallet::generate(ledger, Amount::new(10)).unwrap();
        let err = wallet.create_and_sign(reserve_request(&wallet)).unwrap_err();
        assert!(matches!(err, RegistryError::InsufficientFunds { .. }));

        wallet.lock();
        assert_eq!(wallet.ensure_unlocked(), Err(RegistryError::WalletLocked));
        assert_eq!(wallet.sign_payload(b"x"), Err(RegistryError::WalletLocked));
        wallet.unlock();
        assert!(wallet.ensure_unlocked().is_ok());
    }

    #[test]
    fn test_unavailable_ledger() {
        let (ledger, _) = setup();
        ledger.set_available(false);
        assert!(matches!(ledger.current_height(), Err(RegistryError::LedgerUnavailable(_))));
        ledger.set_available(true);
        assert!(ledger.current_height().is_ok());
    }

    #[test]
    fn test_subscribers_receive_events() {
        let (ledger, _) = setup();
        let rx = ledger.subscribe();
        ledger.advance(2);
        let heights: Vec<u64> = rx
            .try_iter()
            .filter_map(|e| match e {
                LedgerEvent::BlockConnected { height, .. } => Some(height),
                LedgerEvent::TransactionEvicted { .. } => None,
            })
            .collect();
        assert_eq!(heights, vec![101, 102]);
    }

    #[test]
    fn test_wallet_recognizes_own_destinations() {
        let (_, wallet) = setup();
        let mine = wallet.new_destination().unwrap();
        assert!(wallet.is_mine(&mine));
        assert!(!wallet.is_mine(&Destination::NoDestination));
        let signer = wallet.signing_key_id().unwrap();
        let sig = wallet.sign_payload(b"data").unwrap();
        assert!(signature::verify_payload_signature(b"data", &sig, &signer).unwrap());
    }

    #[test]
    fn test_wallet_learns_confirmed_claims_paid_to_it() {
        let (ledger, sender) = setup();
        let receiver = MemoryWallet::generate(ledger.clone(), Amount::new(10 * COIN)).unwrap();
        let target = receiver.new_destination().unwrap();
        let commitment = commit(&Nonce::from_u64(3), &Name::new("bob").unwrap());
        let tx = sender
            .create_and_sign(TxRequest {
                claim_script: encode_claim_script(&ClaimOp::Reserve { commitment }, &target),
                claim_amount: MIN_AMOUNT,
                fee: Amount::ZERO,
                spend: None,
                data: Vec::new(),
            })
            .unwrap();
        sender.broadcast(&tx).unwrap();

        // unconfirmed transactions from other wallets stay unknown
        assert!(receiver.get_transaction(&tx.txid).is_none());
        ledger.mine_block();

        assert_eq!(receiver.get_transaction(&tx.txid), Some(tx.clone()));
        assert_eq!(receiver.my_transactions(), vec![tx.clone()]);
        assert_eq!(sender.my_transactions(), vec![tx]);
    }
}
