//! Claim state machine: Reserve, Activate, Update, and the Confirm/Invalidate callbacks.
//!
//! # Per-name serialization
//! Each operation takes the name's lock before its first check and keeps it until the
//! transaction is broadcast and registered pending. Ledger events take the same lock
//! before touching history or the pending set. Read-decide-emit for a name is therefore
//! atomic with respect to confirmation and invalidation of that name.
//!
//! # All-or-nothing
//! Every precondition is checked before a transaction is built. Either all checks pass
//! and exactly one transaction is emitted and registered pending, or the call fails and
//! nothing changed.
//!
//! # First confirmed wins
//! Two wallets can emit activations for the same name. The ledger confirms both; the
//! first one indexed becomes the claim and the later one is ignored. An update that does
//! not spend the active claim is ignored the same way.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::core::chain::{network_fee, LedgerEvent};
use crate::core::commitment::{commit, verify, Nonce};
use crate::core::fee::{Amount, UpdateFeePolicy};
use crate::core::history::ClaimRecord;
use crate::core::lifecycle::ClaimStatus;
use crate::core::name::Name;
use crate::core::script::{encode_claim_script, ClaimOp, ClaimOpcode, Destination, KeyId};
use crate::core::transaction::{Transaction, TxId, TxRequest};
use crate::core::{Registry, Reservation};
use crate::error::{InactiveReason, RegistryError, Result};
use crate::signature::{key_id, recover_payload_signer};

/// One mutex per name, held only while some caller is inside `with`.
///
/// An entry is dropped as soon as the last holder leaves, so the map tracks names in
/// use rather than every name ever seen on chain.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: Mutex<HashMap<Name, Arc<Mutex<()>>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock of `name`.
    pub fn with<R>(&self, name: &Name, f: impl FnOnce() -> R) -> R {
        let lock = self.locks.lock().entry(name.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);

        let mut locks = self.locks.lock();
        if locks.get(name).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(name);
        }
        result
    }

    /// Names currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Arguments of Activate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateRequest {
    pub name: Name,
    /// Nonce revealed for the reservation. Taken from the local reservation when absent.
    pub nonce: Option<Nonce>,
    /// Reservation transaction to spend. Taken from the local reservation when absent.
    pub reservation: Option<TxId>,
    /// Alias value, or the raw payload for the data variant.
    pub value: Vec<u8>,
}

impl ActivateRequest {
    pub fn new(name: Name, value: impl Into<Vec<u8>>) -> Self {
        Self { name, nonce: None, reservation: None, value: value.into() }
    }

    pub fn with_nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_reservation(mut self, reservation: TxId) -> Self {
        self.reservation = Some(reservation);
        self
    }
}

/// Arguments of Update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub name: Name,
    /// Alias value, or the raw payload for the data variant.
    pub value: Vec<u8>,
    /// Transfer target. The current owner's destination is kept when absent.
    pub new_owner: Option<Destination>,
}

impl UpdateRequest {
    pub fn new(name: Name, value: impl Into<Vec<u8>>) -> Self {
        Self { name, value: value.into(), new_owner: None }
    }

    pub fn transfer_to(mut self, destination: Destination) -> Self {
        self.new_owner = Some(destination);
        self
    }
}

/// Result of a data-variant Activate/Update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedData {
    /// Base64 compact signature over the payload; this is the claim value on chain.
    pub signature: String,
    pub txid: TxId,
}

enum ClaimPayload {
    Alias(Vec<u8>),
    Data(Vec<u8>),
}

/// Recovers the key id that signed a data payload.
pub fn verify_data(payload: &[u8], signature_b64: &str) -> Result<KeyId> {
    let signature = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| RegistryError::Signature(format!("invalid base64 signature: {}", e)))?;
    let signer = recover_payload_signer(payload, &signature)?;
    Ok(key_id(&signer))
}

impl Registry {
    /// Emits a reservation for `name` and records it locally.
    ///
    /// Never gated by the pending set: the reservation reveals only the commitment, and
    /// at most one of several racing reservations can ever activate.
    pub fn reserve(&self, name: &Name) -> Result<(TxId, Nonce)> {
        self.locks.with(name, || self.reserve_locked(name))
    }

    fn reserve_locked(&self, name: &Name) -> Result<(TxId, Nonce)> {
        self.wallet.ensure_unlocked()?;
        let nonce = Nonce::random();
        let commitment = commit(&nonce, name);
        let destination = self.wallet.new_destination()?;
        let tx = self.emit(TxRequest {
            claim_script: encode_claim_script(&ClaimOp::Reserve { commitment }, &destination),
            claim_amount: self.config.claim_amount,
            fee: Amount::ZERO,
            spend: None,
            data: Vec::new(),
        })?;

        self.reservations.write().insert(
            name.clone(),
            Reservation { name: name.clone(), nonce: nonce.clone(), commitment, txid: tx.txid },
        );
        info!(name = %name, txid = %tx.txid, commitment = %commitment, "reservation emitted");
        debug!(name = %name, nonce = %nonce.to_hex(), "reservation nonce");
        Ok((tx.txid, nonce))
    }

    /// Reveals a reservation and activates the name with an alias value.
    pub fn activate(&self, request: ActivateRequest) -> Result<TxId> {
        let ActivateRequest { name, nonce, reservation, value } = request;
        let (tx, _) = self.activate_payload(&name, nonce, reservation, ClaimPayload::Alias(value))?;
        Ok(tx.txid)
    }

    /// Updates the value of an active claim this wallet owns, optionally transferring it.
    pub fn update(&self, request: UpdateRequest) -> Result<TxId> {
        let UpdateRequest { name, value, new_owner } = request;
        let policy = self.config.update_fee;
        let (tx, _) = self.update_payload(&name, ClaimPayload::Alias(value), new_owner, policy)?;
        Ok(tx.txid)
    }

    /// Reserve for the data variant. Identical to `reserve`.
    pub fn data_reserve(&self, name: &Name) -> Result<(TxId, Nonce)> {
        self.reserve(name)
    }

    /// Activate with a signed data payload: the claim value is the wallet's signature
    /// over the payload and the payload itself travels in the transaction data.
    pub fn data_activate(&self, request: ActivateRequest) -> Result<SignedData> {
        let ActivateRequest { name, nonce, reservation, value } = request;
        let (tx, signature) = self.activate_payload(&name, nonce, reservation, ClaimPayload::Data(value))?;
        self.signed(tx, signature)
    }

    /// Update with a signed data payload. Fee per `data_update_fee`.
    pub fn data_update(&self, request: UpdateRequest) -> Result<SignedData> {
        let UpdateRequest { name, value, new_owner } = request;
        let policy = self.config.data_update_fee;
        let (tx, signature) = self.update_payload(&name, ClaimPayload::Data(value), new_owner, policy)?;
        self.signed(tx, signature)
    }

    /// Records a confirmed pending transaction: appends the record, then clears pending.
    pub fn confirm(&self, name: &Name, txid: &TxId, record: ClaimRecord) -> Result<()> {
        self.locks.with(name, || self.confirm_locked(name, txid, record))
    }

    /// Drops a pending transaction that will never confirm. Returns whether it was pending.
    pub fn invalidate(&self, name: &Name, txid: &TxId) -> bool {
        self.locks.with(name, || self.invalidate_locked(name, txid))
    }

    /// Indexes the claim operations of a connected block.
    ///
    /// A store failure on one transaction does not stop the others from being indexed;
    /// the first failure is returned once the whole block has been processed.
    pub fn connect_block(&self, height: u64, transactions: &[Transaction]) -> Result<()> {
        let mut first_error = None;
        for tx in transactions {
            let Some(claim) = tx.claim_output() else {
                continue;
            };
            if let Err(e) = tx.validate_claim_structure() {
                warn!(txid = %tx.txid, error = %e, "malformed claim transaction ignored");
                if let Some(name) = claim.op.name() {
                    self.invalidate_if_pending(name, &tx.txid);
                }
                continue;
            }
            match claim.op {
                ClaimOp::Reserve { commitment } => {
                    debug!(txid = %tx.txid, commitment = %commitment, height, "reservation confirmed");
                }
                ClaimOp::Activate { name, value, .. } => {
                    let outcome = self.index_claim(height, tx, name, value, ClaimOpcode::Activate);
                    record_failure(&mut first_error, tx, outcome);
                }
                ClaimOp::Update { name, value } => {
                    let outcome = self.index_claim(height, tx, name, value, ClaimOpcode::Update);
                    record_failure(&mut first_error, tx, outcome);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Invalidates the pending entry of an evicted transaction. Returns whether one existed.
    pub fn transaction_evicted(&self, tx: &Transaction) -> bool {
        match tx.claim_name() {
            Some(name) => self.invalidate_if_pending(&name, &tx.txid),
            None => false,
        }
    }

    /// Dispatches a ledger event.
    pub fn handle_event(&self, event: LedgerEvent) -> Result<()> {
        match event {
            LedgerEvent::BlockConnected { height, transactions } => self.connect_block(height, &transactions),
            LedgerEvent::TransactionEvicted { transaction } => {
                self.transaction_evicted(&transaction);
                Ok(())
            }
        }
    }

    fn activate_payload(
        &self,
        name: &Name,
        nonce: Option<Nonce>,
        reservation: Option<TxId>,
        payload: ClaimPayload,
    ) -> Result<(Transaction, Option<String>)> {
        self.check_payload(&payload)?;
        self.locks.with(name, || self.activate_locked(name, nonce, reservation, payload))
    }

    fn activate_locked(
        &self,
        name: &Name,
        nonce: Option<Nonce>,
        reservation: Option<TxId>,
        payload: ClaimPayload,
    ) -> Result<(Transaction, Option<String>)> {
        self.check_not_pending(name)?;
        let height = self.chain.current_height()?;
        if let ClaimStatus::Active(record) = self.status_at(name, height)? {
            return Err(RegistryError::AlreadyActive { name: name.to_string(), txid: record.txid.to_hex() });
        }
        self.wallet.ensure_unlocked()?;

        let local = self.reservation(name);
        let reservation_txid = reservation
            .or_else(|| local.as_ref().map(|r| r.txid))
            .ok_or_else(|| RegistryError::ReservationNotFound(format!("no reservation recorded for {}", name)))?;
        let nonce = match nonce {
            Some(nonce) => nonce,
            None => local
                .filter(|r| r.txid == reservation_txid)
                .map(|r| r.nonce)
                .ok_or_else(|| {
                    RegistryError::ReservationNotFound(format!("no nonce recorded for reservation {}", reservation_txid))
                })?,
        };
        let reservation_tx = self
            .wallet
            .get_transaction(&reservation_txid)
            .ok_or_else(|| RegistryError::ReservationNotFound(reservation_txid.to_hex()))?;
        let claim = reservation_tx
            .claim_output()
            .ok_or_else(|| RegistryError::NotAReservation(reservation_txid.to_hex()))?;
        let commitment = match &claim.op {
            ClaimOp::Reserve { commitment } => *commitment,
            ClaimOp::Activate { .. } | ClaimOp::Update { .. } => {
                return Err(RegistryError::NotAReservation(reservation_txid.to_hex()))
            }
        };
        if !verify(&commitment, &nonce, name) {
            return Err(RegistryError::CommitmentMismatch { reservation: reservation_txid.to_hex() });
        }

        let fee = network_fee(self.chain.as_ref(), height);
        let (value, data, signature) = self.materialize(payload)?;
        let destination = self.wallet.new_destination()?;
        let op = ClaimOp::Activate { name: name.clone(), nonce, value };
        let tx = self.emit(TxRequest {
            claim_script: encode_claim_script(&op, &destination),
            claim_amount: self.config.claim_amount,
            fee,
            spend: Some(claim.outpoint(reservation_txid)),
            data,
        })?;

        self.pending.add(name.clone(), tx.txid);
        info!(name = %name, txid = %tx.txid, reservation = %reservation_txid, fee = %fee, "activation emitted");
        Ok((tx, signature))
    }

    fn update_payload(
        &self,
        name: &Name,
        payload: ClaimPayload,
        new_owner: Option<Destination>,
        policy: UpdateFeePolicy,
    ) -> Result<(Transaction, Option<String>)> {
        self.check_payload(&payload)?;
        self.locks.with(name, || self.update_locked(name, payload, new_owner, policy))
    }

    fn update_locked(
        &self,
        name: &Name,
        payload: ClaimPayload,
        new_owner: Option<Destination>,
        policy: UpdateFeePolicy,
    ) -> Result<(Transaction, Option<String>)> {
        self.check_not_pending(name)?;
        self.wallet.ensure_unlocked()?;
        let height = self.chain.current_height()?;
        let record = match self.status_at(name, height)? {
            ClaimStatus::Active(record) => record,
            ClaimStatus::Expired(_) => {
                return Err(RegistryError::NoActiveClaim { name: name.to_string(), reason: InactiveReason::Expired })
            }
            ClaimStatus::Unclaimed | ClaimStatus::PendingOnly => {
                return Err(RegistryError::NoActiveClaim { name: name.to_string(), reason: InactiveReason::Unclaimed })
            }
        };

        let not_owned = || RegistryError::ClaimNotOwnedLocally { name: name.to_string(), txid: record.txid.to_hex() };
        let owning = self.wallet.get_transaction(&record.txid).ok_or_else(not_owned)?;
        let claim = owning.claim_output().ok_or_else(not_owned)?;
        if !self.wallet.is_mine(&claim.destination) {
            return Err(not_owned());
        }

        let fee = policy.resolve(network_fee(self.chain.as_ref(), height));
        let (value, data, signature) = self.materialize(payload)?;
        let spend = claim.outpoint(record.txid);
        let destination = match new_owner {
            Some(destination) => destination,
            None => self.wallet.new_destination()?,
        };
        let op = ClaimOp::Update { name: name.clone(), value };
        let tx = self.emit(TxRequest {
            claim_script: encode_claim_script(&op, &destination),
            claim_amount: self.config.claim_amount,
            fee,
            spend: Some(spend),
            data,
        })?;

        self.pending.add(name.clone(), tx.txid);
        info!(name = %name, txid = %tx.txid, previous = %record.txid, fee = %fee, "update emitted");
        Ok((tx, signature))
    }

    fn check_payload(&self, payload: &ClaimPayload) -> Result<()> {
        let (len, max) = match payload {
            ClaimPayload::Alias(value) => (value.len(), self.config.max_value_length),
            ClaimPayload::Data(data) => (data.len(), self.config.max_data_length),
        };
        if len > max {
            return Err(RegistryError::PayloadTooLarge { len, max });
        }
        Ok(())
    }

    fn check_not_pending(&self, name: &Name) -> Result<()> {
        let pending = self.pending.pending_for(name);
        match pending.first() {
            Some(first) => Err(RegistryError::PendingConflict {
                name: name.to_string(),
                count: pending.len(),
                first: first.to_hex(),
            }),
            None => Ok(()),
        }
    }

    /// Claim value, transaction data, and the signature for data payloads.
    fn materialize(&self, payload: ClaimPayload) -> Result<(Vec<u8>, Vec<u8>, Option<String>)> {
        match payload {
            ClaimPayload::Alias(value) => Ok((value, Vec::new(), None)),
            ClaimPayload::Data(data) => {
                let signature = BASE64.encode(self.wallet.sign_payload(&data)?);
                Ok((signature.clone().into_bytes(), data, Some(signature)))
            }
        }
    }

    fn emit(&self, request: TxRequest) -> Result<Transaction> {
        let tx = self.wallet.create_and_sign(request)?;
        tx.validate_claim_structure()?;
        self.wallet.broadcast(&tx)?;
        Ok(tx)
    }

    fn signed(&self, tx: Transaction, signature: Option<String>) -> Result<SignedData> {
        let signature = signature
            .ok_or_else(|| RegistryError::Signature(format!("no payload signature for {}", tx.txid)))?;
        Ok(SignedData { signature, txid: tx.txid })
    }

    fn confirm_locked(&self, name: &Name, txid: &TxId, record: ClaimRecord) -> Result<()> {
        if record.name != *name || record.txid != *txid {
            return Err(RegistryError::Validation(format!(
                "record ({}, {}) does not belong to ({}, {})",
                record.name, record.txid, name, txid
            )));
        }
        let height = record.height;
        self.store.append(record)?;
        self.pending.remove(name, txid);

        // the reservation is consumed once an activation spending it confirms
        if let Some(tx) = self.wallet.get_transaction(txid) {
            self.reservations
                .write()
                .retain(|n, r| !(n == name && tx.inputs.iter().any(|i| i.txid == r.txid)));
        }
        info!(name = %name, txid = %txid, height, "claim confirmed");
        Ok(())
    }

    fn invalidate_locked(&self, name: &Name, txid: &TxId) -> bool {
        let removed = self.pending.remove(name, txid);
        if removed {
            info!(name = %name, txid = %txid, "pending operation invalidated");
        }
        removed
    }

    fn invalidate_if_pending(&self, name: &Name, txid: &TxId) -> bool {
        self.locks.with(name, || {
            if self.pending.pending_for(name).contains(txid) {
                self.invalidate_locked(name, txid)
            } else {
                false
            }
        })
    }

    fn index_claim(&self, height: u64, tx: &Transaction, name: Name, value: Vec<u8>, opcode: ClaimOpcode) -> Result<()> {
        let key = name.clone();
        self.locks.with(&key, || self.index_claim_locked(height, tx, name, value, opcode))
    }

    fn index_claim_locked(
        &self,
        height: u64,
        tx: &Transaction,
        name: Name,
        value: Vec<u8>,
        opcode: ClaimOpcode,
    ) -> Result<()> {
        let history = self.history_or_empty(&name)?;
        if history.iter().any(|r| r.txid == tx.txid) {
            debug!(name = %name, txid = %tx.txid, "claim already indexed");
            return Ok(());
        }
        let chain = &self.chain;
        let status = ClaimStatus::evaluate(&history, false, height, |h| chain.expiration_depth(h));
        let accepted = match (opcode, &status) {
            (ClaimOpcode::Activate, ClaimStatus::Active(current)) => {
                warn!(name = %name, txid = %tx.txid, active = %current.txid, "activation of an active name ignored");
                false
            }
            (ClaimOpcode::Activate, _) => true,
            (ClaimOpcode::Update, ClaimStatus::Active(current)) => {
                let spends_claim = tx.inputs.iter().any(|i| i.txid == current.txid);
                if !spends_claim {
                    warn!(name = %name, txid = %tx.txid, active = %current.txid, "update not spending the active claim ignored");
                }
                spends_claim
            }
            (ClaimOpcode::Update, _) => {
                warn!(name = %name, txid = %tx.txid, "update of a name without an active claim ignored");
                false
            }
            (ClaimOpcode::Reserve, _) => false,
        };

        let ours = self.pending.pending_for(&name).contains(&tx.txid);
        if !accepted {
            if ours {
                self.invalidate_locked(&name, &tx.txid);
            }
            return Ok(());
        }

        let record = ClaimRecord { name: name.clone(), value, txid: tx.txid, height };
        if ours {
            self.confirm_locked(&name, &tx.txid, record)
        } else {
            self.store.append(record)?;
            info!(name = %name, txid = %tx.txid, height, "claim indexed");
            Ok(())
        }
    }
}

/// Logs a failed claim indexing and keeps the first failure of the block.
fn record_failure(first_error: &mut Option<RegistryError>, tx: &Transaction, outcome: Result<()>) {
    if let Err(e) = outcome {
        warn!(txid = %tx.txid, error = %e, "claim indexing failed, continuing with the block");
        first_error.get_or_insert(e);
    }
}
