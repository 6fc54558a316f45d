//! Ledger transaction model as seen by the registry.
//!
//! **Determinism:** the transaction id is a hash of the canonical transaction data; the
//! same data always yields the same id. Claim transactions are tagged with
//! `CLAIM_TX_VERSION` and carry exactly one claim output.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use crate::core::fee::Amount;
use crate::core::name::Name;
use crate::core::script::{decode_claim_script, ClaimOp, Destination};
use crate::error::{RegistryError, Result};
use crate::signature::hash_message;

/// Version tag of transactions that carry a claim output.
pub const CLAIM_TX_VERSION: u32 = 0x7400;

/// Transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId([u8; 32]);

impl TxId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for TxId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| RegistryError::Validation(format!("invalid txid {}: {}", s, e)))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| RegistryError::Validation(format!("txid must be 32 bytes: {}", s)))?;
        Ok(Self(arr))
    }
}

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script: Vec<u8>,
}

/// A claim output located inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutput {
    pub vout: u32,
    pub op: ClaimOp,
    pub destination: Destination,
}

impl ClaimOutput {
    pub fn outpoint(&self, txid: TxId) -> OutPoint {
        OutPoint { txid, vout: self.vout }
    }
}

/// Structural problems with a claim transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimTxError {
    #[error("Claim transaction carries {0} claim outputs, expected exactly one")]
    ClaimOutputCount(usize),

    #[error("Claim output in a transaction with version {0:#x}")]
    WrongVersion(u32),

    #[error("Hash mismatch: expected {0}, got {1}")]
    HashMismatch(String, String),
}

impl From<ClaimTxError> for RegistryError {
    fn from(err: ClaimTxError) -> Self {
        RegistryError::Validation(err.to_string())
    }
}

/// Ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Hash of the transaction data.
    pub txid: TxId,
    pub version: u32,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TxOut>,
    /// Fee paid to the ledger's fee sink.
    pub fee: Amount,
    /// Opaque payload attached to the transaction (data variant).
    pub data: Vec<u8>,
    /// Wallet-assigned creation counter; keeps otherwise identical transactions distinct.
    pub serial: u64,
}

impl Transaction {
    /// Constructs a transaction and computes its id.
    pub fn new(
        version: u32,
        inputs: Vec<OutPoint>,
        outputs: Vec<TxOut>,
        fee: Amount,
        data: Vec<u8>,
        serial: u64,
    ) -> Result<Self> {
        let mut tx = Self {
            txid: TxId([0u8; 32]),
            version,
            inputs,
            outputs,
            fee,
            data,
            serial,
        };
        tx.txid = tx.compute_txid()?;
        Ok(tx)
    }

    /// Same transaction data -> same id.
    pub fn compute_txid(&self) -> Result<TxId> {
        #[derive(Serialize)]
        struct TransactionHashData<'a> {
            version: u32,
            inputs: &'a [OutPoint],
            outputs: &'a [TxOut],
            fee: Amount,
            data: &'a [u8],
            serial: u64,
        }
        let hash_data = TransactionHashData {
            version: self.version,
            inputs: &self.inputs,
            outputs: &self.outputs,
            fee: self.fee,
            data: &self.data,
            serial: self.serial,
        };
        Ok(TxId(hash_message(&hash_data)?))
    }

    pub fn validate_txid(&self) -> Result<()> {
        let computed = self.compute_txid()?;
        if computed != self.txid {
            return Err(ClaimTxError::HashMismatch(self.txid.to_hex(), computed.to_hex()).into());
        }
        Ok(())
    }

    /// The first output that decodes as a claim script.
    pub fn claim_output(&self) -> Option<ClaimOutput> {
        self.outputs.iter().enumerate().find_map(|(vout, out)| {
            decode_claim_script(&out.script).map(|(op, destination)| ClaimOutput {
                vout: vout as u32,
                op,
                destination,
            })
        })
    }

    /// Name touched by this transaction's claim output, if any.
    pub fn claim_name(&self) -> Option<Name> {
        self.claim_output().and_then(|c| c.op.name().cloned())
    }

    /// Checks the claim structure: claim outputs only in claim-version transactions,
    /// and never more than one of them.
    pub fn validate_claim_structure(&self) -> std::result::Result<(), ClaimTxError> {
        let count = self
            .outputs
            .iter()
            .filter(|out| decode_claim_script(&out.script).is_some())
            .count();
        match count {
            0 => Ok(()),
            1 if self.version == CLAIM_TX_VERSION => Ok(()),
            1 => Err(ClaimTxError::WrongVersion(self.version)),
            n => Err(ClaimTxError::ClaimOutputCount(n)),
        }
    }
}

/// What the registry asks the wallet to build: one claim output, an optional input to
/// spend (the reservation or the current claim), and the anti-squat fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub claim_script: Vec<u8>,
    pub claim_amount: Amount,
    pub fee: Amount,
    pub spend: Option<OutPoint>,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::commitment::{commit, Nonce};
    use crate::core::fee::MIN_AMOUNT;
    use crate::core::script::{encode_claim_script, KeyId};

    fn reserve_out() -> TxOut {
        let commitment = commit(&Nonce::from_u64(1), &Name::new("bob").unwrap());
        TxOut {
            value: MIN_AMOUNT,
            script: encode_claim_script(
                &ClaimOp::Reserve { commitment },
                &Destination::KeyDestination(KeyId([3; 20])),
            ),
        }
    }

    #[test]
    fn test_txid_is_deterministic() {
        let a = Transaction::new(CLAIM_TX_VERSION, vec![], vec![reserve_out()], Amount::ZERO, vec![], 1).unwrap();
        let b = Transaction::new(CLAIM_TX_VERSION, vec![], vec![reserve_out()], Amount::ZERO, vec![], 1).unwrap();
        let c = Transaction::new(CLAIM_TX_VERSION, vec![], vec![reserve_out()], Amount::ZERO, vec![], 2).unwrap();
        assert_eq!(a.txid, b.txid);
        assert_ne!(a.txid, c.txid);
        assert!(a.validate_txid().is_ok());
    }

    #[test]
    fn test_tampered_tx_fails_txid_check() {
        let mut tx = Transaction::new(CLAIM_TX_VERSION, vec![], vec![reserve_out()], Amount::ZERO, vec![], 1).unwrap();
        tx.fee = Amount::new(5);
        assert!(tx.validate_txid().is_err());
    }

    #[test]
    fn test_claim_output_lookup() {
        let plain = TxOut { value: Amount::new(10), script: vec![0xac] };
        let tx = Transaction::new(CLAIM_TX_VERSION, vec![], vec![plain, reserve_out()], Amount::ZERO, vec![], 0).unwrap();
        let claim = tx.claim_output().unwrap();
        assert_eq!(claim.vout, 1);
        assert!(matches!(claim.op, ClaimOp::Reserve { .. }));
        assert!(tx.claim_name().is_none());
        assert_eq!(claim.outpoint(tx.txid), OutPoint { txid: tx.txid, vout: 1 });
    }

    #[test]
    fn test_claim_structure_validation() {
        let ok = Transaction::new(CLAIM_TX_VERSION, vec![], vec![reserve_out()], Amount::ZERO, vec![], 0).unwrap();
        assert!(ok.validate_claim_structure().is_ok());

        let two = Transaction::new(CLAIM_TX_VERSION, vec![], vec![reserve_out(), reserve_out()], Amount::ZERO, vec![], 0).unwrap();
        assert_eq!(two.validate_claim_structure(), Err(ClaimTxError::ClaimOutputCount(2)));

        let wrong = Transaction::new(1, vec![], vec![reserve_out()], Amount::ZERO, vec![], 0).unwrap();
        assert_eq!(wrong.validate_claim_structure(), Err(ClaimTxError::WrongVersion(1)));
    }

    #[test]
    fn test_txid_parse() {
        let tx = Transaction::new(1, vec![], vec![], Amount::ZERO, vec![], 0).unwrap();
        assert_eq!(tx.txid.to_hex().parse::<TxId>().unwrap(), tx.txid);
        assert!("abcd".parse::<TxId>().is_err());
    }
}
