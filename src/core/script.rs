//! Claim output scripts.
//!
//! Every claim transaction carries exactly one tagged output:
//!
//! ```text
//! RESERVE : OP_1 <commitment>           OP_2DROP          <destination script>
//! ACTIVATE: OP_2 <name> <nonce> <value> OP_2DROP OP_2DROP <destination script>
//! UPDATE  : OP_3 <name> <value>         OP_2DROP OP_DROP  <destination script>
//! ```
//!
//! The drops consume the opcode tag and the pushed data so the remaining script is an
//! ordinary spendable destination. The byte layout is consensus-visible and must not change.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::core::commitment::{Commitment, Nonce, HASH160_LEN};
use crate::core::name::Name;
use crate::error::{RegistryError, Result};

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1: u8 = 0x51;
pub const OP_DROP: u8 = 0x75;
pub const OP_2DROP: u8 = 0x6d;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

/// Protocol opcode tags, encoded on-chain as `OP_N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimOpcode {
    Reserve = 1,
    Activate = 2,
    Update = 3,
}

impl ClaimOpcode {
    /// `OP_N` byte for this tag.
    pub fn op_n(self) -> u8 {
        OP_1 - 1 + self as u8
    }

    pub fn from_op_n(byte: u8) -> Option<Self> {
        match byte.checked_sub(OP_1 - 1)? {
            1 => Some(ClaimOpcode::Reserve),
            2 => Some(ClaimOpcode::Activate),
            3 => Some(ClaimOpcode::Update),
            _ => None,
        }
    }
}

/// Decoded protocol operation carried by a claim output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOp {
    Reserve { commitment: Commitment },
    Activate { name: Name, nonce: Nonce, value: Vec<u8> },
    Update { name: Name, value: Vec<u8> },
}

impl ClaimOp {
    pub fn opcode(&self) -> ClaimOpcode {
        match self {
            ClaimOp::Reserve { .. } => ClaimOpcode::Reserve,
            ClaimOp::Activate { .. } => ClaimOpcode::Activate,
            ClaimOp::Update { .. } => ClaimOpcode::Update,
        }
    }

    /// Name touched by the operation. Reservations hide the name behind the commitment.
    pub fn name(&self) -> Option<&Name> {
        match self {
            ClaimOp::Reserve { .. } => None,
            ClaimOp::Activate { name, .. } | ClaimOp::Update { name, .. } => Some(name),
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            ClaimOp::Reserve { .. } => None,
            ClaimOp::Activate { value, .. } | ClaimOp::Update { value, .. } => Some(value),
        }
    }
}

/// Hash of a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId(pub [u8; HASH160_LEN]);

/// Hash of a redeem script.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(pub [u8; HASH160_LEN]);

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", hex::encode(self.0))
    }
}

impl fmt::Debug for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptId({})", hex::encode(self.0))
    }
}

/// Spendable destination that follows the claim prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    NoDestination,
    KeyDestination(KeyId),
    ScriptDestination(ScriptId),
}

impl Destination {
    /// Standard output script for the destination.
    pub fn to_script(&self) -> Vec<u8> {
        match self {
            Destination::NoDestination => Vec::new(),
            Destination::KeyDestination(id) => {
                let mut s = Vec::with_capacity(25);
                s.extend_from_slice(&[OP_DUP, OP_HASH160, HASH160_LEN as u8]);
                s.extend_from_slice(&id.0);
                s.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
                s
            }
            Destination::ScriptDestination(id) => {
                let mut s = Vec::with_capacity(23);
                s.extend_from_slice(&[OP_HASH160, HASH160_LEN as u8]);
                s.extend_from_slice(&id.0);
                s.push(OP_EQUAL);
                s
            }
        }
    }

    /// Recognizes the standard key and script templates. Anything else has no destination.
    pub fn from_script(script: &[u8]) -> Destination {
        match script {
            [OP_DUP, OP_HASH160, 20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == HASH160_LEN => {
                let mut id = [0u8; HASH160_LEN];
                id.copy_from_slice(hash);
                Destination::KeyDestination(KeyId(id))
            }
            [OP_HASH160, 20, hash @ .., OP_EQUAL] if hash.len() == HASH160_LEN => {
                let mut id = [0u8; HASH160_LEN];
                id.copy_from_slice(hash);
                Destination::ScriptDestination(ScriptId(id))
            }
            _ => Destination::NoDestination,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::NoDestination => write!(f, "none"),
            Destination::KeyDestination(id) => write!(f, "key:{}", hex::encode(id.0)),
            Destination::ScriptDestination(id) => write!(f, "script:{}", hex::encode(id.0)),
        }
    }
}

impl FromStr for Destination {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "none" {
            return Ok(Destination::NoDestination);
        }
        let (kind, hash) = s
            .split_once(':')
            .ok_or_else(|| RegistryError::Validation(format!("invalid destination: {}", s)))?;
        let bytes = hex::decode(hash)
            .map_err(|e| RegistryError::Validation(format!("invalid destination hash: {}", e)))?;
        let id: [u8; HASH160_LEN] = bytes
            .try_into()
            .map_err(|_| RegistryError::Validation("destination hash must be 20 bytes".to_string()))?;
        match kind {
            "key" => Ok(Destination::KeyDestination(KeyId(id))),
            "script" => Ok(Destination::ScriptDestination(ScriptId(id))),
            other => Err(RegistryError::Validation(format!("unknown destination kind: {}", other))),
        }
    }
}

fn push_data(buf: &mut BytesMut, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        buf.put_u8(len as u8);
    } else if len <= u8::MAX as usize {
        buf.put_u8(OP_PUSHDATA1);
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(OP_PUSHDATA2);
        buf.put_u16_le(len as u16);
    } else {
        buf.put_u8(OP_PUSHDATA4);
        buf.put_u32_le(len as u32);
    }
    buf.put_slice(data);
}

/// Builds the claim output script for `op` paying to `destination`.
pub fn encode_claim_script(op: &ClaimOp, destination: &Destination) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(op.opcode().op_n());
    match op {
        ClaimOp::Reserve { commitment } => {
            push_data(&mut buf, commitment.as_bytes());
            buf.put_u8(OP_2DROP);
        }
        ClaimOp::Activate { name, nonce, value } => {
            push_data(&mut buf, name.as_bytes());
            push_data(&mut buf, nonce.as_bytes());
            push_data(&mut buf, value);
            buf.put_u8(OP_2DROP);
            buf.put_u8(OP_2DROP);
        }
        ClaimOp::Update { name, value } => {
            push_data(&mut buf, name.as_bytes());
            push_data(&mut buf, value);
            buf.put_u8(OP_2DROP);
            buf.put_u8(OP_DROP);
        }
    }
    buf.put_slice(&destination.to_script());
    buf.to_vec()
}

struct ScriptReader<'a> {
    script: &'a [u8],
    pos: usize,
}

impl<'a> ScriptReader<'a> {
    fn new(script: &'a [u8]) -> Self {
        Self { script, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.script.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn push(&mut self) -> Option<&'a [u8]> {
        let op = self.byte()?;
        let len = match op {
            n if n < OP_PUSHDATA1 => n as usize,
            OP_PUSHDATA1 => self.byte()? as usize,
            OP_PUSHDATA2 => {
                let b = self.take(2)?;
                u16::from_le_bytes([b[0], b[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let b = self.take(4)?;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
            }
            _ => return None,
        };
        self.take(len)
    }

    fn expect(&mut self, ops: &[u8]) -> Option<()> {
        (self.take(ops.len())? == ops).then_some(())
    }

    fn rest(&self) -> &'a [u8] {
        &self.script[self.pos..]
    }
}

/// Parses a claim output script. Returns `None` for ordinary outputs and for malformed
/// claim prefixes (wrong push count, missing drops, invalid name or commitment length).
pub fn decode_claim_script(script: &[u8]) -> Option<(ClaimOp, Destination)> {
    let mut reader = ScriptReader::new(script);
    let opcode = ClaimOpcode::from_op_n(reader.byte()?)?;
    let op = match opcode {
        ClaimOpcode::Reserve => {
            let commitment = Commitment::from_slice(reader.push()?)?;
            reader.expect(&[OP_2DROP])?;
            ClaimOp::Reserve { commitment }
        }
        ClaimOpcode::Activate => {
            let name = Name::new(reader.push()?).ok()?;
            let nonce = Nonce::from_bytes(reader.push()?.to_vec());
            let value = reader.push()?.to_vec();
            reader.expect(&[OP_2DROP, OP_2DROP])?;
            ClaimOp::Activate { name, nonce, value }
        }
        ClaimOpcode::Update => {
            let name = Name::new(reader.push()?).ok()?;
            let value = reader.push()?.to_vec();
            reader.expect(&[OP_2DROP, OP_DROP])?;
            ClaimOp::Update { name, value }
        }
    };
    Some((op, Destination::from_script(reader.rest())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::commitment::commit;

    fn key_dest() -> Destination {
        Destination::KeyDestination(KeyId([0x11; 20]))
    }

    #[test]
    fn test_opcode_tags() {
        assert_eq!(ClaimOpcode::Reserve.op_n(), 0x51);
        assert_eq!(ClaimOpcode::Activate.op_n(), 0x52);
        assert_eq!(ClaimOpcode::Update.op_n(), 0x53);
        assert_eq!(ClaimOpcode::from_op_n(0x54), None);
        assert_eq!(ClaimOpcode::from_op_n(0x00), None);
    }

    #[test]
    fn test_reserve_script_layout() {
        let commitment = commit(&Nonce::from_u64(9), &Name::new("bob").unwrap());
        let script = encode_claim_script(&ClaimOp::Reserve { commitment }, &key_dest());
        assert_eq!(script[0], 0x51);
        assert_eq!(script[1], 20);
        assert_eq!(&script[2..22], commitment.as_bytes());
        assert_eq!(script[22], OP_2DROP);
        assert_eq!(&script[23..], key_dest().to_script().as_slice());
    }

    #[test]
    fn test_update_script_layout() {
        let op = ClaimOp::Update { name: Name::new("ab").unwrap(), value: b"v".to_vec() };
        let script = encode_claim_script(&op, &Destination::NoDestination);
        assert_eq!(script, vec![0x53, 2, b'a', b'b', 1, b'v', OP_2DROP, OP_DROP]);
    }

    #[test]
    fn test_activate_decodes_with_empty_nonce_and_long_value() {
        let op = ClaimOp::Activate {
            name: Name::new("bob").unwrap(),
            nonce: Nonce::from_u64(0),
            value: vec![7u8; 300],
        };
        let script = encode_claim_script(&op, &key_dest());
        // 300 bytes needs OP_PUSHDATA2
        assert!(script.windows(3).any(|w| w == [OP_PUSHDATA2, 0x2c, 0x01]));
        let (decoded, dest) = decode_claim_script(&script).unwrap();
        assert_eq!(decoded, op);
        assert_eq!(dest, key_dest());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_claim_script(&[]).is_none());
        assert!(decode_claim_script(&key_dest().to_script()).is_none());
        // update missing the trailing OP_DROP
        assert!(decode_claim_script(&[0x53, 1, b'a', 1, b'v', OP_2DROP]).is_none());
        // reservation with a 19-byte commitment
        let mut short = vec![0x51, 19];
        short.extend_from_slice(&[0u8; 19]);
        short.push(OP_2DROP);
        assert!(decode_claim_script(&short).is_none());
        // truncated push
        assert!(decode_claim_script(&[0x53, 5, b'a']).is_none());
    }

    #[test]
    fn test_destination_templates() {
        let script_dest = Destination::ScriptDestination(ScriptId([0x22; 20]));
        assert_eq!(Destination::from_script(&key_dest().to_script()), key_dest());
        assert_eq!(Destination::from_script(&script_dest.to_script()), script_dest);
        assert_eq!(Destination::from_script(&[OP_CHECKSIG]), Destination::NoDestination);
        assert!(Destination::NoDestination.to_script().is_empty());
    }

    #[test]
    fn test_destination_parse() {
        let text = key_dest().to_string();
        assert_eq!(text.parse::<Destination>().unwrap(), key_dest());
        assert_eq!("none".parse::<Destination>().unwrap(), Destination::NoDestination);
        assert!("key:abcd".parse::<Destination>().is_err());
        assert!("pubkey:1111111111111111111111111111111111111111".parse::<Destination>().is_err());
    }
}
