use bip32::{DerivationPath, XPrv};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::collections::HashMap;
use crate::core::script::{Destination, KeyId};
use crate::error::{RegistryError, Result};
use crate::mnemonic::WalletSeed;
use crate::signature::key_id;

/// BIP44 coin type used for destination keys
pub const COIN_TYPE: u32 = 57;

/// A derived destination key
#[derive(Debug, Clone)]
pub struct PoolKey {
    pub index: u32,
    pub path: String,
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    pub key_id: KeyId,
}

impl PoolKey {
    pub fn destination(&self) -> Destination {
        Destination::KeyDestination(self.key_id)
    }
}

/// Deterministic pool of destination keys derived with BIP32 from a wallet seed
///
/// Key `i` lives at `m/44'/57'/{account}'/0/{i}`. Index 0 is the wallet's first key,
/// the one that signs data payloads.
pub struct KeyPool {
    master_seed: [u8; 64],
    account: u32,
    issued: Vec<PoolKey>,
    by_id: HashMap<KeyId, u32>,
}

impl KeyPool {
    /// Creates a pool for `account`
    ///
    /// # Arguments
    /// * `seed` - wallet seed phrase and passphrase
    /// * `account` - BIP44 account (0 <= account < 2^31 - 1)
    pub fn new(seed: &WalletSeed, account: u32) -> Result<Self> {
        const MAX_INDEX: u32 = 2u32.pow(31) - 1;

        if account >= MAX_INDEX {
            return Err(RegistryError::Validation(
                format!("account must be in range [0, {}]", MAX_INDEX - 1),
            ));
        }

        Ok(Self {
            master_seed: seed.to_seed()?,
            account,
            issued: Vec::new(),
            by_id: HashMap::new(),
        })
    }

    /// Derives key `index` without issuing it
    pub fn derive(&self, index: u32) -> Result<PoolKey> {
        let secp = Secp256k1::new();

        let root_xprv = XPrv::new(self.master_seed)?;
        let path = format!("m/44'/{}'/{}'/0/{}", COIN_TYPE, self.account, index);
        let derivation_path: DerivationPath = path.parse()
            .map_err(|e| RegistryError::Bip32(format!("Invalid derivation path: {}", e)))?;

        // Derive path by iterating through components
        let node = derivation_path.iter().fold(Ok(root_xprv), |acc, child_num| {
            acc?.derive_child(child_num)
        })?;
        let secret_key = SecretKey::from_slice(&node.private_key().to_bytes())
            .map_err(|e| RegistryError::Crypto(format!("Invalid private key: {}", e)))?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        Ok(PoolKey {
            index,
            path,
            secret_key,
            public_key,
            key_id: key_id(&public_key),
        })
    }

    /// Issues the next unused key
    pub fn next_key(&mut self) -> Result<PoolKey> {
        let index = self.issued.len() as u32;
        let key = self.derive(index)?;
        self.by_id.insert(key.key_id, index);
        self.issued.push(key.clone());
        Ok(key)
    }

    /// The first key, issuing it if needed
    pub fn first_key(&mut self) -> Result<PoolKey> {
        match self.issued.first() {
            Some(key) => Ok(key.clone()),
            None => self.next_key(),
        }
    }

    /// Whether `id` belongs to an issued key
    pub fn contains(&self, id: &KeyId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn issued(&self) -> usize {
        self.issued.len()
    }
}

impl std::fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPool")
            .field("account", &self.account)
            .field("issued", &self.issued.len())
            .finish()
    }
}
