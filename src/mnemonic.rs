use bip39::{Language, Mnemonic};
use rand::Rng;
use crate::error::{RegistryError, Result};

pub const PASSPHRASE_CHARACTER_SET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated seed passphrases
pub const PASSPHRASE_LENGTH: usize = 12;

/// BIP39 phrase plus passphrase that together determine every wallet key
#[derive(Clone, PartialEq, Eq)]
pub struct WalletSeed {
    phrase: String,
    passphrase: String,
}

impl WalletSeed {
    /// Generates a 24-word phrase (256 bits of entropy) and a random passphrase
    pub fn generate() -> Result<Self> {
        let mut entropy = [0u8; 32];
        rand::thread_rng().fill(&mut entropy);

        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)?;
        Ok(Self {
            phrase: mnemonic.to_string(),
            passphrase: generate_passphrase(PASSPHRASE_LENGTH)?,
        })
    }

    /// Restores a seed from an existing phrase
    pub fn restore(phrase: &str, passphrase: &str) -> Result<Self> {
        if !validate_mnemonic(phrase) {
            return Err(RegistryError::Validation(
                "Provided mnemonic is not valid according to BIP39".to_string(),
            ));
        }
        Ok(Self {
            phrase: phrase.to_string(),
            passphrase: passphrase.to_string(),
        })
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// 64-byte BIP39 master seed
    pub fn to_seed(&self) -> Result<[u8; 64]> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &self.phrase)?;
        Ok(mnemonic.to_seed(&self.passphrase))
    }
}

impl std::fmt::Debug for WalletSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WalletSeed(<redacted>)")
    }
}

/// Generates a random passphrase of given length
fn generate_passphrase(length: usize) -> Result<String> {
    if length == 0 {
        return Err(RegistryError::Validation("Length must be greater than 0".to_string()));
    }

    let mut rng = rand::thread_rng();
    let chars: Vec<char> = PASSPHRASE_CHARACTER_SET.chars().collect();

    let result: String = (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..chars.len());
            chars[idx]
        })
        .collect();

    Ok(result)
}

/// Validates a BIP39 mnemonic phrase
pub fn validate_mnemonic(mnemonic: &str) -> bool {
    Mnemonic::parse_in_normalized(Language::English, mnemonic).is_ok()
}
