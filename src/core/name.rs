//! Registry names: opaque, case-sensitive byte strings of at most 255 bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{RegistryError, Result};

/// Maximum name length in bytes.
pub const MAX_NAME_LENGTH: usize = 255;

/// Primary key of the registry. Ordered byte-lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Name(Vec<u8>);

impl Name {
    /// Creates a name, rejecting empty and over-long byte strings.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(RegistryError::Validation("name must not be empty".to_string()));
        }
        if bytes.len() > MAX_NAME_LENGTH {
            return Err(RegistryError::NameTooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decoded form used for display and pattern matching.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl TryFrom<&str> for Name {
    type Error = RegistryError;

    fn try_from(value: &str) -> Result<Self> {
        Name::new(value)
    }
}
