//! Compact SHA-1 digest type
//!
//! Expected hashes arrive as 40-character hex strings. They are stored as
//! their raw 20-byte form so comparisons against a freshly computed digest are
//! plain array equality, while serialization keeps the hex representation.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::constants::files;
use crate::errors::{ManifestError, ManifestResult};

/// SHA-1 digest stored as a 20-byte array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1Hash([u8; 20]);

impl Sha1Hash {
    /// Create a hash from a hex string
    ///
    /// # Arguments
    ///
    /// * `hex` - 40-character hexadecimal string (case insensitive)
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::InvalidHash` if the string is not a SHA-1 hex digest
    ///
    /// # Examples
    ///
    /// ```rust
    /// use depmirror::app::Sha1Hash;
    ///
    /// let lower = Sha1Hash::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709")?;
    /// let upper = Sha1Hash::from_hex("DA39A3EE5E6B4B0D3255BFEF95601890AFD80709")?;
    /// assert_eq!(lower, upper);
    /// # Ok::<(), depmirror::errors::ManifestError>(())
    /// ```
    pub fn from_hex(hex: &str) -> ManifestResult<Self> {
        let invalid = || ManifestError::InvalidHash {
            hash: hex.to_string(),
        };

        if hex.len() != 40 {
            return Err(invalid());
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| invalid())?;
        Ok(Sha1Hash(bytes))
    }

    /// Lowercase 40-character hex representation
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Sha1Hash(bytes)
    }

    /// Digest of an in-memory buffer
    pub fn digest(data: &[u8]) -> Self {
        Sha1Hash(Sha1::digest(data).into())
    }

    /// Hash a reader to exhaustion, returning the digest and the byte count
    ///
    /// Reads in fixed-size blocks so arbitrarily large inputs hash in
    /// constant memory.
    pub fn compute<R: Read>(mut reader: R) -> std::io::Result<(Self, u64)> {
        let mut hasher = Sha1::new();
        let mut buffer = vec![0u8; files::HASH_BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        Ok((Sha1Hash(hasher.finalize().into()), total))
    }
}

impl fmt::Display for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Sha1Hash {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Sha1Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha1Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_string = String::deserialize(deserializer)?;
        Self::from_hex(&hex_string).map_err(serde::de::Error::custom)
    }
}
