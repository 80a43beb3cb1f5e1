//! Wire format for encrypted values.
//!
//! A blob is always produced and consumed as a unit: the id of the key that
//! encrypted it, the random nonce, and the ciphertext (tag included).

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Self-describing `{key_id, nonce, ciphertext}` record, serialized as JSON
/// with base64 binary fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub key_id: String,
    pub nonce: String,
    pub ciphertext: String,
}

impl EncryptedBlob {
    #[must_use]
    pub fn new(key_id: &str, nonce: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            key_id: key_id.to_string(),
            nonce: Base64::encode_string(nonce),
            ciphertext: Base64::encode_string(ciphertext),
        }
    }

    /// # Errors
    /// Returns [`Error::Malformed`] if the nonce is not valid base64.
    pub fn nonce_bytes(&self) -> Result<Vec<u8>> {
        Base64::decode_vec(&self.nonce).map_err(|_| Error::Malformed)
    }

    /// # Errors
    /// Returns [`Error::Malformed`] if the ciphertext is not valid base64.
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>> {
        Base64::decode_vec(&self.ciphertext).map_err(|_| Error::Malformed)
    }

    /// Serialize for storage alongside the record that owns the field.
    #[must_use]
    pub fn encode(&self) -> String {
        // Three string fields; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Attempt to parse a stored value as a structured blob.
    ///
    /// Returns `None` when the value does not parse; during the plaintext
    /// migration window the caller may then treat it as a legacy value.
    #[must_use]
    pub fn decode(stored: &str) -> Option<Self> {
        let blob: Self = serde_json::from_str(stored).ok()?;
        if blob.key_id.is_empty() {
            return None;
        }
        Some(blob)
    }
}
