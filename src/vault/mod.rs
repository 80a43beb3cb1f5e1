//! Field and document encryption with key rotation.
//!
//! Symmetric envelope scheme on ChaCha20-Poly1305: a ring of 256-bit keys,
//! exactly one active at a time. Blobs embed the id of the key that produced
//! them, so rotated-out keys stay resolvable for legacy ciphertext. Raw key
//! material never leaves the ring; key metadata carries a verification hash
//! only.

pub mod blob;
pub mod envelope;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretBox};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::audit::models::AuditEvent;
use crate::audit::AuditSink;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use blob::EncryptedBlob;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
/// Hex chars of the key-hash prefix used as the key identifier.
const KEY_ID_LEN: usize = 16;

/// Metadata view of a ring entry. Never contains key material.
#[derive(Debug, Clone)]
pub struct KeyMetadata {
    pub key_id: String,
    /// SHA-256 of the raw key, for verification against a restored backup.
    pub key_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

struct KeyEntry {
    key: SecretBox<[u8; KEY_LEN]>,
    key_hash: String,
    active: bool,
    created_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
}

fn derive_key_id(key_hash: &str) -> String {
    key_hash.chars().take(KEY_ID_LEN).collect()
}

fn hash_key(key: &[u8]) -> String {
    hex::encode(Sha256::digest(key))
}

pub(crate) fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| Error::EncryptionFailure)?;
    Ok((nonce_bytes, ciphertext))
}

pub(crate) fn open(key: &[u8; KEY_LEN], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(Error::IntegrityFailure);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::IntegrityFailure)
}

struct Ring {
    keys: HashMap<String, KeyEntry>,
    active_id: String,
}

/// Field-level encryption manager.
pub struct EncryptionManager {
    ring: RwLock<Ring>,
    sink: AuditSink,
    legacy_fallback: bool,
}

impl EncryptionManager {
    /// Create a manager with a fresh active key.
    #[must_use]
    pub fn new(sink: AuditSink, config: &EngineConfig) -> Self {
        let (key_id, entry) = Self::generate_entry();
        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), entry);
        Self {
            ring: RwLock::new(Ring {
                keys,
                active_id: key_id,
            }),
            sink,
            legacy_fallback: config.legacy_plaintext_fallback(),
        }
    }

    fn generate_entry() -> (String, KeyEntry) {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let key_hash = hash_key(&key);
        let key_id = derive_key_id(&key_hash);
        let entry = KeyEntry {
            key: SecretBox::new(Box::new(key)),
            key_hash,
            active: true,
            created_at: Utc::now(),
            rotated_at: None,
        };
        (key_id, entry)
    }

    /// Encrypt a byte sequence under the active key. Empty input is valid
    /// and round-trips as identity.
    ///
    /// # Errors
    /// Returns [`Error::EncryptionFailure`] if the cipher rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let result = self.encrypt_inner(plaintext);
        let key_id = result.as_ref().ok().map(|b| b.key_id.clone());
        self.audit("field_encrypt", key_id, result.as_ref().err());
        result
    }

    fn encrypt_inner(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let ring = self.ring.read().map_err(|_| Error::StoreUnavailable)?;
        let entry = ring.keys.get(&ring.active_id).ok_or(Error::KeyMismatch)?;
        let (nonce, ciphertext) = seal(entry.key.expose_secret(), plaintext)?;
        Ok(EncryptedBlob::new(&ring.active_id, &nonce, &ciphertext))
    }

    /// Decrypt a blob via its embedded key id.
    ///
    /// # Errors
    /// [`Error::KeyMismatch`] when the blob references a key this ring does
    /// not hold; [`Error::IntegrityFailure`] when the authentication tag does
    /// not verify. Neither is ever retried with another key.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        let result = self.decrypt_inner(blob);
        self.audit(
            "field_decrypt",
            Some(blob.key_id.clone()),
            result.as_ref().err(),
        );
        result
    }

    fn decrypt_inner(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        let nonce = blob.nonce_bytes()?;
        let ciphertext = blob.ciphertext_bytes()?;
        let ring = self.ring.read().map_err(|_| Error::StoreUnavailable)?;
        let entry = ring.keys.get(&blob.key_id).ok_or(Error::KeyMismatch)?;
        open(entry.key.expose_secret(), &nonce, &ciphertext)
    }

    /// Generate a new key, mark it active, retain the previous key for
    /// decryption only. Returns the new key id.
    ///
    /// # Errors
    /// Returns [`Error::StoreUnavailable`] if the ring lock is poisoned.
    pub fn rotate_key(&self) -> Result<String> {
        let (new_id, entry) = Self::generate_entry();
        {
            let mut ring = self.ring.write().map_err(|_| Error::StoreUnavailable)?;
            if ring.keys.contains_key(&new_id) {
                return Err(Error::EncryptionFailure);
            }
            let now = Utc::now();
            let previous = ring.active_id.clone();
            if let Some(old) = ring.keys.get_mut(&previous) {
                old.active = false;
                old.rotated_at = Some(now);
            }
            ring.keys.insert(new_id.clone(), entry);
            ring.active_id = new_id.clone();
        }
        info!(key_id = %new_id, "encryption key rotated");
        self.sink.record(
            AuditEvent::admin(
                "system",
                "encryption_key_rotate",
                None,
                &RequestContext::new(),
            )
            .with_detail(serde_json::json!({ "key_id": new_id })),
        );
        Ok(new_id)
    }

    /// Id of the key new encryptions will reference.
    ///
    /// # Errors
    /// Returns [`Error::StoreUnavailable`] if the ring lock is poisoned.
    pub fn active_key_id(&self) -> Result<String> {
        let ring = self.ring.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(ring.active_id.clone())
    }

    /// Metadata for every key in the ring; no key material.
    ///
    /// # Errors
    /// Returns [`Error::StoreUnavailable`] if the ring lock is poisoned.
    pub fn key_metadata(&self) -> Result<Vec<KeyMetadata>> {
        let ring = self.ring.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(ring
            .keys
            .iter()
            .map(|(key_id, entry)| KeyMetadata {
                key_id: key_id.clone(),
                key_hash: entry.key_hash.clone(),
                active: entry.active,
                created_at: entry.created_at,
                rotated_at: entry.rotated_at,
            })
            .collect())
    }

    /// Encrypt a string field into its stored representation.
    ///
    /// # Errors
    /// Propagates [`Self::encrypt`] failures.
    pub fn protect(&self, value: &str) -> Result<String> {
        Ok(self.encrypt(value.as_bytes())?.encode())
    }

    /// Resolve a stored field back to plaintext.
    ///
    /// Structured parse is attempted first; only when it fails and the
    /// migration fallback is enabled is the value treated as legacy
    /// plaintext. The fallback branch is transitional and disappears once
    /// [`Self::migrate_legacy_values`] has run everywhere.
    ///
    /// # Errors
    /// Propagates decryption failures; [`Error::Malformed`] for unparseable
    /// values when the fallback is disabled.
    pub fn reveal(&self, stored: &str) -> Result<String> {
        match EncryptedBlob::decode(stored) {
            Some(blob) => {
                let bytes = self.decrypt(&blob)?;
                String::from_utf8(bytes).map_err(|_| Error::Malformed)
            }
            None if self.legacy_fallback => Ok(stored.to_string()),
            None => Err(Error::Malformed),
        }
    }

    /// One-time migration pass: re-encrypt every legacy plaintext value in
    /// place. Returns how many values were migrated.
    ///
    /// # Errors
    /// Propagates encryption failures; values migrated before the failure
    /// keep their new form.
    pub fn migrate_legacy_values<'a, I>(&self, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a mut String>,
    {
        let mut migrated = 0;
        for value in values {
            if EncryptedBlob::decode(value).is_none() {
                *value = self.protect(value)?;
                migrated += 1;
            }
        }
        Ok(migrated)
    }

    fn audit(&self, action: &str, key_id: Option<String>, err: Option<&Error>) {
        let mut event = AuditEvent::action(None, action, None, err.is_none(), &RequestContext::new());
        if let Some(key_id) = key_id {
            event = event.with_detail(serde_json::json!({ "key_id": key_id }));
        }
        if let Some(err) = err {
            event = event.with_reason(err.reason_code());
        }
        self.sink.record(event);
    }
}
