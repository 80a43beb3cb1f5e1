//! Envelope encryption for whole documents.
//!
//! Each document is encrypted under its own random key; the document key is
//! wrapped by the manager's active master key and stored separately from the
//! ciphertext. Deleting a document removes both halves, so the plaintext is
//! cryptographically unrecoverable afterwards.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::blob::EncryptedBlob;
use super::EncryptionManager;
use crate::audit::models::AuditEvent;
use crate::audit::AuditSink;
use crate::context::RequestContext;
use crate::error::{Error, Result};

const DOC_KEY_LEN: usize = 32;

/// Document-level vault layered over the field [`EncryptionManager`].
pub struct DocumentVault {
    master: Arc<EncryptionManager>,
    /// Ciphertext per document, encrypted under the per-document key.
    documents: RwLock<HashMap<String, EncryptedBlob>>,
    /// Per-document keys, wrapped under the master key. Kept apart from the
    /// ciphertext so neither half is useful alone.
    wrapped_keys: RwLock<HashMap<String, EncryptedBlob>>,
    sink: AuditSink,
}

impl DocumentVault {
    #[must_use]
    pub fn new(master: Arc<EncryptionManager>, sink: AuditSink) -> Self {
        Self {
            master,
            documents: RwLock::new(HashMap::new()),
            wrapped_keys: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Encrypt and store a document under a fresh per-document key.
    ///
    /// # Errors
    /// Propagates master-key wrap failures.
    pub fn encrypt_document(&self, document_id: &str, plaintext: &[u8]) -> Result<()> {
        let result = self.encrypt_document_inner(document_id, plaintext);
        self.audit("document_encrypt", document_id, result.as_ref().err());
        result
    }

    fn encrypt_document_inner(&self, document_id: &str, plaintext: &[u8]) -> Result<()> {
        let mut doc_key = [0u8; DOC_KEY_LEN];
        OsRng.fill_bytes(&mut doc_key);
        let doc_key_id: String = hex::encode(Sha256::digest(doc_key))
            .chars()
            .take(16)
            .collect();

        let (nonce, ciphertext) = super::seal(&doc_key, plaintext)?;
        let document = EncryptedBlob::new(&doc_key_id, &nonce, &ciphertext);
        let wrapped = self.master.encrypt(&doc_key)?;

        // Both halves are stored, or neither.
        let mut documents = self.documents.write().map_err(|_| Error::StoreUnavailable)?;
        let mut wrapped_keys = self
            .wrapped_keys
            .write()
            .map_err(|_| Error::StoreUnavailable)?;
        documents.insert(document_id.to_string(), document);
        wrapped_keys.insert(document_id.to_string(), wrapped);
        Ok(())
    }

    /// Decrypt a stored document: unwrap its key under the master, then open
    /// the ciphertext.
    ///
    /// # Errors
    /// [`Error::NotFound`] for unknown documents; [`Error::KeyMismatch`] when
    /// the ciphertext references a different key than the unwrapped one;
    /// integrity failures are fatal and never retried.
    pub fn decrypt_document(&self, document_id: &str) -> Result<Vec<u8>> {
        let result = self.decrypt_document_inner(document_id);
        self.audit("document_decrypt", document_id, result.as_ref().err());
        result
    }

    fn decrypt_document_inner(&self, document_id: &str) -> Result<Vec<u8>> {
        let document = {
            let documents = self.documents.read().map_err(|_| Error::StoreUnavailable)?;
            documents.get(document_id).cloned().ok_or(Error::NotFound)?
        };
        let wrapped = {
            let wrapped_keys = self
                .wrapped_keys
                .read()
                .map_err(|_| Error::StoreUnavailable)?;
            wrapped_keys
                .get(document_id)
                .cloned()
                .ok_or(Error::NotFound)?
        };

        let doc_key_bytes = self.master.decrypt(&wrapped)?;
        let doc_key: [u8; DOC_KEY_LEN] =
            doc_key_bytes.try_into().map_err(|_| Error::KeyMismatch)?;

        // The ciphertext names the key it expects; a mismatch with the
        // unwrapped key is an error, not a fallback.
        let expected_id: String = hex::encode(Sha256::digest(doc_key))
            .chars()
            .take(16)
            .collect();
        if document.key_id != expected_id {
            return Err(Error::KeyMismatch);
        }

        super::open(&doc_key, &document.nonce_bytes()?, &document.ciphertext_bytes()?)
    }

    /// Remove a document and its wrapped key together.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the document does not exist.
    pub fn delete_document(&self, document_id: &str) -> Result<()> {
        let result = self.delete_document_inner(document_id);
        self.audit("document_delete", document_id, result.as_ref().err());
        result
    }

    fn delete_document_inner(&self, document_id: &str) -> Result<()> {
        let mut documents = self.documents.write().map_err(|_| Error::StoreUnavailable)?;
        let mut wrapped_keys = self
            .wrapped_keys
            .write()
            .map_err(|_| Error::StoreUnavailable)?;
        let removed_doc = documents.remove(document_id);
        let removed_key = wrapped_keys.remove(document_id);
        if removed_doc.is_none() && removed_key.is_none() {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn audit(&self, action: &str, document_id: &str, err: Option<&Error>) {
        let mut event = AuditEvent::action(
            None,
            action,
            Some(document_id),
            err.is_none(),
            &RequestContext::new(),
        );
        if let Some(err) = err {
            event = event.with_reason(err.reason_code());
        }
        self.sink.record(event);
    }
}
