//! MFA enrollment storage seam.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::backup::BackupCode;
use crate::error::{Error, Result};

/// One account's TOTP enrollment. The shared secret is held only in its
/// vault-protected form; the raw secret never touches the store.
#[derive(Debug, Clone)]
pub struct MfaEnrollment {
    pub account_id: String,
    /// Vault-encoded TOTP secret (base32 form, sealed).
    pub secret_protected: String,
    pub label: Option<String>,
    /// Set on the first successful code verification.
    pub enabled: bool,
    pub enrolled_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub backup_codes: Vec<BackupCode>,
}

pub trait MfaStore: Send + Sync {
    /// Insert or replace an account's enrollment.
    fn put(&self, enrollment: MfaEnrollment) -> Result<()>;
    fn get(&self, account_id: &str) -> Result<Option<MfaEnrollment>>;
    /// Flip the enabled flag after the first successful verification.
    fn enable(&self, account_id: &str, at: DateTime<Utc>) -> Result<()>;
    fn record_use(&self, account_id: &str, at: DateTime<Utc>) -> Result<()>;
    /// Mark the code carrying this hash used. Fails with
    /// [`Error::BackupCodeAlreadyUsed`] if it already was, and with
    /// [`Error::CodeInvalid`] if no outstanding code carries the hash, so a
    /// batch replaced since the match cannot lose a fresh code.
    fn consume_backup_code(&self, account_id: &str, hash: &str, at: DateTime<Utc>) -> Result<()>;
    /// Replace the whole batch, invalidating every outstanding code.
    fn replace_backup_codes(&self, account_id: &str, codes: Vec<BackupCode>) -> Result<()>;
    fn delete(&self, account_id: &str) -> Result<()>;
}

/// In-process enrollment store.
#[derive(Default)]
pub struct MemoryMfaStore {
    enrollments: RwLock<HashMap<String, MfaEnrollment>>,
}

impl MemoryMfaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MfaStore for MemoryMfaStore {
    fn put(&self, enrollment: MfaEnrollment) -> Result<()> {
        let mut map = self
            .enrollments
            .write()
            .map_err(|_| Error::StoreUnavailable)?;
        map.insert(enrollment.account_id.clone(), enrollment);
        Ok(())
    }

    fn get(&self, account_id: &str) -> Result<Option<MfaEnrollment>> {
        let map = self
            .enrollments
            .read()
            .map_err(|_| Error::StoreUnavailable)?;
        Ok(map.get(account_id).cloned())
    }

    fn enable(&self, account_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut map = self
            .enrollments
            .write()
            .map_err(|_| Error::StoreUnavailable)?;
        let enrollment = map.get_mut(account_id).ok_or(Error::NotFound)?;
        enrollment.enabled = true;
        enrollment.confirmed_at.get_or_insert(at);
        Ok(())
    }

    fn record_use(&self, account_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut map = self
            .enrollments
            .write()
            .map_err(|_| Error::StoreUnavailable)?;
        let enrollment = map.get_mut(account_id).ok_or(Error::NotFound)?;
        enrollment.last_used_at = Some(at);
        Ok(())
    }

    fn consume_backup_code(&self, account_id: &str, hash: &str, at: DateTime<Utc>) -> Result<()> {
        let mut map = self
            .enrollments
            .write()
            .map_err(|_| Error::StoreUnavailable)?;
        let enrollment = map.get_mut(account_id).ok_or(Error::NotFound)?;
        let code = enrollment
            .backup_codes
            .iter_mut()
            .find(|code| code.hash == hash)
            .ok_or(Error::CodeInvalid)?;
        if code.used {
            return Err(Error::BackupCodeAlreadyUsed);
        }
        code.used = true;
        code.used_at = Some(at);
        enrollment.last_used_at = Some(at);
        Ok(())
    }

    fn replace_backup_codes(&self, account_id: &str, codes: Vec<BackupCode>) -> Result<()> {
        let mut map = self
            .enrollments
            .write()
            .map_err(|_| Error::StoreUnavailable)?;
        let enrollment = map.get_mut(account_id).ok_or(Error::NotFound)?;
        enrollment.backup_codes = codes;
        Ok(())
    }

    fn delete(&self, account_id: &str) -> Result<()> {
        let mut map = self
            .enrollments
            .write()
            .map_err(|_| Error::StoreUnavailable)?;
        map.remove(account_id).ok_or(Error::NotFound)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{MemoryMfaStore, MfaEnrollment, MfaStore};
    use crate::error::Error;
    use crate::mfa::backup::BackupCode;
    use chrono::Utc;

    fn enrollment(account: &str) -> MfaEnrollment {
        MfaEnrollment {
            account_id: account.to_string(),
            secret_protected: "sealed".to_string(),
            label: None,
            enabled: false,
            enrolled_at: Utc::now(),
            confirmed_at: None,
            last_used_at: None,
            backup_codes: vec![BackupCode::new("hash-a".to_string())],
        }
    }

    #[test]
    fn enable_sets_confirmation_once() {
        let store = MemoryMfaStore::new();
        store.put(enrollment("acct-1")).unwrap();

        let first = Utc::now();
        store.enable("acct-1", first).unwrap();
        store.enable("acct-1", first + chrono::Duration::hours(1)).unwrap();

        let stored = store.get("acct-1").unwrap().unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.confirmed_at, Some(first));
    }

    #[test]
    fn backup_code_consumed_exactly_once() {
        let store = MemoryMfaStore::new();
        store.put(enrollment("acct-1")).unwrap();
        let now = Utc::now();

        store.consume_backup_code("acct-1", "hash-a", now).unwrap();
        assert_eq!(
            store.consume_backup_code("acct-1", "hash-a", now).unwrap_err(),
            Error::BackupCodeAlreadyUsed
        );
    }

    #[test]
    fn stale_hash_cannot_consume_a_replaced_batch() {
        let store = MemoryMfaStore::new();
        store.put(enrollment("acct-1")).unwrap();
        store
            .replace_backup_codes("acct-1", vec![BackupCode::new("hash-b".to_string())])
            .unwrap();

        // The matched code is gone; nothing in the fresh batch is spent.
        assert_eq!(
            store
                .consume_backup_code("acct-1", "hash-a", Utc::now())
                .unwrap_err(),
            Error::CodeInvalid
        );
        assert!(!store.get("acct-1").unwrap().unwrap().backup_codes[0].used);
    }

    #[test]
    fn replace_codes_clears_usage() {
        let store = MemoryMfaStore::new();
        store.put(enrollment("acct-1")).unwrap();
        store
            .consume_backup_code("acct-1", "hash-a", Utc::now())
            .unwrap();

        store
            .replace_backup_codes("acct-1", vec![BackupCode::new("hash-b".to_string())])
            .unwrap();
        let stored = store.get("acct-1").unwrap().unwrap();
        assert!(!stored.backup_codes[0].used);
        assert_eq!(stored.backup_codes[0].hash, "hash-b");
    }

    #[test]
    fn delete_removes_enrollment() {
        let store = MemoryMfaStore::new();
        store.put(enrollment("acct-1")).unwrap();
        store.delete("acct-1").unwrap();
        assert!(store.get("acct-1").unwrap().is_none());
        assert_eq!(store.delete("acct-1").unwrap_err(), Error::NotFound);
    }
}
