//! Credential storage seam.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::models::ApiKey;
use crate::error::{Error, Result};

/// Backing store for issued keys. Implementations surface transient failures
/// as [`Error::StoreUnavailable`]; the authenticator fails closed on them.
pub trait ApiKeyStore: Send + Sync {
    fn insert(&self, key: ApiKey) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<ApiKey>>;
    /// Soft-revoke: the record is kept for audit continuity.
    fn set_active(&self, id: &str, active: bool) -> Result<()>;
    fn record_usage(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    fn list(&self) -> Result<Vec<ApiKey>>;
}

/// In-process key store.
#[derive(Default)]
pub struct MemoryApiKeyStore {
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl MemoryApiKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApiKeyStore for MemoryApiKeyStore {
    fn insert(&self, key: ApiKey) -> Result<()> {
        let mut keys = self.keys.write().map_err(|_| Error::StoreUnavailable)?;
        keys.insert(key.id.clone(), key);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ApiKey>> {
        let keys = self.keys.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(keys.get(id).cloned())
    }

    fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let mut keys = self.keys.write().map_err(|_| Error::StoreUnavailable)?;
        let key = keys.get_mut(id).ok_or(Error::NotFound)?;
        key.active = active;
        Ok(())
    }

    fn record_usage(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut keys = self.keys.write().map_err(|_| Error::StoreUnavailable)?;
        let key = keys.get_mut(id).ok_or(Error::NotFound)?;
        key.usage_count += 1;
        key.last_used_at = Some(at);
        Ok(())
    }

    fn list(&self) -> Result<Vec<ApiKey>> {
        let keys = self.keys.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(keys.values().cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{ApiKeyStore, MemoryApiKeyStore};
    use crate::apikey::models::ApiKey;
    use crate::error::Error;
    use chrono::Utc;

    fn key(id: &str) -> ApiKey {
        ApiKey {
            id: id.to_string(),
            secret_hash: "hash".to_string(),
            name: "test".to_string(),
            scopes: Vec::new(),
            quota_per_hour: 10,
            ip_allow_list: Vec::new(),
            active: true,
            created_at: Utc::now(),
            expires_at: None,
            webhook_secret: None,
            usage_count: 0,
            last_used_at: None,
        }
    }

    #[test]
    fn revoke_keeps_the_record() {
        let store = MemoryApiKeyStore::new();
        store.insert(key("k1")).unwrap();
        store.set_active("k1", false).unwrap();

        let stored = store.get("k1").unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn usage_counters_accumulate() {
        let store = MemoryApiKeyStore::new();
        store.insert(key("k1")).unwrap();
        let now = Utc::now();
        store.record_usage("k1", now).unwrap();
        store.record_usage("k1", now).unwrap();

        let stored = store.get("k1").unwrap().unwrap();
        assert_eq!(stored.usage_count, 2);
        assert_eq!(stored.last_used_at, Some(now));
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = MemoryApiKeyStore::new();
        assert!(store.get("nope").unwrap().is_none());
        assert_eq!(store.set_active("nope", false), Err(Error::NotFound));
    }
}
