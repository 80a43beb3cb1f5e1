//! Session and device storage seams.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::models::{Device, Session};
use crate::error::{Error, Result};

pub trait SessionStore: Send + Sync {
    fn insert(&self, session: Session) -> Result<()>;
    fn get(&self, id: Uuid) -> Result<Option<Session>>;
    fn get_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>>;
    /// Replace a stored session wholesale.
    fn update(&self, session: Session) -> Result<()>;
    fn list_for_account(&self, account_id: &str) -> Result<Vec<Session>>;
    fn all(&self) -> Result<Vec<Session>>;
    fn remove(&self, id: Uuid) -> Result<()>;
}

pub trait DeviceStore: Send + Sync {
    fn find(&self, account_id: &str, fingerprint: &str) -> Result<Option<Device>>;
    fn insert(&self, device: Device) -> Result<()>;
    /// Bump last-seen and the session counter.
    fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: Session) -> Result<()> {
        let mut map = self.sessions.write().map_err(|_| Error::StoreUnavailable)?;
        map.insert(session.id, session);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<Session>> {
        let map = self.sessions.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(map.get(&id).cloned())
    }

    fn get_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let map = self.sessions.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(map
            .values()
            .find(|session| session.token_hash == token_hash)
            .cloned())
    }

    fn update(&self, session: Session) -> Result<()> {
        let mut map = self.sessions.write().map_err(|_| Error::StoreUnavailable)?;
        if !map.contains_key(&session.id) {
            return Err(Error::NotFound);
        }
        map.insert(session.id, session);
        Ok(())
    }

    fn list_for_account(&self, account_id: &str) -> Result<Vec<Session>> {
        let map = self.sessions.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(map
            .values()
            .filter(|session| session.account_id == account_id)
            .cloned()
            .collect())
    }

    fn all(&self) -> Result<Vec<Session>> {
        let map = self.sessions.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(map.values().cloned().collect())
    }

    fn remove(&self, id: Uuid) -> Result<()> {
        let mut map = self.sessions.write().map_err(|_| Error::StoreUnavailable)?;
        map.remove(&id).ok_or(Error::NotFound)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDeviceStore {
    devices: RwLock<HashMap<Uuid, Device>>,
}

impl MemoryDeviceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn find(&self, account_id: &str, fingerprint: &str) -> Result<Option<Device>> {
        let map = self.devices.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(map
            .values()
            .find(|device| device.account_id == account_id && device.fingerprint == fingerprint)
            .cloned())
    }

    fn insert(&self, device: Device) -> Result<()> {
        let mut map = self.devices.write().map_err(|_| Error::StoreUnavailable)?;
        map.insert(device.id, device);
        Ok(())
    }

    fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut map = self.devices.write().map_err(|_| Error::StoreUnavailable)?;
        let device = map.get_mut(&id).ok_or(Error::NotFound)?;
        device.last_seen_at = at;
        device.session_count += 1;
        device.trusted = true;
        Ok(())
    }
}
