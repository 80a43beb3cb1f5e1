//! Append-only audit storage.

use chrono::{DateTime, Utc};
use std::sync::RwLock;
use uuid::Uuid;

use super::models::{AuditEvent, AuditQuery, SecurityEvent};
use crate::error::{Error, Result};

/// Backing store for the audit trail. Implementations surface transient
/// failures as [`Error::StoreUnavailable`]; the sink's writer queue retries.
pub trait AuditStore: Send + Sync {
    fn append_event(&self, event: AuditEvent) -> Result<()>;
    fn append_security_event(&self, event: SecurityEvent) -> Result<()>;
    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>>;
    fn security_events(&self) -> Result<Vec<SecurityEvent>>;
    /// Set the resolution fields of a security event. The only permitted
    /// mutation of a stored record.
    fn resolve_security_event(&self, id: Uuid, resolver: &str, at: DateTime<Utc>) -> Result<()>;
    /// Purge routine events before `routine_cutoff`. Resolved security events
    /// use the same cutoff; unresolved ones are retained until the earlier
    /// `security_cutoff`. Returns the number of purged records.
    fn purge(&self, routine_cutoff: DateTime<Utc>, security_cutoff: DateTime<Utc>)
        -> Result<usize>;
}

/// In-process audit store guarded by read-write locks.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    events: RwLock<Vec<AuditEvent>>,
    security: RwLock<Vec<SecurityEvent>>,
}

impl MemoryAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append_event(&self, event: AuditEvent) -> Result<()> {
        let mut events = self.events.write().map_err(|_| Error::StoreUnavailable)?;
        events.push(event);
        Ok(())
    }

    fn append_security_event(&self, event: SecurityEvent) -> Result<()> {
        let mut security = self.security.write().map_err(|_| Error::StoreUnavailable)?;
        security.push(event);
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let events = self.events.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(events
            .iter()
            .filter(|event| query.matches(event))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn security_events(&self) -> Result<Vec<SecurityEvent>> {
        let security = self.security.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(security.clone())
    }

    fn resolve_security_event(&self, id: Uuid, resolver: &str, at: DateTime<Utc>) -> Result<()> {
        let mut security = self.security.write().map_err(|_| Error::StoreUnavailable)?;
        let event = security
            .iter_mut()
            .find(|event| event.id == id)
            .ok_or(Error::NotFound)?;
        event.resolved = true;
        event.resolved_by = Some(resolver.to_string());
        event.resolved_at = Some(at);
        Ok(())
    }

    fn purge(
        &self,
        routine_cutoff: DateTime<Utc>,
        security_cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let mut purged = 0;
        {
            let mut events = self.events.write().map_err(|_| Error::StoreUnavailable)?;
            let before = events.len();
            events.retain(|event| event.timestamp >= routine_cutoff);
            purged += before - events.len();
        }
        {
            let mut security = self.security.write().map_err(|_| Error::StoreUnavailable)?;
            let before = security.len();
            security.retain(|event| {
                if event.resolved {
                    event.timestamp >= routine_cutoff
                } else {
                    event.timestamp >= security_cutoff
                }
            });
            purged += before - security.len();
        }
        Ok(purged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{AuditStore, MemoryAuditStore};
    use crate::audit::models::{AuditEvent, AuditQuery, SecurityEvent};
    use crate::context::RequestContext;
    use chrono::{Duration, Utc};

    #[test]
    fn append_and_query_with_pagination() {
        let store = MemoryAuditStore::new();
        let ctx = RequestContext::new();
        for i in 0..5 {
            store
                .append_event(AuditEvent::action(
                    Some("actor"),
                    &format!("action_{i}"),
                    None,
                    true,
                    &ctx,
                ))
                .unwrap();
        }

        let mut query = AuditQuery::new();
        query.limit = 2;
        query.offset = 1;
        let page = store.query(&query).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].action, "action_1");
        assert_eq!(page[1].action, "action_2");
    }

    #[test]
    fn resolve_sets_only_resolution_fields() {
        let store = MemoryAuditStore::new();
        let ctx = RequestContext::new();
        let event = SecurityEvent::new(Some("acct"), "multiple_locations", 60, &ctx);
        let id = event.id;
        store.append_security_event(event).unwrap();

        let now = Utc::now();
        store.resolve_security_event(id, "ops", now).unwrap();

        let events = store.security_events().unwrap();
        let resolved = events.iter().find(|e| e.id == id).unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("ops"));
        assert_eq!(resolved.kind, "multiple_locations");
        assert_eq!(resolved.risk_score, 60);
    }

    #[test]
    fn purge_keeps_unresolved_security_events_longer() {
        let store = MemoryAuditStore::new();
        let ctx = RequestContext::new();
        let old = Utc::now() - Duration::days(100);

        let mut routine = AuditEvent::action(None, "old_action", None, true, &ctx);
        routine.timestamp = old;
        store.append_event(routine).unwrap();

        let mut unresolved = SecurityEvent::new(None, "unusual_hours", 20, &ctx);
        unresolved.timestamp = old;
        store.append_security_event(unresolved).unwrap();

        let mut resolved = SecurityEvent::new(None, "unusual_hours", 20, &ctx);
        resolved.timestamp = old;
        resolved.resolved = true;
        store.append_security_event(resolved).unwrap();

        // Routine cutoff at 90 days, unresolved security events at 180.
        let purged = store
            .purge(Utc::now() - Duration::days(90), Utc::now() - Duration::days(180))
            .unwrap();
        assert_eq!(purged, 2);

        let remaining = store.security_events().unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].resolved);
    }
}
