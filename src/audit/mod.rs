//! Append-only audit sink.
//!
//! Components commit to their accept/reject decision before the audit record
//! is durably written: [`AuditSink::record`] enqueues onto an unbounded
//! channel and a background writer persists the record, retrying with backoff
//! when the store is temporarily unavailable. Losses are never silent; a
//! record that exhausts its retries is logged at error level.

pub mod classifier;
pub mod models;
pub mod storage;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use classifier::{Classifier, KeywordClassifier};
use models::{AuditEvent, AuditQuery, SecurityEvent};
use storage::AuditStore;

const WRITE_ATTEMPTS: u32 = 5;
const RETRY_BASE_MS: u64 = 50;

enum Record {
    Event(AuditEvent),
    Security(SecurityEvent),
}

struct Inner {
    tx: UnboundedSender<Record>,
    store: Arc<dyn AuditStore>,
    classifier: Arc<dyn Classifier>,
    retention: chrono::Duration,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

/// Handle to the audit trail. Cheap to clone; all clones share one writer.
#[derive(Clone)]
pub struct AuditSink {
    inner: Arc<Inner>,
}

impl AuditSink {
    /// Spawn the writer task and return the sink. Must be called from within
    /// a tokio runtime.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>, config: &EngineConfig) -> Self {
        Self::with_classifier(store, Arc::new(KeywordClassifier::new()), config)
    }

    #[must_use]
    pub fn with_classifier(
        store: Arc<dyn AuditStore>,
        classifier: Arc<dyn Classifier>,
        config: &EngineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());
        tokio::spawn(writer_loop(
            rx,
            Arc::clone(&store),
            Arc::clone(&pending),
            Arc::clone(&drained),
        ));
        Self {
            inner: Arc::new(Inner {
                tx,
                store,
                classifier,
                retention: config.audit_retention(),
                pending,
                drained,
            }),
        }
    }

    /// Record an audit event. Never blocks and never fails the caller's
    /// request path.
    pub fn record(&self, mut event: AuditEvent) {
        // Constructors that already committed to a category (admin actions)
        // keep it; only the default gets inferred.
        if event.category == models::Category::System {
            event.category = self.inner.classifier.categorize(&event);
        }
        let inferred = self.inner.classifier.severity(&event);
        event.severity = event.severity.max(inferred);
        self.enqueue(Record::Event(event));
    }

    /// Record a security event for downstream policy to act on.
    pub fn record_security(&self, event: SecurityEvent) {
        self.enqueue(Record::Security(event));
    }

    fn enqueue(&self, record: Record) {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        if self.inner.tx.send(record).is_err() {
            // Writer task is gone; only reachable during shutdown.
            self.inner.pending.fetch_sub(1, Ordering::AcqRel);
            error!("audit writer unavailable, record lost");
        }
    }

    /// Wait until every enqueued record has been handed to the store.
    pub async fn flush(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Query the audit trail. The action-substring filter is restricted to a
    /// safe character set before it touches the store.
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        if let Some(fragment) = &query.action_contains {
            if !is_safe_filter(fragment) {
                return Err(Error::InvalidFilter(fragment.clone()));
            }
        }
        self.inner.store.query(query)
    }

    pub fn security_events(&self) -> Result<Vec<SecurityEvent>> {
        self.inner.store.security_events()
    }

    /// Mark a security event handled. The only mutation the trail permits.
    pub fn resolve_security_event(&self, id: Uuid, resolver: &str) -> Result<()> {
        self.inner
            .store
            .resolve_security_event(id, resolver, Utc::now())
    }

    /// Purge events past retention. Unresolved security events are kept for
    /// twice the routine window.
    pub fn purge_expired(&self) -> Result<usize> {
        self.purge_expired_at(Utc::now())
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let routine_cutoff = now - self.inner.retention;
        let security_cutoff = now - (self.inner.retention * 2);
        self.inner.store.purge(routine_cutoff, security_cutoff)
    }
}

fn is_safe_filter(fragment: &str) -> bool {
    !fragment.is_empty()
        && fragment
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '_' | '.' | ':' | '/' | '-'))
}

async fn writer_loop(
    mut rx: UnboundedReceiver<Record>,
    store: Arc<dyn AuditStore>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
) {
    while let Some(record) = rx.recv().await {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match &record {
                Record::Event(event) => store.append_event(event.clone()),
                Record::Security(event) => store.append_security_event(event.clone()),
            };
            match outcome {
                Ok(()) => break,
                Err(err) if attempt < WRITE_ATTEMPTS => {
                    warn!(attempt, %err, "audit write failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(
                        RETRY_BASE_MS * u64::from(attempt),
                    ))
                    .await;
                }
                Err(err) => {
                    error!(%err, "audit write failed after {WRITE_ATTEMPTS} attempts, record lost");
                    break;
                }
            }
        }
        pending.fetch_sub(1, Ordering::AcqRel);
        drained.notify_waiters();
    }
}
