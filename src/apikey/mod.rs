//! Machine credential issuance and authentication.
//!
//! Credentials are two-part `id.secret` tokens carried as a bearer value.
//! The caller always receives the generic [`Error::AccessDenied`] on
//! rejection; the precise reason lives only in the audit trail so callers
//! cannot enumerate which check failed.

pub mod models;
pub mod signature;
pub mod storage;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::audit::models::{AuditEvent, SecurityEvent};
use crate::audit::AuditSink;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::rate_limit::SlidingWindowLimiter;
use models::{ApiKey, IssueKeyParams, IssuedKey};
use storage::ApiKeyStore;

const KEY_ID_BYTES: usize = 8;
const SECRET_BYTES: usize = 32;
const WEBHOOK_SECRET_BYTES: usize = 24;

pub struct ApiKeyAuthenticator {
    store: Arc<dyn ApiKeyStore>,
    /// Load-on-miss cache; evicted on revoke.
    cache: RwLock<HashMap<String, ApiKey>>,
    limiter: SlidingWindowLimiter,
    sink: AuditSink,
}

impl ApiKeyAuthenticator {
    #[must_use]
    pub fn new(store: Arc<dyn ApiKeyStore>, sink: AuditSink, config: &EngineConfig) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            limiter: SlidingWindowLimiter::new(config.rate_window()),
            sink,
        }
    }

    /// Issue a new machine credential.
    ///
    /// The returned plaintext secret (and webhook secret, when requested) are
    /// available exactly once; only their hashes, respectively the guarded
    /// raw webhook secret, are retained.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn issue_key(&self, actor: &str, params: IssueKeyParams) -> Result<IssuedKey> {
        let mut id_bytes = [0u8; KEY_ID_BYTES];
        OsRng.fill_bytes(&mut id_bytes);
        let id = hex::encode(id_bytes);

        let mut secret_bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut secret_bytes);
        let secret = Base64UrlUnpadded::encode_string(&secret_bytes);

        let webhook_secret = params.with_webhook_secret.then(|| {
            let mut bytes = [0u8; WEBHOOK_SECRET_BYTES];
            OsRng.fill_bytes(&mut bytes);
            format!("whsec_{}", Base64UrlUnpadded::encode_string(&bytes))
        });

        let record = ApiKey {
            id: id.clone(),
            secret_hash: hex::encode(Sha256::digest(secret.as_bytes())),
            name: params.name,
            scopes: params.scopes,
            quota_per_hour: params.quota_per_hour,
            ip_allow_list: params.ip_allow_list,
            active: true,
            created_at: Utc::now(),
            expires_at: params.expires_at,
            webhook_secret: webhook_secret.clone().map(Into::into),
            usage_count: 0,
            last_used_at: None,
        };
        self.store.insert(record.clone())?;
        info!(key_id = %id, name = %record.name, "api key issued");
        self.sink.record(
            AuditEvent::admin(actor, "api_key_issue", Some(&id), &RequestContext::new())
                .with_detail(serde_json::json!({
                    "name": record.name,
                    "scopes": record.scopes,
                    "quota_per_hour": record.quota_per_hour,
                })),
        );

        Ok(IssuedKey {
            credential: format!("{id}.{secret}"),
            webhook_secret,
            record,
        })
    }

    /// Authenticate a presented credential against the key records and
    /// policy checks.
    ///
    /// Exactly one audit record is emitted per attempt, carrying the status,
    /// latency and internal reason; policy rejections additionally raise a
    /// security event.
    ///
    /// # Errors
    /// [`Error::AccessDenied`] for every rejection, whatever the cause.
    pub fn authenticate(&self, credential: &str, ctx: &RequestContext) -> Result<ApiKey> {
        let started = Instant::now();
        let result = self.authenticate_inner(credential, ctx);
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(key) => {
                self.sink.record(
                    AuditEvent::action(Some(&key.id), "api_key_auth", None, true, ctx).with_detail(
                        serde_json::json!({ "status": 200, "latency_ms": latency_ms }),
                    ),
                );
                Ok(key)
            }
            Err((key_id, err)) => {
                warn!(reason = err.reason_code(), "api key authentication rejected");
                self.sink.record(
                    AuditEvent::action(key_id.as_deref(), "api_key_auth", None, false, ctx)
                        .with_reason(err.reason_code())
                        .with_detail(
                            serde_json::json!({ "status": 401, "latency_ms": latency_ms }),
                        ),
                );
                if err.is_policy_rejection() {
                    self.sink.record_security(
                        SecurityEvent::new(key_id.as_deref(), "api_key_policy_rejection", 40, ctx)
                            .with_detail(serde_json::json!({ "reason": err.reason_code() })),
                    );
                }
                // Generic rejection: no hint of which check failed.
                Err(Error::AccessDenied)
            }
        }
    }

    /// Inner pipeline returning the precise reason alongside the key id once
    /// one has been established.
    fn authenticate_inner(
        &self,
        credential: &str,
        ctx: &RequestContext,
    ) -> std::result::Result<ApiKey, (Option<String>, Error)> {
        let (id, secret) = parse_credential(credential).map_err(|err| (None, err))?;

        let mut key = self
            .lookup(&id)
            .map_err(|err| (Some(id.clone()), err))?
            .ok_or_else(|| (Some(id.clone()), Error::NotFound))?;

        if !key.active {
            return Err((Some(id), Error::Revoked));
        }
        let now = Utc::now();
        if key.is_expired(now) {
            return Err((Some(id), Error::Expired));
        }

        let presented_hash = Sha256::digest(secret.as_bytes());
        let stored_hash = hex::decode(&key.secret_hash)
            .map_err(|_| (Some(id.clone()), Error::SecretMismatch))?;
        if !bool::from(presented_hash.as_slice().ct_eq(&stored_hash)) {
            return Err((Some(id), Error::SecretMismatch));
        }

        if !key.ip_allowed(ctx.ip_address.as_deref()) {
            return Err((Some(id), Error::IpNotAllowed));
        }

        self.limiter
            .check(&id, key.quota_per_hour)
            .map_err(|err| (Some(id.clone()), err))?;

        if let Some(header) = &ctx.signature {
            let secret_bytes = key
                .webhook_secret_bytes()
                .ok_or_else(|| (Some(id.clone()), Error::SignatureInvalid))?;
            let body = ctx.body.as_deref().unwrap_or_default();
            signature::verify(
                &secret_bytes,
                ctx.signature_timestamp.as_deref(),
                body,
                header,
            )
            .map_err(|err| (Some(id.clone()), err))?;
        }

        // Committed to accept: bump usage on the store and the cached copy.
        self.store
            .record_usage(&id, now)
            .map_err(|err| (Some(id.clone()), err))?;
        key.usage_count += 1;
        key.last_used_at = Some(now);
        if let Ok(mut cache) = self.cache.write() {
            // Refresh only a still-present entry. A revoke between the lookup
            // and this point evicted the id; re-inserting here would resurrect
            // the stale active copy.
            if let Some(entry) = cache.get_mut(&id) {
                *entry = key.clone();
            }
        }
        Ok(key)
    }

    /// Require a scope on an already-authenticated key.
    ///
    /// # Errors
    /// [`Error::AccessDenied`]; the missing scope is recorded internally.
    pub fn require_scope(&self, key: &ApiKey, scope: &str, ctx: &RequestContext) -> Result<()> {
        if key.has_scope(scope) {
            return Ok(());
        }
        self.sink.record(
            AuditEvent::action(Some(&key.id), "api_key_scope_denied", None, false, ctx)
                .with_reason("scope_missing")
                .with_detail(serde_json::json!({ "scope": scope })),
        );
        Err(Error::AccessDenied)
    }

    /// Soft-revoke a key: deactivate, evict from the cache, keep the record.
    ///
    /// # Errors
    /// [`Error::NotFound`] for unknown ids; store failures propagate.
    pub fn revoke_key(&self, actor: &str, id: &str) -> Result<()> {
        self.store.set_active(id, false)?;
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(id);
        }
        self.limiter.reset(id);
        info!(key_id = %id, "api key revoked");
        self.sink.record(AuditEvent::admin(
            actor,
            "api_key_revoke",
            Some(id),
            &RequestContext::new(),
        ));
        Ok(())
    }

    /// Requests left in the key's current window.
    #[must_use]
    pub fn remaining_quota(&self, key: &ApiKey) -> u32 {
        self.limiter.remaining(&key.id, key.quota_per_hour)
    }

    /// Cache-first lookup. On a miss the store is read under the cache write
    /// lock, so a concurrent revoke either lands before the read (we see the
    /// deactivated record) or evicts whatever we insert.
    fn lookup(&self, id: &str) -> Result<Option<ApiKey>> {
        {
            let cache = self.cache.read().map_err(|_| Error::StoreUnavailable)?;
            if let Some(key) = cache.get(id) {
                return Ok(Some(key.clone()));
            }
        }
        let mut cache = self.cache.write().map_err(|_| Error::StoreUnavailable)?;
        if let Some(key) = cache.get(id) {
            return Ok(Some(key.clone()));
        }
        let Some(key) = self.store.get(id)? else {
            return Ok(None);
        };
        cache.insert(id.to_string(), key.clone());
        Ok(Some(key))
    }

    /// Periodic maintenance: drop stale rate-limit tables.
    pub fn cleanup(&self) {
        self.limiter.cleanup();
    }
}

/// Split a bearer credential into its id and secret halves.
fn parse_credential(credential: &str) -> Result<(String, String)> {
    let token = credential
        .trim()
        .strip_prefix("Bearer ")
        .or_else(|| credential.trim().strip_prefix("bearer "))
        .unwrap_or_else(|| credential.trim())
        .trim();
    let (id, secret) = token.split_once('.').ok_or(Error::Malformed)?;
    if id.is_empty() || secret.is_empty() || secret.contains('.') {
        return Err(Error::Malformed);
    }
    Ok((id.to_string(), secret.to_string()))
}
