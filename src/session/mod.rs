//! Session lifecycle, device tracking, and login risk.
//!
//! Sessions are opaque 256-bit bearer tokens; the store only ever sees the
//! token's SHA-256. Every creation is risk-scored and anomalies raise
//! security events for downstream review.

pub mod fingerprint;
pub mod geo;
pub mod models;
pub mod risk;
pub mod storage;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Timelike, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::audit::models::{AuditEvent, SecurityEvent};
use crate::audit::AuditSink;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::mfa::MfaProvider;
use geo::GeoResolver;
use models::{ActivityEntry, Device, NewSession, Session, SessionState};
use risk::{RiskInputs, RiskSignal};
use storage::{DeviceStore, SessionStore};

const TOKEN_BYTES: usize = 32;
const MULTIPLE_LOCATIONS_RISK: u8 = 60;
const UNUSUAL_HOURS_RISK: u8 = 20;

pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    devices: Arc<dyn DeviceStore>,
    geo: Arc<dyn GeoResolver>,
    mfa: Arc<MfaProvider>,
    sink: AuditSink,
    config: EngineConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        devices: Arc<dyn DeviceStore>,
        geo: Arc<dyn GeoResolver>,
        mfa: Arc<MfaProvider>,
        sink: AuditSink,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions,
            devices,
            geo,
            mfa,
            sink,
            config,
        }
    }

    /// Create a session after a successful primary authentication.
    ///
    /// # Errors
    /// Store failures propagate; the session is not created on any error.
    pub fn create_session(
        &self,
        account_id: &str,
        ctx: &RequestContext,
        login_method: &str,
    ) -> Result<NewSession> {
        self.create_session_at(account_id, ctx, login_method, Utc::now())
    }

    /// Clock-injected variant of [`Self::create_session`].
    pub fn create_session_at(
        &self,
        account_id: &str,
        ctx: &RequestContext,
        login_method: &str,
        now: DateTime<Utc>,
    ) -> Result<NewSession> {
        let print = fingerprint::fingerprint(ctx);
        let (device_id, trusted_device) = self.resolve_device(account_id, &print, ctx, now)?;
        let country = ctx
            .ip_address
            .as_deref()
            .and_then(|ip| self.geo.resolve(ip))
            .map(|location| location.country);

        let sibling_addresses = self.concurrent_other_addresses(account_id, ctx, now)?;
        let assessment = risk::assess(
            &RiskInputs {
                trusted_device,
                country: country.as_deref(),
                hour_of_day: now.hour(),
                concurrent_other_address: sibling_addresses.len(),
            },
            &self.config,
        );
        let requires_mfa = self.mfa.is_enabled(account_id)?;

        let token = generate_token();
        let session = Session {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            token_hash: hash_token(&token),
            state: SessionState::Created,
            created_at: now,
            expires_at: now + self.config.session_ttl(),
            last_activity_at: now,
            ip_address: ctx.ip_address.clone(),
            country,
            fingerprint: print,
            device_id,
            trusted_device,
            risk_score: assessment.score,
            requires_mfa,
            mfa_verified: false,
            login_method: login_method.to_string(),
            activity: VecDeque::new(),
        };
        self.sessions.insert(session.clone())?;

        info!(
            account = %account_id,
            session = %session.id,
            risk = assessment.score,
            "session created"
        );
        self.sink.record(
            AuditEvent::action(
                Some(account_id),
                "session_create",
                Some(&session.id.to_string()),
                true,
                ctx,
            )
            .with_detail(serde_json::json!({
                "login_method": login_method,
                "risk_score": assessment.score,
                "signals": assessment
                    .signals
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>(),
                "requires_mfa": requires_mfa,
            })),
        );

        if assessment.has(RiskSignal::ConcurrentSessions) {
            self.sink.record_security(
                SecurityEvent::new(
                    Some(account_id),
                    "multiple_locations",
                    MULTIPLE_LOCATIONS_RISK,
                    ctx,
                )
                .with_detail(serde_json::json!({
                    "current_address": ctx.ip_or_unknown(),
                    "sibling_addresses": sibling_addresses,
                })),
            );
        }
        if assessment.has(RiskSignal::OffHours) {
            self.sink.record_security(SecurityEvent::new(
                Some(account_id),
                "unusual_hours",
                UNUSUAL_HOURS_RISK,
                ctx,
            ));
        }

        Ok(NewSession { token, session })
    }

    /// Validate a presented token and record the observation.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown or invalidated token,
    /// [`Error::Expired`] past expiry or the idle timeout.
    pub fn validate_session(&self, token: &str, ctx: &RequestContext) -> Result<Session> {
        self.validate_session_at(token, ctx, Utc::now())
    }

    /// Clock-injected variant of [`Self::validate_session`].
    pub fn validate_session_at(
        &self,
        token: &str,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut session = self
            .sessions
            .get_by_token_hash(&hash_token(token))?
            .ok_or(Error::NotFound)?;
        if !session.state.is_live() {
            return Err(Error::NotFound);
        }
        if session.is_expired(now) || session.is_idle(now, self.config.session_idle_timeout()) {
            session.state = SessionState::Expired;
            self.sessions.update(session)?;
            return Err(Error::Expired);
        }

        let weights = self.config.risk_weights();
        let previous_address = session.ip_address.clone();
        let observed_print = fingerprint::fingerprint(ctx);

        let mut drift = 0u32;
        let address_drift = match (&previous_address, &ctx.ip_address) {
            (Some(previous), Some(observed)) => previous != observed,
            _ => false,
        };
        if address_drift {
            drift += u32::from(weights.address_drift);
        }
        let fingerprint_drift = observed_print != session.fingerprint;
        if fingerprint_drift {
            drift += u32::from(weights.fingerprint_drift);
        }
        let score = (u32::from(session.risk_score) + drift).min(100);
        let score = u8::try_from(score).unwrap_or(100);

        session.state = SessionState::Active;
        session.last_activity_at = now;
        if ctx.ip_address.is_some() {
            session.ip_address = ctx.ip_address.clone();
        }
        session.fingerprint = observed_print;
        session.risk_score = score;
        session.push_activity(ActivityEntry {
            at: now,
            ip_address: ctx.ip_address.clone(),
            risk_score: score,
        });
        self.sessions.update(session.clone())?;

        self.sink.record(
            AuditEvent::action(
                Some(&session.account_id),
                "session_activity",
                Some(&session.id.to_string()),
                true,
                ctx,
            )
            .with_detail(serde_json::json!({
                "previous_address": previous_address,
                "observed_address": ctx.ip_address,
                "address_drift": address_drift,
                "fingerprint_drift": fingerprint_drift,
                "risk_score": score,
            })),
        );
        Ok(session)
    }

    /// Mark a session's MFA step-up complete. Called after the account passed
    /// a TOTP or backup-code check while holding this session.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown or already-ended session.
    pub fn record_mfa_verified(&self, id: Uuid, ctx: &RequestContext) -> Result<()> {
        let mut session = self.sessions.get(id)?.ok_or(Error::NotFound)?;
        if !session.state.is_live() {
            return Err(Error::NotFound);
        }
        session.mfa_verified = true;
        self.sessions.update(session.clone())?;
        self.sink.record(AuditEvent::action(
            Some(&session.account_id),
            "session_mfa_verified",
            Some(&id.to_string()),
            true,
            ctx,
        ));
        Ok(())
    }

    /// End one session.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown id.
    pub fn invalidate_session(&self, actor: &str, id: Uuid, ctx: &RequestContext) -> Result<()> {
        let mut session = self.sessions.get(id)?.ok_or(Error::NotFound)?;
        session.state = SessionState::Invalidated;
        self.sessions.update(session)?;
        self.sink.record(AuditEvent::action(
            Some(actor),
            "session_invalidate",
            Some(&id.to_string()),
            true,
            ctx,
        ));
        Ok(())
    }

    /// End every live session for an account (compromise response).
    ///
    /// # Errors
    /// Store failures propagate; already-ended sessions are skipped.
    pub fn invalidate_all_for_account(
        &self,
        actor: &str,
        account_id: &str,
        ctx: &RequestContext,
    ) -> Result<usize> {
        let mut ended = 0usize;
        for mut session in self.sessions.list_for_account(account_id)? {
            if session.state.is_live() {
                session.state = SessionState::Invalidated;
                self.sessions.update(session)?;
                ended += 1;
            }
        }
        info!(account = %account_id, ended, "all sessions invalidated");
        self.sink.record(
            AuditEvent::admin(actor, "session_invalidate_all", Some(account_id), ctx)
                .with_detail(serde_json::json!({ "ended": ended })),
        );
        Ok(ended)
    }

    /// Drop sessions that are expired, long idle, or already ended.
    ///
    /// # Errors
    /// Store failures propagate.
    pub fn cleanup(&self) -> Result<usize> {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let idle_timeout = self.config.session_idle_timeout();
        let mut removed = 0usize;
        for session in self.sessions.all()? {
            if !session.state.is_live()
                || session.is_expired(now)
                || session.is_idle(now, idle_timeout)
            {
                self.sessions.remove(session.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Live sessions for an account, for display and review.
    ///
    /// # Errors
    /// Store failures propagate.
    pub fn active_sessions(&self, account_id: &str) -> Result<Vec<Session>> {
        let now = Utc::now();
        Ok(self
            .sessions
            .list_for_account(account_id)?
            .into_iter()
            .filter(|session| session.state.is_live() && !session.is_expired(now))
            .collect())
    }

    fn resolve_device(
        &self,
        account_id: &str,
        print: &str,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, bool)> {
        if let Some(device) = self.devices.find(account_id, print)? {
            self.devices.touch(device.id, now)?;
            return Ok((device.id, true));
        }
        let device = Device {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            fingerprint: print.to_string(),
            user_agent: ctx.user_agent.clone(),
            trusted: false,
            first_seen_at: now,
            last_seen_at: now,
            session_count: 1,
        };
        let id = device.id;
        self.devices.insert(device)?;
        Ok((id, false))
    }

    /// Addresses of live sibling sessions active inside the lookback window
    /// from a different address than the current request.
    fn concurrent_other_addresses(
        &self,
        account_id: &str,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let lookback = self.config.concurrent_lookback();
        Ok(self
            .sessions
            .list_for_account(account_id)?
            .into_iter()
            .filter(|session| {
                session.state.is_live()
                    && !session.is_expired(now)
                    && now - session.last_activity_at < lookback
            })
            .filter_map(|session| session.ip_address)
            .filter(|address| Some(address.as_str()) != ctx.ip_address.as_deref())
            .collect())
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
