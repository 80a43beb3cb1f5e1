//! Session and device records.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

/// Recent validation observations kept per session.
const ACTIVITY_LOG_CAP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Issued, not yet presented back.
    Created,
    Active,
    Expired,
    Invalidated,
}

impl SessionState {
    /// Whether the session can still be validated.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Created | Self::Active)
    }
}

/// One validation observation.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub risk_score: u8,
}

/// A server-side session. The opaque token is never stored; `token_hash` is
/// its SHA-256, used for lookups when the token is presented.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub account_id: String,
    pub token_hash: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub fingerprint: String,
    pub device_id: Uuid,
    /// The presenting device had been seen for this account before.
    pub trusted_device: bool,
    pub risk_score: u8,
    /// The account has confirmed MFA; the caller must run step-up before
    /// treating the session as fully authenticated.
    pub requires_mfa: bool,
    /// Step-up completed for this session.
    pub mfa_verified: bool,
    pub login_method: String,
    pub activity: VecDeque<ActivityEntry>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now - self.last_activity_at >= idle_timeout
    }

    /// Append an observation, dropping the oldest past the cap.
    pub fn push_activity(&mut self, entry: ActivityEntry) {
        if self.activity.len() == ACTIVITY_LOG_CAP {
            self.activity.pop_front();
        }
        self.activity.push_back(entry);
    }
}

/// A device seen for an account, identified by fingerprint. A device is
/// untrusted on first sight and trusted from its second session on.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: Uuid,
    pub account_id: String,
    pub fingerprint: String,
    /// Raw user-agent string seen at first sighting, for display.
    pub user_agent: Option<String>,
    pub trusted: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub session_count: u32,
}

/// A freshly created session. `token` is handed to the caller exactly once.
pub struct NewSession {
    pub token: String,
    pub session: Session,
}

#[cfg(test)]
mod tests {
    use super::{ActivityEntry, Session, SessionState, ACTIVITY_LOG_CAP};
    use chrono::{Duration, Utc};
    use std::collections::VecDeque;
    use uuid::Uuid;

    fn session() -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            account_id: "acct-1".to_string(),
            token_hash: "hash".to_string(),
            state: SessionState::Created,
            created_at: now,
            expires_at: now + Duration::hours(24),
            last_activity_at: now,
            ip_address: None,
            country: None,
            fingerprint: "fp".to_string(),
            device_id: Uuid::new_v4(),
            trusted_device: false,
            risk_score: 0,
            requires_mfa: false,
            mfa_verified: false,
            login_method: "password".to_string(),
            activity: VecDeque::new(),
        }
    }

    #[test]
    fn live_states() {
        assert!(SessionState::Created.is_live());
        assert!(SessionState::Active.is_live());
        assert!(!SessionState::Expired.is_live());
        assert!(!SessionState::Invalidated.is_live());
    }

    #[test]
    fn expiry_and_idle_boundaries() {
        let session = session();
        assert!(!session.is_expired(session.created_at));
        assert!(session.is_expired(session.expires_at));
        assert!(session.is_idle(session.last_activity_at + Duration::hours(72), Duration::hours(72)));
        assert!(!session.is_idle(session.last_activity_at + Duration::hours(1), Duration::hours(72)));
    }

    #[test]
    fn activity_log_is_bounded() {
        let mut session = session();
        for i in 0..ACTIVITY_LOG_CAP + 5 {
            session.push_activity(ActivityEntry {
                at: Utc::now(),
                ip_address: None,
                risk_score: u8::try_from(i % 100).unwrap_or(0),
            });
        }
        assert_eq!(session.activity.len(), ACTIVITY_LOG_CAP);
        // Oldest entries were dropped.
        assert_eq!(session.activity.front().map(|e| e.risk_score), Some(5));
    }
}
