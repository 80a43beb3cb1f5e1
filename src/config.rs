//! Engine configuration with builder-style overrides.

use chrono::Duration;

const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
const DEFAULT_SESSION_IDLE_HOURS: i64 = 72;
const DEFAULT_RATE_WINDOW_MINUTES: i64 = 60;
const DEFAULT_CONCURRENT_LOOKBACK_MINUTES: i64 = 60;
const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 90;
const DEFAULT_BACKUP_CODE_COUNT: usize = 10;
const DEFAULT_HOME_COUNTRY: &str = "US";

/// Risk-score weights. Additively combined and capped at 100; the additive
/// structure is fixed, the weights are policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct RiskWeights {
    pub untrusted_device: u8,
    pub foreign_location: u8,
    pub off_hours: u8,
    pub concurrent_session: u8,
    pub address_drift: u8,
    pub fingerprint_drift: u8,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            untrusted_device: 20,
            foreign_location: 30,
            off_hours: 10,
            concurrent_session: 15,
            address_drift: 25,
            fingerprint_drift: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    session_ttl: Duration,
    session_idle_timeout: Duration,
    rate_window: Duration,
    concurrent_lookback: Duration,
    audit_retention: Duration,
    backup_code_count: usize,
    /// Off-hours window in local-equivalent UTC hours: `[start, end)`,
    /// wrapping midnight.
    off_hours_start: u32,
    off_hours_end: u32,
    home_country: String,
    risk_weights: RiskWeights,
    /// Transitional: treat unparseable encrypted fields as legacy plaintext.
    /// Switched off once `migrate_legacy_values` has run to completion.
    legacy_plaintext_fallback: bool,
    backup_code_pepper: Vec<u8>,
    totp_issuer: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_ttl: Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            session_idle_timeout: Duration::hours(DEFAULT_SESSION_IDLE_HOURS),
            rate_window: Duration::minutes(DEFAULT_RATE_WINDOW_MINUTES),
            concurrent_lookback: Duration::minutes(DEFAULT_CONCURRENT_LOOKBACK_MINUTES),
            audit_retention: Duration::days(DEFAULT_AUDIT_RETENTION_DAYS),
            backup_code_count: DEFAULT_BACKUP_CODE_COUNT,
            off_hours_start: 22,
            off_hours_end: 6,
            home_country: DEFAULT_HOME_COUNTRY.to_string(),
            risk_weights: RiskWeights::default(),
            legacy_plaintext_fallback: false,
            backup_code_pepper: Vec::new(),
            totp_issuer: "custos".to_string(),
        }
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_rate_window(mut self, window: Duration) -> Self {
        self.rate_window = window;
        self
    }

    #[must_use]
    pub fn with_concurrent_lookback(mut self, lookback: Duration) -> Self {
        self.concurrent_lookback = lookback;
        self
    }

    #[must_use]
    pub fn with_audit_retention(mut self, retention: Duration) -> Self {
        self.audit_retention = retention;
        self
    }

    #[must_use]
    pub fn with_backup_code_count(mut self, count: usize) -> Self {
        self.backup_code_count = count;
        self
    }

    #[must_use]
    pub fn with_off_hours(mut self, start: u32, end: u32) -> Self {
        self.off_hours_start = start % 24;
        self.off_hours_end = end % 24;
        self
    }

    #[must_use]
    pub fn with_home_country(mut self, country: impl Into<String>) -> Self {
        self.home_country = country.into();
        self
    }

    #[must_use]
    pub fn with_risk_weights(mut self, weights: RiskWeights) -> Self {
        self.risk_weights = weights;
        self
    }

    #[must_use]
    pub fn with_legacy_plaintext_fallback(mut self, enabled: bool) -> Self {
        self.legacy_plaintext_fallback = enabled;
        self
    }

    #[must_use]
    pub fn with_backup_code_pepper(mut self, pepper: Vec<u8>) -> Self {
        self.backup_code_pepper = pepper;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.totp_issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn session_idle_timeout(&self) -> Duration {
        self.session_idle_timeout
    }

    #[must_use]
    pub fn rate_window(&self) -> Duration {
        self.rate_window
    }

    #[must_use]
    pub fn concurrent_lookback(&self) -> Duration {
        self.concurrent_lookback
    }

    #[must_use]
    pub fn audit_retention(&self) -> Duration {
        self.audit_retention
    }

    #[must_use]
    pub fn backup_code_count(&self) -> usize {
        self.backup_code_count
    }

    #[must_use]
    pub fn home_country(&self) -> &str {
        &self.home_country
    }

    #[must_use]
    pub fn risk_weights(&self) -> RiskWeights {
        self.risk_weights
    }

    #[must_use]
    pub fn legacy_plaintext_fallback(&self) -> bool {
        self.legacy_plaintext_fallback
    }

    #[must_use]
    pub fn backup_code_pepper(&self) -> &[u8] {
        &self.backup_code_pepper
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    /// Whether an hour-of-day falls inside the off-hours window.
    #[must_use]
    pub fn is_off_hours(&self, hour: u32) -> bool {
        let hour = hour % 24;
        if self.off_hours_start <= self.off_hours_end {
            hour >= self.off_hours_start && hour < self.off_hours_end
        } else {
            hour >= self.off_hours_start || hour < self.off_hours_end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;
    use chrono::Duration;

    #[test]
    fn defaults_and_overrides() {
        let config = EngineConfig::new();
        assert_eq!(config.session_ttl(), Duration::hours(24));
        assert_eq!(config.rate_window(), Duration::minutes(60));
        assert_eq!(config.backup_code_count(), 10);
        assert_eq!(config.home_country(), "US");
        assert!(!config.legacy_plaintext_fallback());

        let config = config
            .with_session_ttl(Duration::hours(1))
            .with_backup_code_count(8)
            .with_home_country("NL")
            .with_legacy_plaintext_fallback(true);
        assert_eq!(config.session_ttl(), Duration::hours(1));
        assert_eq!(config.backup_code_count(), 8);
        assert_eq!(config.home_country(), "NL");
        assert!(config.legacy_plaintext_fallback());
    }

    #[test]
    fn off_hours_window_wraps_midnight() {
        let config = EngineConfig::new().with_off_hours(22, 6);
        assert!(config.is_off_hours(23));
        assert!(config.is_off_hours(2));
        assert!(!config.is_off_hours(12));
        assert!(!config.is_off_hours(6));
    }

    #[test]
    fn off_hours_window_non_wrapping() {
        let config = EngineConfig::new().with_off_hours(1, 5);
        assert!(config.is_off_hours(3));
        assert!(!config.is_off_hours(22));
    }
}
