//! Login risk scoring.
//!
//! Pure and deterministic: signals are detected from the inputs, weighted
//! additively per the configured [`RiskWeights`], and the total is capped at
//! 100. Detection triggers are fixed; the weights are policy knobs.

use crate::config::EngineConfig;

/// Observations about a login attempt, assembled by the session manager.
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs<'a> {
    /// The presenting device has been seen for this account before.
    pub trusted_device: bool,
    /// Resolved country, when geolocation succeeded.
    pub country: Option<&'a str>,
    /// UTC hour of the attempt.
    pub hour_of_day: u32,
    /// Live sibling sessions from a different address inside the lookback.
    pub concurrent_other_address: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskSignal {
    UntrustedDevice,
    ForeignLocation,
    OffHours,
    ConcurrentSessions,
}

impl RiskSignal {
    /// Stable kind string recorded in audit detail and security events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UntrustedDevice => "untrusted_device",
            Self::ForeignLocation => "foreign_location",
            Self::OffHours => "unusual_hours",
            Self::ConcurrentSessions => "multiple_locations",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: u8,
    pub signals: Vec<RiskSignal>,
}

impl RiskAssessment {
    #[must_use]
    pub fn has(&self, signal: RiskSignal) -> bool {
        self.signals.contains(&signal)
    }
}

/// Score a login attempt.
#[must_use]
pub fn assess(inputs: &RiskInputs<'_>, config: &EngineConfig) -> RiskAssessment {
    let weights = config.risk_weights();
    let mut score = 0u32;
    let mut signals = Vec::new();

    if !inputs.trusted_device {
        score += u32::from(weights.untrusted_device);
        signals.push(RiskSignal::UntrustedDevice);
    }
    if inputs
        .country
        .is_some_and(|country| country != config.home_country())
    {
        score += u32::from(weights.foreign_location);
        signals.push(RiskSignal::ForeignLocation);
    }
    if config.is_off_hours(inputs.hour_of_day) {
        score += u32::from(weights.off_hours);
        signals.push(RiskSignal::OffHours);
    }
    if inputs.concurrent_other_address > 0 {
        score += u32::from(weights.concurrent_session)
            * u32::try_from(inputs.concurrent_other_address).unwrap_or(u32::MAX);
        signals.push(RiskSignal::ConcurrentSessions);
    }

    RiskAssessment {
        score: u8::try_from(score.min(100)).unwrap_or(100),
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::{assess, RiskInputs, RiskSignal};
    use crate::config::EngineConfig;

    fn quiet_inputs() -> RiskInputs<'static> {
        RiskInputs {
            trusted_device: true,
            country: Some("US"),
            hour_of_day: 14,
            concurrent_other_address: 0,
        }
    }

    #[test]
    fn clean_login_scores_zero() {
        let assessment = assess(&quiet_inputs(), &EngineConfig::new());
        assert_eq!(assessment.score, 0);
        assert!(assessment.signals.is_empty());
    }

    #[test]
    fn each_signal_adds_its_weight() {
        let config = EngineConfig::new();

        let mut inputs = quiet_inputs();
        inputs.trusted_device = false;
        assert_eq!(assess(&inputs, &config).score, 20);

        let mut inputs = quiet_inputs();
        inputs.country = Some("NL");
        assert_eq!(assess(&inputs, &config).score, 30);

        let mut inputs = quiet_inputs();
        inputs.hour_of_day = 23;
        assert_eq!(assess(&inputs, &config).score, 10);

        let mut inputs = quiet_inputs();
        inputs.concurrent_other_address = 2;
        let assessment = assess(&inputs, &config);
        assert_eq!(assessment.score, 30);
        assert!(assessment.has(RiskSignal::ConcurrentSessions));
    }

    #[test]
    fn unknown_country_is_not_foreign() {
        let mut inputs = quiet_inputs();
        inputs.country = None;
        assert_eq!(assess(&inputs, &EngineConfig::new()).score, 0);
    }

    #[test]
    fn score_caps_at_one_hundred() {
        let inputs = RiskInputs {
            trusted_device: false,
            country: Some("NL"),
            hour_of_day: 23,
            concurrent_other_address: 10,
        };
        let assessment = assess(&inputs, &EngineConfig::new());
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.signals.len(), 4);
    }
}
