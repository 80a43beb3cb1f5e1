//! Category and severity inference for audit events.
//!
//! Inference from free-text action and path strings is heuristic keyword
//! matching. It is kept behind a trait so rules can be extended without
//! touching the call sites that record events.

use super::models::{AuditEvent, Category, Severity};

/// Pluggable audit event classifier. Implementations must be deterministic
/// and pure: the same event always classifies the same way.
pub trait Classifier: Send + Sync {
    fn categorize(&self, event: &AuditEvent) -> Category;
    fn severity(&self, event: &AuditEvent) -> Severity;
}

/// Default keyword-matching classifier.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn haystack(event: &AuditEvent) -> String {
        let mut text = event.action.to_lowercase();
        if let Some(resource) = &event.resource {
            text.push(' ');
            text.push_str(&resource.to_lowercase());
        }
        if let Some(path) = event.detail.get("path").and_then(|v| v.as_str()) {
            text.push(' ');
            text.push_str(&path.to_lowercase());
        }
        text
    }
}

impl Classifier for KeywordClassifier {
    fn categorize(&self, event: &AuditEvent) -> Category {
        let text = Self::haystack(event);
        if text.contains("admin") {
            Category::Admin
        } else if ["login", "logout", "auth", "session", "mfa", "totp"]
            .iter()
            .any(|kw| text.contains(kw))
        {
            Category::Auth
        } else if ["booking", "property", "propert", "contact", "lead", "showing"]
            .iter()
            .any(|kw| text.contains(kw))
        {
            Category::Data
        } else {
            Category::System
        }
    }

    fn severity(&self, event: &AuditEvent) -> Severity {
        let text = Self::haystack(event);
        if ["revoke", "delete", "disable", "rotate"]
            .iter()
            .any(|kw| text.contains(kw))
        {
            Severity::Medium
        } else if !event.success && self.categorize(event) == Category::Auth {
            Severity::Medium
        } else if event.category == Category::Admin {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, Classifier, KeywordClassifier, Severity};
    use crate::audit::models::AuditEvent;
    use crate::context::RequestContext;

    fn event(action: &str, resource: Option<&str>, success: bool) -> AuditEvent {
        AuditEvent::action(None, action, resource, success, &RequestContext::new())
    }

    #[test]
    fn auth_keywords_map_to_auth() {
        let classifier = KeywordClassifier::new();
        assert_eq!(
            classifier.categorize(&event("login_success", None, true)),
            Category::Auth
        );
        assert_eq!(
            classifier.categorize(&event("mfa_verify", None, false)),
            Category::Auth
        );
    }

    #[test]
    fn admin_wins_over_other_keywords() {
        let classifier = KeywordClassifier::new();
        assert_eq!(
            classifier.categorize(&event("admin_login", None, true)),
            Category::Admin
        );
    }

    #[test]
    fn data_paths_map_to_data() {
        let classifier = KeywordClassifier::new();
        assert_eq!(
            classifier.categorize(&event("update", Some("/v1/properties/42"), true)),
            Category::Data
        );
        assert_eq!(
            classifier.categorize(&event("read", Some("booking:17"), true)),
            Category::Data
        );
    }

    #[test]
    fn everything_else_is_system() {
        let classifier = KeywordClassifier::new();
        assert_eq!(
            classifier.categorize(&event("cache_cleanup", None, true)),
            Category::System
        );
    }

    #[test]
    fn failed_auth_is_medium_severity() {
        let classifier = KeywordClassifier::new();
        assert_eq!(
            classifier.severity(&event("login_failure", None, false)),
            Severity::Medium
        );
        assert_eq!(
            classifier.severity(&event("cache_cleanup", None, true)),
            Severity::Low
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = KeywordClassifier::new();
        let sample = event("session_validate", Some("/v1/admin/keys"), true);
        let first = classifier.categorize(&sample);
        for _ in 0..10 {
            assert_eq!(classifier.categorize(&sample), first);
        }
    }
}
