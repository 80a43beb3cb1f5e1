//! Audit and security event records.
//!
//! Events are write-once: nothing mutates a stored record except the
//! resolution fields of a [`SecurityEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::RequestContext;

/// Severity ladder shared by audit and security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Fixed thresholds mapping a 0-100 risk score to a severity.
    #[must_use]
    pub fn from_risk(risk_score: u8) -> Self {
        match risk_score {
            80.. => Self::Critical,
            60..=79 => Self::High,
            40..=59 => Self::Medium,
            _ => Self::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Auth,
    Admin,
    Data,
    System,
    Security,
}

/// General audit event; the four shapes (action, HTTP request summary,
/// administrative action, activity) are distinguished by constructor and
/// `action` naming, not by separate storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Absent for failed authentication where no actor could be established.
    pub actor: Option<String>,
    pub action: String,
    pub resource: Option<String>,
    pub category: Category,
    pub severity: Severity,
    pub success: bool,
    /// Internal rejection reason code; never returned to callers.
    pub reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub detail: Value,
}

impl AuditEvent {
    /// General action event. Category and severity are provisional until the
    /// sink's classifier runs.
    #[must_use]
    pub fn action(
        actor: Option<&str>,
        action: &str,
        resource: Option<&str>,
        success: bool,
        ctx: &RequestContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.map(ToString::to_string),
            action: action.to_string(),
            resource: resource.map(ToString::to_string),
            category: Category::System,
            severity: Severity::Low,
            success,
            reason: None,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            detail: Value::Null,
        }
    }

    /// HTTP request summary event.
    #[must_use]
    pub fn http_request(
        actor: Option<&str>,
        method: &str,
        path: &str,
        status: u16,
        latency_ms: u64,
        ctx: &RequestContext,
    ) -> Self {
        let mut event = Self::action(actor, "http_request", Some(path), status < 400, ctx);
        event.detail = serde_json::json!({
            "method": method,
            "path": path,
            "status": status,
            "latency_ms": latency_ms,
        });
        event
    }

    /// Administrative action event (key issuance, MFA disable, mass revoke).
    #[must_use]
    pub fn admin(actor: &str, action: &str, target: Option<&str>, ctx: &RequestContext) -> Self {
        let mut event = Self::action(Some(actor), action, target, true, ctx);
        event.category = Category::Admin;
        event.severity = Severity::Medium;
        event
    }

    #[must_use]
    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Anomaly record raised by detection logic; risk score drives severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
    /// Stable anomaly kind, e.g. `multiple_locations` or `unusual_hours`.
    pub kind: String,
    pub risk_score: u8,
    pub severity: Severity,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub detail: Value,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SecurityEvent {
    #[must_use]
    pub fn new(actor: Option<&str>, kind: &str, risk_score: u8, ctx: &RequestContext) -> Self {
        let risk_score = risk_score.min(100);
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.map(ToString::to_string),
            kind: kind.to_string(),
            risk_score,
            severity: Severity::from_risk(risk_score),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            detail: Value::Null,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Filters for querying the audit trail. All filters are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub action_contains: Option<String>,
    pub resource: Option<String>,
    pub severity: Option<Severity>,
    pub category: Option<Category>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: usize = 100;

    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            ..Self::default()
        }
    }

    /// Whether an event passes every configured filter.
    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(actor) = &self.actor {
            if event.actor.as_deref() != Some(actor.as_str()) {
                return false;
            }
        }
        if let Some(fragment) = &self.action_contains {
            if !event.action.contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if event.resource.as_deref() != Some(resource.as_str()) {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        if let Some(category) = self.category {
            if event.category != category {
                return false;
            }
        }
        if let Some(success) = self.success {
            if event.success != success {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp >= to {
                return false;
            }
        }
        true
    }
}
