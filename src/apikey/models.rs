//! Machine credential records.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// An issued machine credential. The plaintext secret is never part of the
/// record; only its one-way hash is retained. The webhook secret is needed
/// raw for HMAC verification and is therefore held behind [`SecretString`]
/// (redacted `Debug`, never serialized).
#[derive(Debug, Clone)]
pub struct ApiKey {
    /// Opaque identifier, the public half of the `id.secret` credential.
    pub id: String,
    /// Hex SHA-256 of the secret half.
    pub secret_hash: String,
    pub name: String,
    pub scopes: Vec<String>,
    pub quota_per_hour: u32,
    /// Empty list means no address restriction.
    pub ip_allow_list: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub webhook_secret: Option<SecretString>,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    #[must_use]
    pub fn ip_allowed(&self, ip: Option<&str>) -> bool {
        if self.ip_allow_list.is_empty() {
            return true;
        }
        ip.is_some_and(|ip| self.ip_allow_list.iter().any(|allowed| allowed == ip))
    }

    /// Display form safe for logs and responses: the id with the secret
    /// masked out.
    #[must_use]
    pub fn masked(&self) -> String {
        format!("{}.****", self.id)
    }

    pub(crate) fn webhook_secret_bytes(&self) -> Option<Vec<u8>> {
        self.webhook_secret
            .as_ref()
            .map(|secret| secret.expose_secret().as_bytes().to_vec())
    }
}

/// Parameters for issuing a new key.
#[derive(Debug, Clone, Default)]
pub struct IssueKeyParams {
    pub name: String,
    pub scopes: Vec<String>,
    pub quota_per_hour: u32,
    pub ip_allow_list: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Generate a webhook signing secret alongside the credential.
    pub with_webhook_secret: bool,
}

/// Result of key issuance. `secret` and `webhook_secret` are returned here
/// exactly once and never again.
pub struct IssuedKey {
    pub record: ApiKey,
    pub credential: String,
    pub webhook_secret: Option<String>,
}
