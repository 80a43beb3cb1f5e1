//! # Custos (Identity, Credential & Session Security Engine)
//!
//! `custos` is the security core for a property-operations backend. It owns
//! machine credentials, field-level encryption, MFA, server-side sessions,
//! and the audit trail the rest of the platform writes into.
//!
//! ## Credentials
//!
//! Machine callers authenticate with two-part `id.secret` keys. Only the
//! secret's SHA-256 is stored; scopes, hourly quotas, IP allow-lists, and
//! optional webhook signing secrets hang off the key record. Revocation is
//! soft, so the record stays behind for audit continuity.
//!
//! Every rejection is returned to the caller as the same generic
//! [`Error::AccessDenied`]; the precise reason (bad secret, revoked, rate
//! limited, address blocked) lives only in the audit trail, so callers cannot
//! probe which check failed.
//!
//! ## Encryption at rest
//!
//! Sensitive fields are sealed with ChaCha20-Poly1305 under a rotating key
//! ring; blobs record the key id that sealed them, so rotation never breaks
//! old data. Documents get envelope encryption: a fresh key per document,
//! itself wrapped by the master ring.
//!
//! ## Sessions & risk
//!
//! Sessions are opaque 256-bit tokens (stored hashed) with device
//! fingerprinting, approximate geolocation, and additive risk scoring.
//! Anomalies such as concurrent logins from different addresses raise
//! security events for review.
//!
//! ## Audit
//!
//! The audit trail is append-only and never blocks a request: records queue
//! onto a background writer that retries transient store failures. Security
//! events carry a numeric risk score and support a single mutation, marking
//! them resolved.

pub mod apikey;
pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod mfa;
pub mod rate_limit;
pub mod session;
pub mod vault;

pub use config::EngineConfig;
pub use context::RequestContext;
pub use error::{Error, Result};
