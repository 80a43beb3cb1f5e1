//! Cross-module integration tests for the security engine.
//!
//! Wires the real components together (audit sink, vault, key authenticator,
//! MFA provider, session manager) and exercises the flows a backend would
//! drive: machine authentication, field protection, MFA step-up, and the
//! audit trail that ties them together.

use std::sync::Arc;

use custos::apikey::models::IssueKeyParams;
use custos::apikey::storage::MemoryApiKeyStore;
use custos::apikey::ApiKeyAuthenticator;
use custos::audit::models::{AuditQuery, Category};
use custos::audit::storage::MemoryAuditStore;
use custos::audit::AuditSink;
use custos::mfa::storage::MemoryMfaStore;
use custos::mfa::MfaProvider;
use custos::session::geo::{Location, StaticGeoResolver};
use custos::session::storage::{MemoryDeviceStore, MemorySessionStore};
use custos::session::SessionManager;
use custos::vault::EncryptionManager;
use custos::{EngineConfig, Error, RequestContext};
use totp_rs::{Algorithm, Secret, TOTP};

struct Engine {
    sink: AuditSink,
    vault: Arc<EncryptionManager>,
    keys: ApiKeyAuthenticator,
    mfa: Arc<MfaProvider>,
    sessions: SessionManager,
}

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn engine() -> Engine {
    init_tracing();
    let config = EngineConfig::new().with_backup_code_pepper(b"integration-pepper".to_vec());
    let sink = AuditSink::new(Arc::new(MemoryAuditStore::new()), &config);
    let vault = Arc::new(EncryptionManager::new(sink.clone(), &config));
    let keys = ApiKeyAuthenticator::new(
        Arc::new(MemoryApiKeyStore::new()),
        sink.clone(),
        &config,
    );
    let mfa = Arc::new(MfaProvider::new(
        Arc::new(MemoryMfaStore::new()),
        Arc::clone(&vault),
        sink.clone(),
        &config,
    ));
    let geo = StaticGeoResolver::new()
        .with_entry("198.51.100.4", Location::country("US"))
        .with_entry("203.0.113.9", Location::country("NL"));
    let sessions = SessionManager::new(
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryDeviceStore::new()),
        Arc::new(geo),
        Arc::clone(&mfa),
        sink.clone(),
        config,
    );
    Engine {
        sink,
        vault,
        keys,
        mfa,
        sessions,
    }
}

fn agent_ctx() -> RequestContext {
    RequestContext::new()
        .with_ip("198.51.100.4")
        .with_user_agent("Mozilla/5.0")
        .with_accept_language("en-US")
}

fn current_code(secret_base32: &str, account: &str) -> String {
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .expect("secret decodes"),
        Some("custos".to_string()),
        account.to_string(),
    )
    .expect("totp builds");
    totp.generate_current().expect("system time")
}

#[tokio::test]
async fn machine_caller_round_trip() {
    let engine = engine();
    let ctx = agent_ctx();

    let issued = engine
        .keys
        .issue_key(
            "platform-admin",
            IssueKeyParams {
                name: "mls-sync".to_string(),
                scopes: vec!["listings:read".to_string(), "listings:write".to_string()],
                quota_per_hour: 1000,
                ..IssueKeyParams::default()
            },
        )
        .expect("key issues");

    let key = engine
        .keys
        .authenticate(&issued.credential, &ctx)
        .expect("credential authenticates");
    engine
        .keys
        .require_scope(&key, "listings:write", &ctx)
        .expect("scope granted");
    assert!(engine
        .keys
        .require_scope(&key, "payments:refund", &ctx)
        .is_err());

    engine.keys.revoke_key("platform-admin", &key.id).unwrap();
    assert_eq!(
        engine
            .keys
            .authenticate(&issued.credential, &ctx)
            .unwrap_err(),
        Error::AccessDenied
    );

    engine.sink.flush().await;
    let mut query = AuditQuery::new();
    query.category = Some(Category::Admin);
    let admin_events = engine.sink.query(&query).unwrap();
    let actions: Vec<_> = admin_events.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.contains(&"api_key_issue"));
    assert!(actions.contains(&"api_key_revoke"));
}

#[tokio::test]
async fn protected_fields_survive_key_rotation() {
    let engine = engine();

    let stored = engine
        .vault
        .protect("+31 6 1234 5678")
        .expect("field seals");
    assert!(!stored.contains("1234"));

    engine.vault.rotate_key().expect("rotates");
    assert_eq!(
        engine.vault.reveal(&stored).expect("old key still opens"),
        "+31 6 1234 5678"
    );

    // New writes use the new key while old blobs remain readable.
    let fresh = engine.vault.protect("doc-42 escrow notes").unwrap();
    assert_ne!(
        serde_json::from_str::<serde_json::Value>(&stored).unwrap()["key_id"],
        serde_json::from_str::<serde_json::Value>(&fresh).unwrap()["key_id"]
    );
}

#[tokio::test]
async fn mfa_step_up_gates_new_sessions() {
    let engine = engine();
    let ctx = agent_ctx();

    let first = engine
        .sessions
        .create_session("agent-7", &ctx, "password")
        .expect("session creates");
    assert!(!first.session.requires_mfa);

    let enrolled = engine.mfa.enroll("agent-7", Some("phone"), &ctx).unwrap();
    engine
        .mfa
        .verify_code("agent-7", &current_code(&enrolled.secret_base32, "agent-7"), &ctx)
        .expect("first code confirms enrollment");

    let second = engine
        .sessions
        .create_session("agent-7", &ctx, "password")
        .unwrap();
    assert!(second.session.requires_mfa);
    assert!(!second.session.mfa_verified);

    engine
        .mfa
        .verify_code("agent-7", &current_code(&enrolled.secret_base32, "agent-7"), &ctx)
        .expect("step-up code accepted");
    engine
        .sessions
        .record_mfa_verified(second.session.id, &ctx)
        .unwrap();
    let validated = engine.sessions.validate_session(&second.token, &ctx).unwrap();
    assert!(validated.mfa_verified);

    // Backup code covers a lost authenticator exactly once.
    let backup = enrolled.backup_codes[0].clone();
    engine
        .mfa
        .verify_backup_code("agent-7", &backup, &ctx)
        .expect("backup code accepted");
    assert_eq!(
        engine
            .mfa
            .verify_backup_code("agent-7", &backup, &ctx)
            .unwrap_err(),
        Error::BackupCodeAlreadyUsed
    );
}

#[tokio::test]
async fn concurrent_foreign_login_is_flagged_and_contained() {
    let engine = engine();

    let home = engine
        .sessions
        .create_session("agent-7", &agent_ctx(), "password")
        .unwrap();

    let abroad = RequestContext::new()
        .with_ip("203.0.113.9")
        .with_user_agent("Mozilla/5.0");
    let foreign = engine
        .sessions
        .create_session("agent-7", &abroad, "password")
        .unwrap();
    assert!(foreign.session.risk_score >= 50);

    engine.sink.flush().await;
    let events = engine.sink.security_events().unwrap();
    let event = events
        .iter()
        .find(|e| e.kind == "multiple_locations")
        .expect("anomaly raised");

    // Respond to the event: end every session, then resolve it.
    let ended = engine
        .sessions
        .invalidate_all_for_account("on-call", "agent-7", &RequestContext::new())
        .unwrap();
    assert_eq!(ended, 2);
    assert!(engine
        .sessions
        .validate_session(&home.token, &agent_ctx())
        .is_err());

    engine
        .sink
        .resolve_security_event(event.id, "on-call")
        .unwrap();
    let events = engine.sink.security_events().unwrap();
    assert!(events
        .iter()
        .find(|e| e.id == event.id)
        .map(|e| e.resolved)
        .unwrap_or(false));
}

#[tokio::test]
async fn audit_trail_spans_every_component() {
    let engine = engine();
    let ctx = agent_ctx();

    let issued = engine
        .keys
        .issue_key(
            "platform-admin",
            IssueKeyParams {
                name: "webhooks".to_string(),
                quota_per_hour: 10,
                ..IssueKeyParams::default()
            },
        )
        .unwrap();
    engine.keys.authenticate(&issued.credential, &ctx).unwrap();
    engine.vault.protect("contact row").unwrap();
    engine.mfa.enroll("agent-7", None, &ctx).unwrap();
    engine
        .sessions
        .create_session("agent-7", &ctx, "password")
        .unwrap();

    engine.sink.flush().await;
    let all = engine.sink.query(&AuditQuery::new()).unwrap();
    let actions: Vec<_> = all.iter().map(|e| e.action.as_str()).collect();
    for expected in [
        "api_key_issue",
        "api_key_auth",
        "field_encrypt",
        "mfa_enroll",
        "session_create",
    ] {
        assert!(actions.contains(&expected), "missing {expected}");
    }

    // No plaintext secret material anywhere in the trail.
    let serialized = serde_json::to_string(&all).unwrap();
    let secret_half = issued.credential.split_once('.').unwrap().1;
    assert!(!serialized.contains(secret_half));
}
