//! TOTP enrollment, verification, and single-use backup codes.
//!
//! Enrollment is pending until the first successful code verification; only
//! then does the account count as MFA-enabled for session step-up. The shared
//! secret is sealed by the vault before it reaches the store.

pub mod backup;
pub mod storage;

use chrono::Utc;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::info;

use crate::audit::models::AuditEvent;
use crate::audit::AuditSink;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::vault::EncryptionManager;
use backup::BackupCodeBatch;
use storage::{MfaEnrollment, MfaStore};

const TOTP_DIGITS: usize = 6;
/// Accept one 30s step of clock skew either side.
const TOTP_SKEW: u8 = 1;
const TOTP_STEP_SECONDS: u64 = 30;

/// Result of a fresh enrollment. The base32 secret and plaintext backup codes
/// are shown here exactly once.
pub struct EnrolledMfa {
    pub secret_base32: String,
    pub otpauth_url: String,
    pub backup_codes: Vec<String>,
}

pub struct MfaProvider {
    store: Arc<dyn MfaStore>,
    vault: Arc<EncryptionManager>,
    sink: AuditSink,
    issuer: String,
    pepper: Vec<u8>,
    backup_code_count: usize,
}

impl MfaProvider {
    #[must_use]
    pub fn new(
        store: Arc<dyn MfaStore>,
        vault: Arc<EncryptionManager>,
        sink: AuditSink,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            vault,
            sink,
            issuer: config.totp_issuer().to_string(),
            pepper: config.backup_code_pepper().to_vec(),
            backup_code_count: config.backup_code_count(),
        }
    }

    /// Begin enrollment: generate a fresh secret and backup-code batch.
    ///
    /// The account is not MFA-enabled until [`Self::verify_code`] succeeds
    /// once; a re-enrollment before that point simply replaces the pending
    /// secret.
    ///
    /// # Errors
    /// [`Error::Malformed`] for an account name the otpauth format rejects;
    /// crypto and store failures propagate.
    pub fn enroll(
        &self,
        account_id: &str,
        label: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<EnrolledMfa> {
        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|_| Error::EncryptionFailure)?;
        let totp = self.totp(secret_bytes, account_id)?;
        let secret_base32 = totp.get_secret_base32();

        let batch = BackupCodeBatch::generate(&self.pepper, self.backup_code_count)?;
        self.store.put(MfaEnrollment {
            account_id: account_id.to_string(),
            secret_protected: self.vault.protect(&secret_base32)?,
            label: label.map(ToString::to_string),
            enabled: false,
            enrolled_at: Utc::now(),
            confirmed_at: None,
            last_used_at: None,
            backup_codes: batch.hashes,
        })?;

        info!(account = %account_id, "mfa enrollment started");
        self.sink.record(
            AuditEvent::action(Some(account_id), "mfa_enroll", None, true, ctx)
                .with_detail(serde_json::json!({ "backup_codes": self.backup_code_count })),
        );
        Ok(EnrolledMfa {
            secret_base32,
            otpauth_url: totp.get_url(),
            backup_codes: batch.codes,
        })
    }

    /// Verify a TOTP code. The first success confirms the enrollment and
    /// enables MFA for the account.
    ///
    /// # Errors
    /// [`Error::NotFound`] without an enrollment, [`Error::CodeInvalid`] for a
    /// code outside the accepted step window.
    pub fn verify_code(&self, account_id: &str, code: &str, ctx: &RequestContext) -> Result<()> {
        let result = self.verify_code_inner(account_id, code);
        self.audit_attempt(account_id, "totp_verify", &result, ctx);
        result
    }

    fn verify_code_inner(&self, account_id: &str, code: &str) -> Result<()> {
        let enrollment = self.store.get(account_id)?.ok_or(Error::NotFound)?;
        let secret_base32 = self.vault.reveal(&enrollment.secret_protected)?;
        let secret_bytes = Secret::Encoded(secret_base32)
            .to_bytes()
            .map_err(|_| Error::EncryptionFailure)?;
        let totp = self.totp(secret_bytes, account_id)?;

        if !matches!(totp.check_current(code), Ok(true)) {
            return Err(Error::CodeInvalid);
        }

        let now = Utc::now();
        if !enrollment.enabled {
            self.store.enable(account_id, now)?;
            info!(account = %account_id, "mfa enabled");
        }
        self.store.record_use(account_id, now)?;
        Ok(())
    }

    /// Verify a backup code and atomically mark it used.
    ///
    /// # Errors
    /// [`Error::BackupCodeAlreadyUsed`] for a matching but spent code,
    /// [`Error::CodeInvalid`] otherwise.
    pub fn verify_backup_code(
        &self,
        account_id: &str,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<()> {
        let result = self.verify_backup_code_inner(account_id, code);
        self.audit_attempt(account_id, "backup_code_verify", &result, ctx);
        result
    }

    fn verify_backup_code_inner(&self, account_id: &str, code: &str) -> Result<()> {
        backup::normalize_code(code)?;
        let enrollment = self.store.get(account_id)?.ok_or(Error::NotFound)?;

        for stored in &enrollment.backup_codes {
            if backup::verify_code(code, &stored.hash, &self.pepper)? {
                if stored.used {
                    return Err(Error::BackupCodeAlreadyUsed);
                }
                // Consume by hash: if the batch was replaced since the match,
                // the store misses rather than spending an unrelated code.
                return self
                    .store
                    .consume_backup_code(account_id, &stored.hash, Utc::now());
            }
        }
        Err(Error::CodeInvalid)
    }

    /// Replace every outstanding backup code with a fresh batch.
    ///
    /// # Errors
    /// [`Error::NotFound`] without an enrollment.
    pub fn regenerate_backup_codes(
        &self,
        actor: &str,
        account_id: &str,
        ctx: &RequestContext,
    ) -> Result<Vec<String>> {
        self.store.get(account_id)?.ok_or(Error::NotFound)?;
        let batch = BackupCodeBatch::generate(&self.pepper, self.backup_code_count)?;
        self.store.replace_backup_codes(account_id, batch.hashes)?;
        self.sink.record(AuditEvent::admin(
            actor,
            "backup_codes_regenerate",
            Some(account_id),
            ctx,
        ));
        Ok(batch.codes)
    }

    /// Remove the enrollment entirely; the account drops out of step-up.
    ///
    /// # Errors
    /// [`Error::NotFound`] without an enrollment.
    pub fn disable(&self, actor: &str, account_id: &str, ctx: &RequestContext) -> Result<()> {
        self.store.delete(account_id)?;
        info!(account = %account_id, "mfa disabled");
        self.sink
            .record(AuditEvent::admin(actor, "mfa_disable", Some(account_id), ctx));
        Ok(())
    }

    /// Whether the account has a confirmed enrollment. Consulted by session
    /// creation for the step-up flag.
    ///
    /// # Errors
    /// Store failures propagate so callers can fail closed.
    pub fn is_enabled(&self, account_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get(account_id)?
            .is_some_and(|enrollment| enrollment.enabled))
    }

    fn totp(&self, secret_bytes: Vec<u8>, account_name: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account_name.to_string(),
        )
        .map_err(|_| Error::Malformed)
    }

    fn audit_attempt(
        &self,
        account_id: &str,
        action: &str,
        result: &Result<()>,
        ctx: &RequestContext,
    ) {
        let mut event =
            AuditEvent::action(Some(account_id), action, None, result.is_ok(), ctx);
        if let Err(err) = result {
            event = event.with_reason(err.reason_code());
        }
        self.sink.record(event);
    }
}
