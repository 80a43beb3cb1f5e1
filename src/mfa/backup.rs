//! Backup code generation and verification.
//!
//! Backup codes cover one-time sign-in when the authenticator app is
//! unavailable. Codes are Argon2id-hashed with a server-side pepper; only the
//! hashes are retained.

use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};

use crate::error::{Error, Result};

const CODE_LEN: usize = 12;
const CODE_GROUP_SIZE: usize = 4;
/// Visually ambiguous characters (0/O, 1/I) are excluded.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A stored backup code: hash plus single-use bookkeeping.
#[derive(Debug, Clone)]
pub struct BackupCode {
    pub hash: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl BackupCode {
    #[must_use]
    pub fn new(hash: String) -> Self {
        Self {
            hash,
            used: false,
            used_at: None,
        }
    }
}

/// A freshly generated batch: plaintext for one-time display, hashes for
/// storage.
pub struct BackupCodeBatch {
    pub codes: Vec<String>,
    pub hashes: Vec<BackupCode>,
}

impl BackupCodeBatch {
    /// Generate `count` codes hashed with `pepper`.
    ///
    /// # Errors
    /// [`Error::EncryptionFailure`] when Argon2id cannot be initialized or a
    /// hash cannot be produced.
    pub fn generate(pepper: &[u8], count: usize) -> Result<Self> {
        let mut rng = OsRng;
        let mut codes = Vec::with_capacity(count);
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            let code = generate_code(&mut rng);
            let hash = hash_code(&code, pepper)?;
            codes.push(code);
            hashes.push(BackupCode::new(hash));
        }
        Ok(Self { codes, hashes })
    }
}

/// Normalize user input for verification: strip separators, uppercase, check
/// length and alphabet.
///
/// # Errors
/// [`Error::CodeInvalid`] when the input cannot be a backup code at all.
pub fn normalize_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != CODE_LEN {
        return Err(Error::CodeInvalid);
    }
    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| CODE_ALPHABET.contains(ch))
    {
        return Err(Error::CodeInvalid);
    }
    Ok(normalized)
}

/// Grouped display form, `XXXX-XXXX-XXXX`.
fn format_code(normalized: &str) -> String {
    let mut out = String::with_capacity(CODE_LEN + 2);
    for (idx, chunk) in normalized.as_bytes().chunks(CODE_GROUP_SIZE).enumerate() {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    out
}

/// Verify a code against a stored hash in its normalized form.
///
/// # Errors
/// [`Error::CodeInvalid`] for malformed input, [`Error::EncryptionFailure`]
/// when the stored hash is unparseable or Argon2id fails to initialize.
pub fn verify_code(code: &str, stored_hash: &str, pepper: &[u8]) -> Result<bool> {
    let normalized = normalize_code(code)?;
    let parsed = PasswordHash::new(stored_hash).map_err(|_| Error::EncryptionFailure)?;
    Ok(argon2_with_pepper(pepper)?
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut raw = [0u8; CODE_LEN];
    rng.fill_bytes(&mut raw);
    let normalized: String = raw
        .iter()
        .map(|&byte| CODE_ALPHABET[usize::from(byte) % CODE_ALPHABET.len()] as char)
        .collect();
    format_code(&normalized)
}

fn hash_code(code: &str, pepper: &[u8]) -> Result<String> {
    let normalized = normalize_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2_with_pepper(pepper)?
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| Error::EncryptionFailure)?
        .to_string();
    Ok(hash)
}

fn argon2_with_pepper(pepper: &[u8]) -> Result<Argon2<'_>> {
    Argon2::new_with_secret(
        pepper,
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
    .map_err(|_| Error::EncryptionFailure)
}
