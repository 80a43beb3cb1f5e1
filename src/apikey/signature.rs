//! Webhook payload signing and verification.
//!
//! Signatures are HMAC-SHA256 over the raw body, carried as
//! `sha256=<hex>`. When a companion timestamp is supplied it is prepended to
//! the signed payload (`{timestamp}.{body}`) to mitigate replay.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the signature header value for a payload.
#[must_use]
pub fn sign(secret: &[u8], timestamp: Option<&str>, body: &[u8]) -> String {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC can take key of any size");
    if let Some(timestamp) = timestamp {
        mac.update(timestamp.as_bytes());
        mac.update(b".");
    }
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header value in constant time.
///
/// # Errors
/// [`Error::SignatureInvalid`] for a missing prefix, malformed hex, or a
/// mismatched digest.
pub fn verify(secret: &[u8], timestamp: Option<&str>, body: &[u8], header: &str) -> Result<()> {
    let presented = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(Error::SignatureInvalid)?;
    let expected = sign(secret, timestamp, body);
    let expected_hex = expected
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(&expected);

    // Compare decoded bytes so hex case differences do not matter.
    let presented_bytes = hex::decode(presented).map_err(|_| Error::SignatureInvalid)?;
    let expected_bytes = hex::decode(expected_hex).map_err(|_| Error::SignatureInvalid)?;
    if presented_bytes.ct_eq(&expected_bytes).into() {
        Ok(())
    } else {
        Err(Error::SignatureInvalid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{sign, verify};

    #[test]
    fn sign_then_verify_round_trip() {
        let secret = b"whsec_4f2d";
        let body = b"{\"event\":\"showing.booked\"}";
        let header = sign(secret, Some("1772300000"), body);
        assert!(header.starts_with("sha256="));
        verify(secret, Some("1772300000"), body, &header).unwrap();
    }

    #[test]
    fn any_single_byte_mutation_fails() {
        let secret = b"whsec_4f2d";
        let body = b"payload-bytes";
        let header = sign(secret, None, body);

        for i in 0..body.len() {
            let mut mutated = body.to_vec();
            mutated[i] ^= 0x01;
            assert!(verify(secret, None, &mutated, &header).is_err());
        }
        for i in 0..secret.len() {
            let mut mutated = secret.to_vec();
            mutated[i] ^= 0x01;
            assert!(verify(&mutated, None, body, &header).is_err());
        }
    }

    #[test]
    fn timestamp_is_part_of_the_signed_payload() {
        let secret = b"s";
        let body = b"b";
        let header = sign(secret, Some("100"), body);
        assert!(verify(secret, Some("101"), body, &header).is_err());
        assert!(verify(secret, None, body, &header).is_err());
    }

    #[test]
    fn malformed_headers_rejected() {
        let secret = b"s";
        assert!(verify(secret, None, b"b", "md5=abcd").is_err());
        assert!(verify(secret, None, b"b", "sha256=zzzz").is_err());
        assert!(verify(secret, None, b"b", "").is_err());
    }

    #[test]
    fn verify_accepts_uppercase_hex() {
        let secret = b"s";
        let body = b"b";
        let header = sign(secret, None, body).to_uppercase();
        let header = header.replace("SHA256=", "sha256=");
        verify(secret, None, body, &header).unwrap();
    }
}
