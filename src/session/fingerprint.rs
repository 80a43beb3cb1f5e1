//! Device fingerprinting from client-supplied request characteristics.

use sha2::{Digest, Sha256};

use crate::context::RequestContext;

/// Stable fingerprint over the header values the caller extracted. Absent
/// values hash as empty strings so the digest length never varies.
#[must_use]
pub fn fingerprint(ctx: &RequestContext) -> String {
    let mut hasher = Sha256::new();
    for part in [
        ctx.user_agent.as_deref(),
        ctx.accept_language.as_deref(),
        ctx.accept_encoding.as_deref(),
        ctx.accept.as_deref(),
    ] {
        hasher.update(part.unwrap_or_default().as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::fingerprint;
    use crate::context::RequestContext;

    #[test]
    fn same_characteristics_same_fingerprint() {
        let a = RequestContext::new()
            .with_user_agent("Mozilla/5.0")
            .with_accept_language("en-US")
            .with_accept_encoding("gzip")
            .with_accept("text/html");
        let b = a.clone().with_ip("10.0.0.1");
        // The address is not part of the fingerprint.
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn any_header_change_changes_fingerprint() {
        let base = RequestContext::new()
            .with_user_agent("Mozilla/5.0")
            .with_accept_language("en-US");
        let other = base.clone().with_user_agent("curl/8.0");
        assert_ne!(fingerprint(&base), fingerprint(&other));
    }

    #[test]
    fn missing_fields_still_produce_a_digest() {
        let fp = fingerprint(&RequestContext::new());
        assert_eq!(fp.len(), 64);
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = RequestContext::new().with_user_agent("ab");
        let b = RequestContext::new()
            .with_user_agent("a")
            .with_accept_language("b");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
