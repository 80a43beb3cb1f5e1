//! Request context carried by every authentication and validation call.

/// Client-supplied characteristics of the inbound request.
///
/// The engine never parses transport headers itself; the calling application
/// extracts these fields (the first `X-Forwarded-For` hop for the address,
/// and the raw header values used for fingerprinting) and hands them over.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Client network address, as resolved by the caller.
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
    pub accept: Option<String>,
    /// Request path, used only for audit categorization.
    pub path: Option<String>,
    /// Raw request body, present when the caller is a webhook source.
    pub body: Option<Vec<u8>>,
    /// Value of the `X-Signature` header (`sha256=<hex>`), when present.
    pub signature: Option<String>,
    /// Value of the companion timestamp header included in the signed payload.
    pub signature_timestamp: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn with_accept_language(mut self, value: impl Into<String>) -> Self {
        self.accept_language = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_accept_encoding(mut self, value: impl Into<String>) -> Self {
        self.accept_encoding = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_accept(mut self, value: impl Into<String>) -> Self {
        self.accept = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_signed_body(
        mut self,
        body: Vec<u8>,
        signature: impl Into<String>,
        timestamp: Option<String>,
    ) -> Self {
        self.body = Some(body);
        self.signature = Some(signature.into());
        self.signature_timestamp = timestamp;
        self
    }

    /// Address for audit records; `"unknown"` when the caller could not
    /// resolve one.
    #[must_use]
    pub fn ip_or_unknown(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }
}
