//! The boundary to the host web framework.
//!
//! Hosts translate their own request into an [`HttpRequest`] and apply the
//! returned [`HttpResponse`] (status, `Location`, `Set-Cookie` headers) as-is.

use url::Url;

use crate::helpers::{cookie_path, cookie_value, query_param};

/// The parts of an inbound request the login handshake reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    url: String,
    secure: bool,
    cookie_header: Option<String>,
    context_path: String,
}

impl HttpRequest {
    /// `url` is the full request URL, query string included. The request
    /// counts as secure when the scheme is `https`; override with [`HttpRequest::secure`]
    /// when TLS terminates in front of the host.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let secure = Url::parse(&url).is_ok_and(|parsed| parsed.scheme() == "https");
        Self {
            url,
            secure,
            cookie_header: None,
            context_path: String::new(),
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn cookie_header(mut self, header: impl Into<String>) -> Self {
        self.cookie_header = Some(header.into());
        self
    }

    pub fn context_path(mut self, path: impl Into<String>) -> Self {
        self.context_path = path.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        cookie_value(self.cookie_header.as_deref(), name)
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        query_param(&self.url, name)
    }

    /// Path cookies are scoped to: the context path, or `/` when there is none.
    pub fn cookie_path(&self) -> &str {
        cookie_path(&self.context_path)
    }
}

/// Response being assembled for the host.
///
/// Cookies accumulate; the first `send_redirect`/`send_error` commits the
/// status and later attempts are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    status: Option<u16>,
    location: Option<String>,
    set_cookies: Vec<String>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cookie(&mut self, set_cookie: String) {
        self.set_cookies.push(set_cookie);
    }

    pub fn send_redirect(&mut self, location: &str) {
        if self.commit(302) {
            log::debug!("Sending redirect to: {location}");
            self.location = Some(location.to_string());
        }
    }

    pub fn send_error(&mut self, status: u16) {
        self.commit(status);
    }

    fn commit(&mut self, status: u16) -> bool {
        if let Some(existing) = self.status {
            log::warn!("response already committed with {existing}, dropping {status}");
            return false;
        }
        self.status = Some(status);
        true
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn set_cookies(&self) -> &[String] {
        &self.set_cookies
    }

    pub fn is_committed(&self) -> bool {
        self.status.is_some()
    }
}
