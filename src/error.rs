use thiserror::Error;

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_FORBIDDEN: u16 = 403;

/// Terminal failure of one login exchange.
///
/// Each kind maps to exactly one HTTP status through [`LoginError::status`].
/// The `Display` text is meant for logs, not for the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("secure transport is required")]
    TransportNotSecure,
    #[error("request url cannot be used as a callback: {0}")]
    InvalidRequestUrl(String),
    #[error("no state cookie")]
    MissingStateCookie,
    #[error("state parameter was missing")]
    MissingStateParameter,
    #[error("state parameter invalid")]
    StateMismatch,
    #[error("token endpoint unreachable: {0}")]
    ExchangeTransportFailure(String),
    #[error("token endpoint rejected code (status {status})")]
    ExchangeRejected { status: u16, detail: Option<String> },
    #[error("token verification failed: {0}")]
    TokenVerificationFailure(String),
    #[error("stale token")]
    StaleToken,
}

impl LoginError {
    pub fn status(&self) -> u16 {
        match self {
            LoginError::MissingStateCookie
            | LoginError::MissingStateParameter
            | LoginError::StateMismatch => STATUS_BAD_REQUEST,
            _ => STATUS_FORBIDDEN,
        }
    }
}

/// Why no authorization redirect could be built for a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedirectError {
    #[error("insecure request and no confidential port configured")]
    NoConfidentialPort,
    #[error("request url {url} is not usable: {reason}")]
    InvalidRequestUrl { url: String, reason: String },
}

impl From<RedirectError> for LoginError {
    fn from(err: RedirectError) -> Self {
        match err {
            RedirectError::NoConfidentialPort => LoginError::TransportNotSecure,
            RedirectError::InvalidRequestUrl { url, .. } => LoginError::InvalidRequestUrl(url),
        }
    }
}

/// Failure reported by a [`crate::TokenEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("token endpoint returned {status}")]
    Http { status: u16, error: Option<String> },
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Transport(err.to_string())
    }
}

impl From<ExchangeError> for LoginError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Http { status, error } => LoginError::ExchangeRejected {
                status,
                detail: error,
            },
            ExchangeError::Transport(msg) => LoginError::ExchangeTransportFailure(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct VerificationError(pub String);

impl From<jsonwebtoken::errors::Error> for VerificationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        VerificationError(err.to_string())
    }
}

impl From<VerificationError> for LoginError {
    fn from(err: VerificationError) -> Self {
        LoginError::TokenVerificationFailure(err.0)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid key material: {0}")]
    Key(String),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
