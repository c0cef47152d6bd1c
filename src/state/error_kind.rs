//! Fetch outcome taxonomy
//!
//! `ErrorKind` classifies why one attempt at a work item did not succeed. It is
//! a value carried through the scheduler and retry policy, separate from the
//! infrastructure errors in [`crate::HarvestError`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The fetch did not finish within the fetch timeout
    Timeout,
    /// Connection refused, reset, DNS or TLS failure
    ConnectionError,
    /// HTTP 4xx (other than 429) with its status code
    HttpClientError(u16),
    /// HTTP 5xx with its status code
    HttpServerError(u16),
    /// HTTP 429 or rate-governor denial
    RateLimited,
    /// All credentials for the domain stayed leased past the acquisition timeout
    LeaseUnavailable,
    /// The fetch succeeded but the content was unusable or a pipeline stage rejected it
    ContentError,
    /// No credential that could ever be issued exists for the domain
    NoCredentialAvailable,
}

impl ErrorKind {
    /// Classifies a non-success HTTP status
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimited),
            400..=499 => Some(Self::HttpClientError(status)),
            500..=599 => Some(Self::HttpServerError(status)),
            _ => None,
        }
    }

    /// Returns true for a client error that counts against the credential used
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::HttpClientError(_))
    }

    pub fn to_db_string(&self) -> String {
        match self {
            Self::Timeout => "timeout".to_string(),
            Self::ConnectionError => "connection_error".to_string(),
            Self::HttpClientError(code) => format!("http_client_error:{}", code),
            Self::HttpServerError(code) => format!("http_server_error:{}", code),
            Self::RateLimited => "rate_limited".to_string(),
            Self::LeaseUnavailable => "lease_unavailable".to_string(),
            Self::ContentError => "content_error".to_string(),
            Self::NoCredentialAvailable => "no_credential_available".to_string(),
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        if let Some(code) = s.strip_prefix("http_client_error:") {
            return code.parse().ok().map(Self::HttpClientError);
        }
        if let Some(code) = s.strip_prefix("http_server_error:") {
            return code.parse().ok().map(Self::HttpServerError);
        }
        match s {
            "timeout" => Some(Self::Timeout),
            "connection_error" => Some(Self::ConnectionError),
            "rate_limited" => Some(Self::RateLimited),
            "lease_unavailable" => Some(Self::LeaseUnavailable),
            "content_error" => Some(Self::ContentError),
            "no_credential_available" => Some(Self::NoCredentialAvailable),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
