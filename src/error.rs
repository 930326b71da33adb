//! Error types for the gateway
//!
//! Only [`ConfigError`] is fatal, and only at startup. Every other error is
//! per-request and is turned into a response (or into "not authenticated")
//! by the gateway.

use std::time::Duration;
use thiserror::Error;

/// Invalid or unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid server port: {0}")]
    InvalidPort(u16),

    #[error("session_key must be at least {min} bytes (got {actual})")]
    SessionKeyTooShort { min: usize, actual: usize },

    #[error("cas.base_url must not be empty")]
    MissingCasBaseUrl,

    #[error("invalid cas.base_url {url}: {reason}")]
    InvalidCasBaseUrl { url: String, reason: String },

    #[error("at least one route must be configured")]
    NoRoutes,

    #[error("route #{index}: {reason}")]
    InvalidRoute { index: usize, reason: String },

    #[error("duplicate route path: {0}")]
    DuplicateRoute(String),

    #[error("failed to build CAS http client: {0}")]
    HttpClient(String),
}

/// Failures of the CAS protocol client
///
/// All of these degrade to "not authenticated" in the gateway.
#[derive(Debug, Error)]
pub enum CasError {
    #[error("no ticket parameter in url")]
    TicketNotFound,

    #[error("invalid CAS url {0}")]
    InvalidUrl(String),

    #[error("CAS validation request failed: {0}")]
    Transport(String),

    #[error("CAS validation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed CAS XML response: {0}")]
    MalformedXml(String),

    #[error("malformed CAS JSON response: {0}")]
    MalformedJson(String),

    #[error("malformed CAS response: {0}")]
    MalformedResponse(&'static str),

    #[error("CAS authentication failure [{code}]: {description}")]
    AuthenticationFailure { code: String, description: String },
}

/// Reasons a session cookie is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session cookie is not in payload.signature form")]
    Format,

    #[error("session cookie is not valid base64")]
    Encoding,

    #[error("session cookie signature mismatch")]
    Signature,

    #[error("session payload could not be decoded: {0}")]
    Payload(String),

    #[error("session expired")]
    Expired,
}

/// Failures talking to a backend
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid backend url: {0}")]
    InvalidTarget(String),

    #[error("failed to connect to backend {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}
