//! Authentication
//!
//! The gateway only talks to an identity provider through [`AuthProvider`].
//! One concrete provider, [`cas::CasProvider`], is built at startup and
//! injected into the gateway.

pub mod cas;
pub mod session;

use crate::error::CasError;
use crate::http::request::Request;
use async_trait::async_trait;
use std::collections::HashMap;

pub use session::{Session, SessionCodec};

/// Identity returned by a successful ticket validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    /// Subject identifier forwarded as `X-User`
    pub oaid: String,
    /// Display name forwarded as `X-Employee-Name`
    pub employee_name: Option<String>,
    /// Every attribute the provider released
    pub extra: HashMap<String, Vec<String>>,
}

/// Capabilities the gateway needs from an identity provider
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// URL that starts a login for `service_url`
    fn login_url(&self, service_url: &str) -> String;

    /// Exchanges a one-time ticket for an identity
    async fn validate_ticket(&self, ticket: &str, service_url: &str) -> Result<UserInfo, CasError>;

    /// Value of the `ticket` query parameter of `url`
    fn extract_ticket(&self, url: &str) -> Result<String, CasError>;

    /// `url` is a login callback, i.e. carries a `ticket` parameter
    fn is_callback(&self, url: &str) -> bool {
        self.extract_ticket(url).is_ok()
    }

    /// Absolute URL of `path` as the client sees the gateway
    fn service_url(&self, request: &Request, path: &str) -> String;

    /// URL that ends the provider-side single sign-on session
    fn logout_url(&self, service: &str) -> String;
}

/// Scheme the client used to reach the gateway
///
/// The gateway does not terminate TLS itself, so this relies on a fronting
/// proxy setting `X-Forwarded-Proto`.
pub fn request_scheme(request: &Request) -> &'static str {
    let proto = request
        .header("X-Forwarded-Proto")
        .and_then(|v| v.split(',').next())
        .map(str::trim);

    match proto {
        Some(p) if p.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    }
}
