//! Gateway configuration
//!
//! The configuration is read once from a YAML file, validated, and then
//! passed by reference to every component constructor. Nothing reads it
//! ambiently after startup.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Minimum length of the session signing key in bytes
pub const MIN_SESSION_KEY_LEN: usize = 32;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_LOGIN_PATH: &str = "/login";
const DEFAULT_VALIDATE_PATH: &str = "/p3/serviceValidate";
const DEFAULT_LOGOUT_PATH: &str = "/cas2/logout";

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.to_string()
}

fn default_validate_path() -> String {
    DEFAULT_VALIDATE_PATH.to_string()
}

fn default_logout_path() -> String {
    DEFAULT_LOGOUT_PATH.to_string()
}

fn default_cas_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_fallback_to_first_route() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cas: CasConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub session_key: String,
    /// Mark the session cookie `Secure`; enable when clients reach the gateway over TLS
    #[serde(default)]
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CasConfig {
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_validate_path")]
    pub validate_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    /// Ask for `format=json` and decode with the JSON codec instead of XML
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_cas_timeout_secs")]
    pub timeout_secs: u64,
}

impl CasConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Send requests no route claims to the first configured route instead of 404
    #[serde(default = "default_fallback_to_first_route")]
    pub fallback_to_first_route: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            fallback_to_first_route: default_fallback_to_first_route(),
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// One backend mapping: requests under `path` go to `target`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub path: String,
    pub target: String,
    /// Backend authenticates by itself; the gateway forwards without a session
    #[serde(default)]
    pub skip_auth: bool,
}

impl RouteConfig {
    pub fn new(name: impl Into<String>, path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            target: target.into(),
            skip_auth: false,
        }
    }

    pub fn skip_auth(mut self, skip_auth: bool) -> Self {
        self.skip_auth = skip_auth;
        self
    }
}

impl Config {
    /// Read, parse and validate the configuration file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate configuration from a YAML document
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg: Config = serde_yaml::from_str(raw)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Address the listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn normalize(&mut self) {
        let cas = &mut self.cas;
        cas.base_url = cas.base_url.trim().trim_end_matches('/').to_string();
        if cas.login_path.is_empty() {
            cas.login_path = default_login_path();
        }
        if cas.validate_path.is_empty() {
            cas.validate_path = default_validate_path();
        }
        if cas.logout_path.is_empty() {
            cas.logout_path = default_logout_path();
        }

        for route in &mut self.routes {
            route.path = normalize_route_path(&route.path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        let key_len = self.server.session_key.len();
        if key_len < MIN_SESSION_KEY_LEN {
            return Err(ConfigError::SessionKeyTooShort {
                min: MIN_SESSION_KEY_LEN,
                actual: key_len,
            });
        }

        if self.cas.base_url.is_empty() {
            return Err(ConfigError::MissingCasBaseUrl);
        }
        match url::Url::parse(&self.cas.base_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            Ok(u) => {
                return Err(ConfigError::InvalidCasBaseUrl {
                    url: self.cas.base_url.clone(),
                    reason: format!("unsupported scheme {}", u.scheme()),
                });
            }
            Err(e) => {
                return Err(ConfigError::InvalidCasBaseUrl {
                    url: self.cas.base_url.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if self.routes.is_empty() {
            return Err(ConfigError::NoRoutes);
        }
        validate_routes(&self.routes)
    }
}

/// Trailing slashes are dropped so `/app/` and `/app` name the same route
pub fn normalize_route_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.len() > 1 {
        let stripped = trimmed.trim_end_matches('/');
        if stripped.is_empty() {
            "/".to_string()
        } else {
            stripped.to_string()
        }
    } else {
        trimmed.to_string()
    }
}

/// Checks each route in isolation and the uniqueness of paths across the table
pub fn validate_routes(routes: &[RouteConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for (index, route) in routes.iter().enumerate() {
        let invalid = |reason: String| ConfigError::InvalidRoute { index, reason };

        if route.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if route.path.is_empty() {
            return Err(invalid(format!("path must not be empty ({})", route.name)));
        }
        if !route.path.starts_with('/') {
            return Err(invalid(format!(
                "path {} must start with '/' ({})",
                route.path, route.name
            )));
        }
        if route.target.trim().is_empty() {
            return Err(invalid(format!("target must not be empty ({})", route.name)));
        }
        match url::Url::parse(&route.target) {
            Ok(u) if u.scheme() == "http" && u.host_str().is_some() => {}
            Ok(_) => {
                return Err(invalid(format!(
                    "target {} must be an absolute http:// url ({})",
                    route.target, route.name
                )));
            }
            Err(e) => {
                return Err(invalid(format!(
                    "target {} is not a valid url: {} ({})",
                    route.target, e, route.name
                )));
            }
        }

        if !seen.insert(route.path.as_str()) {
            return Err(ConfigError::DuplicateRoute(route.path.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_route_path_trims_trailing_slashes() {
        assert_eq!(normalize_route_path("/app/"), "/app");
        assert_eq!(normalize_route_path("/app//"), "/app");
        assert_eq!(normalize_route_path("/"), "/");
        assert_eq!(normalize_route_path("//"), "/");
    }

    #[test]
    fn validate_routes_rejects_duplicates() {
        let routes = vec![
            RouteConfig::new("a", "/app", "http://127.0.0.1:3000"),
            RouteConfig::new("b", "/app", "http://127.0.0.1:3001"),
        ];
        assert!(matches!(
            validate_routes(&routes),
            Err(ConfigError::DuplicateRoute(p)) if p == "/app"
        ));
    }
}
