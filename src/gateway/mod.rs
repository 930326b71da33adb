//! Authenticating gateway
//!
//! Every request walks the same sequence of states; the first one that
//! applies produces the response:
//!
//! ```text
//!   S0  /health, /logout ............ own handlers, no routing or auth
//!   S1  resolve route ............... empty table -> 404
//!   S2  static asset ................ forward full path, no auth
//!   S3  skip_auth route ............. forward, prefix stripped, no session
//!   S4  authenticated session ....... inject X-User / X-Employee-Name, forward
//!   S5  ?ticket= callback ........... validate, set session, redirect clean URL
//!   S6  otherwise ................... redirect to CAS login
//! ```
//!
//! A failed ticket validation in S5 falls through to S6; CAS errors are
//! logged and never shown to the client.

pub mod logout;

use crate::auth::cas::CasProvider;
use crate::auth::{AuthProvider, Session, SessionCodec};
use crate::config::Config;
use crate::error::ConfigError;
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::Forwarder;
use crate::routing::{MatchStrategy, Resolution, RouteTable, resolve};
use std::sync::Arc;
use url::form_urlencoded;

pub const HEALTH_PATH: &str = "/health";
pub const LOGOUT_PATH: &str = "/logout";

/// Identity headers only the gateway may set
pub const USER_HEADER: &str = "X-User";
pub const EMPLOYEE_NAME_HEADER: &str = "X-Employee-Name";

/// Extensions served without authentication
const STATIC_EXTENSIONS: &[&str] = &[
    "ico", "jpg", "jpeg", "png", "gif", "svg", "js", "css", "swf", "eot", "ttf", "otf", "woff",
    "woff2",
];

/// Whether `path` names a static asset by its extension
pub fn is_static_asset(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((_, ext)) => STATIC_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// The per-request state machine plus everything it needs
pub struct Gateway {
    routes: RouteTable,
    provider: Arc<dyn AuthProvider>,
    sessions: SessionCodec,
    forwarder: Forwarder,
    fallback_to_first_route: bool,
}

impl Gateway {
    pub fn new(
        routes: RouteTable,
        provider: Arc<dyn AuthProvider>,
        sessions: SessionCodec,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            routes,
            provider,
            sessions,
            forwarder,
            fallback_to_first_route: true,
        }
    }

    /// Answer 404 instead of using the first route when nothing else matches
    pub fn with_route_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_first_route = enabled;
        self
    }

    /// Build the gateway with a CAS provider from `config`
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let provider = CasProvider::new(&config.cas)?;
        Self::with_provider(config, Arc::new(provider))
    }

    /// Build the gateway from `config` around an existing provider
    pub fn with_provider(
        config: &Config,
        provider: Arc<dyn AuthProvider>,
    ) -> Result<Self, ConfigError> {
        let routes = RouteTable::new(config.routes.clone())?;
        let sessions = SessionCodec::from_config(&config.server)?;
        let forwarder = Forwarder::from_config(&config.proxy);

        Ok(Self::new(routes, provider, sessions, forwarder)
            .with_route_fallback(config.proxy.fallback_to_first_route))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn sessions(&self) -> &SessionCodec {
        &self.sessions
    }

    /// Produce the response for one request
    pub async fn handle(&self, mut request: Request) -> Response {
        let path = request.uri_path().to_string();
        tracing::info!(
            method = request.method.as_str(),
            path = %request.path,
            remote = ?request.remote_addr,
            "Request"
        );

        // S0
        match path.as_str() {
            HEALTH_PATH => return Response::ok("OK"),
            LOGOUT_PATH => return self.logout(&request),
            _ => {}
        }

        // Clients never get to choose their own identity
        request.headers.remove(USER_HEADER);
        request.headers.remove(EMPLOYEE_NAME_HEADER);

        // S1
        let Some(Resolution { route, strategy }) =
            resolve(&self.routes, &path, request.header("Referer"))
        else {
            tracing::warn!(path = %path, "No routes configured");
            return Response::not_found();
        };

        if strategy == MatchStrategy::Fallback && !self.fallback_to_first_route {
            tracing::info!(path = %path, "No route matched");
            return Response::not_found();
        }

        tracing::debug!(
            route = route.name(),
            prefix = route.path(),
            backend = %route.target(),
            strategy = %strategy,
            "Route resolved"
        );

        // S2
        if is_static_asset(&path) {
            tracing::debug!(route = route.name(), path = %path, "Static asset, forwarding without auth");
            return self.forwarder.forward(&request, route.target(), None).await;
        }

        // S3
        if route.skip_auth() {
            tracing::debug!(route = route.name(), "Route skips authentication");
            return self
                .forwarder
                .forward(&request, route.target(), Some(route.path()))
                .await;
        }

        // S4
        let session = self.sessions.read(&request).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Ignoring invalid session cookie");
            Session::default()
        });

        if session.authenticated {
            if !session.oaid.is_empty() {
                request.headers.insert(USER_HEADER, session.oaid.as_str());
                if let Some(name) = session.employee_name.as_deref().filter(|n| !n.is_empty()) {
                    request.headers.insert(EMPLOYEE_NAME_HEADER, name);
                }
            }
            tracing::debug!(user = %session.oaid, path = %path, "Authenticated request");
            return self
                .forwarder
                .forward(&request, route.target(), Some(route.path()))
                .await;
        }

        // S5
        if self.provider.is_callback(&request.path) {
            if let Some(response) = self.complete_login(&request).await {
                return response;
            }
        }

        // S6
        let service_url = self.provider.service_url(&request, &path);
        let login_url = self.provider.login_url(&service_url);
        tracing::info!(login_url = %login_url, "Unauthenticated, redirecting to login");
        Response::redirect(login_url)
    }

    /// Validate the callback ticket and establish the session.
    ///
    /// `None` means the login could not be completed and the request should
    /// be treated as unauthenticated.
    async fn complete_login(&self, request: &Request) -> Option<Response> {
        let ticket = match self.provider.extract_ticket(&request.path) {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::debug!(error = %e, "Callback without usable ticket");
                return None;
            }
        };

        let service_url = self.provider.service_url(request, request.uri_path());
        let user = match self.provider.validate_ticket(&ticket, &service_url).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, service = %service_url, "Ticket validation failed");
                return None;
            }
        };

        let cookie = match self.sessions.set_cookie(&Session::for_user(&user)) {
            Ok(cookie) => cookie,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode session");
                return None;
            }
        };

        let location = without_query_param(request, "ticket");
        tracing::info!(user = %user.oaid, location = %location, "Authentication succeeded");

        Some(
            ResponseBuilder::new(StatusCode::FOUND)
                .header("Location", location)
                .append_header("Set-Cookie", cookie)
                .build(),
        )
    }

    /// Clear the local session and hand over to the CAS logout endpoint
    fn logout(&self, request: &Request) -> Response {
        let service = logout::logout_service(request);
        let location = self.provider.logout_url(&service);
        tracing::info!(location = %location, "Logout");

        ResponseBuilder::new(StatusCode::FOUND)
            .header("Location", location)
            .append_header("Set-Cookie", self.sessions.clear_cookie())
            .build()
    }
}

/// Request path plus its query, minus every `name` parameter
pub fn without_query_param(request: &Request, name: &str) -> String {
    let path = request.uri_path();
    let Some(query) = request.query() else {
        return path.to_string();
    };

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0;
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        if k != name {
            serializer.append_pair(&k, &v);
            kept += 1;
        }
    }

    if kept == 0 {
        path.to_string()
    } else {
        format!("{}?{}", path, serializer.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_asset_extensions() {
        assert!(is_static_asset("/app/logo.png"));
        assert!(is_static_asset("/static/js/main.js"));
        assert!(is_static_asset("/fonts/a.woff2"));
        assert!(!is_static_asset("/app/index.html"));
        assert!(!is_static_asset("/app/api"));
        assert!(!is_static_asset("/app.v2/api"));
        assert!(!is_static_asset("/app/LOGO.PNG"));
    }
}
