//! CAS protocol client

use crate::auth::cas::response::ResponseFormat;
use crate::auth::{AuthProvider, UserInfo, request_scheme};
use crate::config::CasConfig;
use crate::error::{CasError, ConfigError};
use crate::http::request::Request;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;
use url::form_urlencoded;

/// Talks to one CAS server
#[derive(Debug, Clone)]
pub struct CasProvider {
    base_url: String,
    login_path: String,
    validate_path: String,
    logout_path: String,
    format: ResponseFormat,
    timeout: Duration,
    client: reqwest::Client,
}

impl CasProvider {
    pub fn new(config: &CasConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
            validate_path: config.validate_path.clone(),
            logout_path: config.logout_path.clone(),
            format: ResponseFormat::from_use_json(config.use_json),
            timeout: config.timeout(),
            client,
        })
    }

    pub fn format(&self) -> ResponseFormat {
        self.format
    }

    /// `{base}{validate_path}?ticket=..&service=..[&format=json]`
    pub fn validation_url(&self, ticket: &str, service_url: &str) -> Result<Url, CasError> {
        let endpoint = format!("{}{}", self.base_url, self.validate_path);
        let mut params = vec![("ticket", ticket), ("service", service_url)];
        if self.format == ResponseFormat::Json {
            params.push(("format", "json"));
        }
        set_query_params(&endpoint, &params).map_err(|_| CasError::InvalidUrl(endpoint))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> CasError {
        if err.is_timeout() {
            CasError::Timeout(self.timeout)
        } else {
            CasError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl AuthProvider for CasProvider {
    fn login_url(&self, service_url: &str) -> String {
        let endpoint = format!("{}{}", self.base_url, self.login_path);
        with_service(&endpoint, service_url)
    }

    async fn validate_ticket(&self, ticket: &str, service_url: &str) -> Result<UserInfo, CasError> {
        let url = self.validation_url(ticket, service_url)?;
        tracing::debug!(url = %url, "Validating CAS ticket");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            // CAS servers still put the failure document in the body
            tracing::debug!(status = status.as_u16(), "CAS validation returned non-success status");
        }

        let decoded = self.format.decode(&body)?;
        self.format.user_info(decoded)
    }

    fn extract_ticket(&self, url: &str) -> Result<String, CasError> {
        let query = url
            .split_once('?')
            .map(|(_, q)| q.split('#').next().unwrap_or_default())
            .ok_or(CasError::TicketNotFound)?;

        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "ticket")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
            .ok_or(CasError::TicketNotFound)
    }

    fn service_url(&self, request: &Request, path: &str) -> String {
        let host = request.host().unwrap_or_default();
        format!("{}://{}{}", request_scheme(request), host, path)
    }

    fn logout_url(&self, service: &str) -> String {
        let endpoint = format!("{}{}", self.base_url, self.logout_path);
        with_service(&endpoint, service)
    }
}

fn with_service(endpoint: &str, service: &str) -> String {
    match set_query_params(endpoint, &[("service", service)]) {
        Ok(url) => url.to_string(),
        Err(_) => {
            let encoded: String = form_urlencoded::byte_serialize(service.as_bytes()).collect();
            format!("{endpoint}?service={encoded}")
        }
    }
}

/// Sets query parameters on `endpoint`, replacing same-named ones and
/// keeping the rest of any existing query.
pub fn set_query_params(endpoint: &str, params: &[(&str, &str)]) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(endpoint)?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|&(name, _)| name == k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .extend_pairs(params.iter().copied());

    Ok(url)
}
