//! Upstream connection and request forwarding
//!
//! This module handles connecting to backend servers and forwarding
//! HTTP requests/responses. Each request is attempted exactly once: request
//! bodies are not assumed to be replayable.

use crate::error::ForwardError;
use crate::http::headers::Headers;
use crate::http::parser::{ParseError, decode_chunked};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::config::ProxyConfig;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Upper bound for a backend's status line plus headers
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

/// Value of the `X-Forwarded-By` header
pub const FORWARDED_BY: &str = "cas-gateway";

/// Connection-scoped headers that never cross the proxy
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "Upgrade",
    "TE",
    "Trailer",
];

/// Forwards requests to backend servers
#[derive(Debug, Clone)]
pub struct Forwarder {
    /// Connection timeout duration
    connection_timeout: Duration,

    /// Request timeout duration (write request + read full response)
    request_timeout: Duration,
}

impl Forwarder {
    /// Create a new forwarder
    pub fn new(connection_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            request_timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.connect_timeout(), config.request_timeout())
    }

    /// Forward `request` to `target`, removing `strip_prefix` from its path.
    ///
    /// Failures become 502/504 responses; this never returns an error.
    pub async fn forward(&self, request: &Request, target: &Url, strip_prefix: Option<&str>) -> Response {
        let outbound = rewrite_request(request, target, strip_prefix);

        tracing::debug!(
            backend = %target,
            method = request.method.as_str(),
            path = %request.path,
            upstream_path = %outbound.path,
            "Forwarding request to backend"
        );

        match self.send(&outbound, target).await {
            Ok(response) => {
                tracing::info!(
                    backend = %target,
                    status = response.status.as_u16(),
                    method = request.method.as_str(),
                    path = %request.path,
                    "Request forwarded"
                );
                response
            }
            Err(e) => {
                tracing::warn!(
                    backend = %target,
                    error = %e,
                    method = request.method.as_str(),
                    path = %request.path,
                    "Failed to proxy request to backend"
                );
                self.handle_proxy_error(&e)
            }
        }
    }

    /// Send an already rewritten request to a backend
    pub async fn send(&self, request: &Request, backend_url: &Url) -> Result<Response, ForwardError> {
        let host = backend_url
            .host_str()
            .ok_or_else(|| ForwardError::InvalidTarget(backend_url.to_string()))?;
        let port = backend_url.port_or_known_default().unwrap_or(80);
        let addr = format!("{}:{}", host, port);

        // Connect to backend with timeout
        let stream = timeout(self.connection_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ForwardError::Timeout(self.connection_timeout))?
            .map_err(|source| ForwardError::Connect {
                addr: addr.clone(),
                source,
            })?;

        tracing::trace!(backend = %addr, "Connected to backend");

        // Forward request and get response with timeout
        timeout(
            self.request_timeout,
            self.send_request_and_receive_response(stream, request, backend_url),
        )
        .await
        .map_err(|_| ForwardError::Timeout(self.request_timeout))?
    }

    /// Send request to backend and receive response
    async fn send_request_and_receive_response(
        &self,
        mut stream: TcpStream,
        request: &Request,
        backend_url: &Url,
    ) -> Result<Response, ForwardError> {
        let request_bytes = self.build_http_request(request, backend_url);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        tracing::trace!("Request sent to backend");

        self.read_http_response(&mut stream, request.method).await
    }

    /// Build HTTP request bytes to send to backend
    ///
    /// Public so the wire format can be checked without a backend.
    pub fn build_http_request(&self, request: &Request, backend_url: &Url) -> Vec<u8> {
        let mut buffer = Vec::new();

        let path = if request.path.is_empty() {
            "/"
        } else {
            &request.path
        };

        buffer.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", request.method.as_str(), path).as_bytes(),
        );

        let mut headers = request.headers.clone();

        // Set/update Host header to backend host
        if let Some(host) = backend_url.host_str() {
            let host_value = match backend_url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            headers.insert("Host", host_value);
        }

        remove_hop_by_hop(&mut headers);
        // The full body is already buffered
        headers.remove("Expect");

        if !request.body.is_empty() || headers.contains("Content-Length") {
            headers.insert("Content-Length", request.body.len().to_string());
        }

        // One request per upstream connection
        headers.insert("Connection", "close");

        for (key, value) in headers.iter() {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&request.body);

        buffer
    }

    /// Read HTTP response from backend
    async fn read_http_response(
        &self,
        stream: &mut TcpStream,
        method: Method,
    ) -> Result<Response, ForwardError> {
        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

        loop {
            // Check if we've received complete headers (look for \r\n\r\n)
            if let Some(headers_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = buffer.split_to(headers_end + 4);
                let (status, reason, mut headers) = parse_response_head(&head)?;

                // Interim responses (100 Continue, 103 Early Hints) precede the real one
                if status.as_u16() / 100 == 1 && status.as_u16() != 101 {
                    continue;
                }

                let bodyless = method == Method::HEAD || status.is_bodyless();
                let body = if bodyless {
                    Vec::new()
                } else {
                    read_response_body(stream, &mut buffer, &headers).await?
                };

                remove_hop_by_hop(&mut headers);
                if !bodyless {
                    headers.insert("Content-Length", body.len().to_string());
                }

                return Ok(ResponseBuilder::new(status)
                    .reason(reason)
                    .headers(headers)
                    .body(body)
                    .build());
            }

            // Prevent unbounded header growth
            if buffer.len() > MAX_RESPONSE_HEAD {
                return Err(ForwardError::InvalidResponse(
                    "response headers too large".to_string(),
                ));
            }

            let n = stream.read_buf(&mut buffer).await?;
            if n == 0 {
                return Err(ForwardError::InvalidResponse(
                    "connection closed before complete response received".to_string(),
                ));
            }
        }
    }

    /// Map a forwarding failure to the response the client sees
    pub fn handle_proxy_error(&self, error: &ForwardError) -> Response {
        match error {
            ForwardError::Timeout(_) => Response::gateway_timeout(),
            _ => Response::bad_gateway(),
        }
    }
}

/// Parse status line and headers of a backend response
fn parse_response_head(head: &[u8]) -> Result<(StatusCode, String, Headers), ForwardError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| ForwardError::InvalidResponse("invalid UTF-8 in response headers".to_string()))?;

    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ForwardError::InvalidResponse("empty response".to_string()))?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ForwardError::InvalidResponse(format!(
            "invalid status line: {}",
            status_line
        )));
    }

    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(StatusCode::from_u16)
        .ok_or_else(|| ForwardError::InvalidResponse(format!("invalid status line: {}", status_line)))?;
    let reason = parts
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| status.reason_phrase().to_string());

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.append(key.trim(), value.trim());
        }
    }

    Ok((status, reason, headers))
}

/// Read the response body by Content-Length, chunked framing, or until close
async fn read_response_body(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    headers: &Headers,
) -> Result<Vec<u8>, ForwardError> {
    let chunked = headers
        .get("Transfer-Encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));

    if chunked {
        loop {
            match decode_chunked(&buffer[..]) {
                Ok((body, _)) => return Ok(body),
                Err(ParseError::Incomplete) => {}
                Err(e) => {
                    return Err(ForwardError::InvalidResponse(format!(
                        "invalid chunked body: {:?}",
                        e
                    )));
                }
            }
            if stream.read_buf(buffer).await? == 0 {
                return Err(ForwardError::InvalidResponse(
                    "connection closed inside chunked body".to_string(),
                ));
            }
        }
    }

    if let Some(cl) = headers.get("Content-Length") {
        let content_length: usize = cl
            .trim()
            .parse()
            .map_err(|_| ForwardError::InvalidResponse(format!("invalid Content-Length: {}", cl)))?;

        while buffer.len() < content_length {
            if stream.read_buf(buffer).await? == 0 {
                return Err(ForwardError::InvalidResponse(
                    "connection closed before complete body received".to_string(),
                ));
            }
        }
        return Ok(buffer.split_to(content_length).to_vec());
    }

    // No framing: the body runs until the backend closes
    while stream.read_buf(buffer).await? != 0 {}
    Ok(buffer.split().to_vec())
}

fn remove_hop_by_hop(headers: &mut Headers) {
    // Headers named by Connection are hop-by-hop too
    let listed: Vec<String> = headers
        .get_all("Connection")
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed {
        headers.remove(&name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Remove a route prefix from `path`; an empty result becomes `/`.
///
/// Paths outside the prefix are returned unchanged.
pub fn strip_route_prefix(path: &str, prefix: &str) -> String {
    if prefix.is_empty() || prefix == "/" {
        return if path.is_empty() { "/".to_string() } else { path.to_string() };
    }
    match path.strip_prefix(prefix) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

/// Join the target's base path and the request path with exactly one slash
fn join_paths(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return path.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// The request as the backend should see it.
///
/// Builds a new value from the original; the inbound request is not
/// modified, so forwarding twice from the same request is safe.
pub fn rewrite_request(request: &Request, target: &Url, strip_prefix: Option<&str>) -> Request {
    let path = match strip_prefix {
        Some(prefix) => strip_route_prefix(request.uri_path(), prefix),
        None => request.uri_path().to_string(),
    };
    let path = join_paths(target.path(), &path);
    let path = match request.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    let mut headers = request.headers.clone();
    headers.insert("X-Forwarded-By", FORWARDED_BY);
    if let Some(host) = request.host() {
        headers.insert("X-Forwarded-Host", host);
    }
    headers.insert("X-Forwarded-Proto", crate::auth::request_scheme(request));
    if let Some(addr) = request.remote_addr {
        let forwarded_for = match request.header("X-Forwarded-For") {
            Some(prior) if !prior.trim().is_empty() => format!("{}, {}", prior, addr.ip()),
            _ => addr.ip().to_string(),
        };
        headers.insert("X-Forwarded-For", forwarded_for);
    }

    Request {
        method: request.method,
        path,
        version: request.version.clone(),
        headers,
        body: request.body.clone(),
        remote_addr: request.remote_addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_paths_uses_one_slash() {
        assert_eq!(join_paths("/", "/x"), "/x");
        assert_eq!(join_paths("/base", "/x"), "/base/x");
        assert_eq!(join_paths("/base/", "/x"), "/base/x");
        assert_eq!(join_paths("", "/x"), "/x");
    }

    #[test]
    fn parse_response_head_keeps_unknown_status() {
        let (status, reason, headers) =
            parse_response_head(b"HTTP/1.1 418 I'm a teapot\r\nX-A: 1\r\n\r\n").unwrap();
        assert_eq!(status.as_u16(), 418);
        assert_eq!(reason, "I'm a teapot");
        assert_eq!(headers.get("x-a"), Some("1"));
    }
}
