//! Service URL handed to the CAS logout endpoint

use crate::auth::request_scheme;
use crate::http::request::Request;
use url::form_urlencoded;

/// Where CAS should send the browser after logging out.
///
/// Taken from `Origin`, else `Referer`, else the gateway's own origin. When
/// the chosen value carries its own `?service=` parameter (a page reached
/// through a CAS redirect) that inner service is used instead.
pub fn logout_service(request: &Request) -> String {
    let non_empty = |name: &str| request.header(name).map(str::trim).filter(|v| !v.is_empty());

    let candidate = non_empty("Origin")
        .or_else(|| non_empty("Referer"))
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "{}://{}",
                request_scheme(request),
                request.host().unwrap_or_default()
            )
        });

    match candidate.split_once("?service=") {
        Some((_, rest)) => form_urlencoded::parse(format!("service={rest}").as_bytes())
            .find(|(k, _)| k == "service")
            .map(|(_, v)| v.into_owned())
            .unwrap_or(candidate.clone()),
        None => candidate,
    }
}
