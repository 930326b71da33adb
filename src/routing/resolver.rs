//! Route resolution with escalating fallbacks
//!
//! Strategies are tried in order and the first hit wins:
//!
//! 1. longest route prefix containing the request path at a `/` boundary
//! 2. the same rule applied to the path of the `Referer` header
//! 3. longest route prefix that is a plain leading substring of the path
//! 4. the first configured route
//!
//! Steps 2 and 3 exist because proxied applications reference absolute
//! asset paths (`/static/...`) that do not live under the gateway prefix.

use crate::routing::table::{Route, RouteTable};
use std::fmt;

/// Which strategy produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Path,
    Referer,
    LoosePrefix,
    Fallback,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchStrategy::Path => "path",
            MatchStrategy::Referer => "referer",
            MatchStrategy::LoosePrefix => "loose-prefix",
            MatchStrategy::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    pub route: &'a Route,
    pub strategy: MatchStrategy,
}

/// Picks the route governing a request; `None` only for an empty table
pub fn resolve<'a>(
    table: &'a RouteTable,
    request_path: &str,
    referer: Option<&str>,
) -> Option<Resolution<'a>> {
    if let Some(route) = table.longest_match(request_path) {
        return Some(Resolution { route, strategy: MatchStrategy::Path });
    }

    if let Some(referer_path) = referer.and_then(referer_path) {
        if let Some(route) = table.longest_match(&referer_path) {
            return Some(Resolution { route, strategy: MatchStrategy::Referer });
        }
    }

    if let Some(route) = table.longest_loose_match(request_path) {
        return Some(Resolution { route, strategy: MatchStrategy::LoosePrefix });
    }

    // Order-dependent last resort
    table.first().map(|route| Resolution {
        route,
        strategy: MatchStrategy::Fallback,
    })
}

fn referer_path(referer: &str) -> Option<String> {
    let referer = referer.trim();
    if referer.is_empty() {
        return None;
    }

    match url::Url::parse(referer) {
        Ok(url) => Some(url.path().to_string()),
        Err(_) if referer.starts_with('/') => {
            let end = referer.find(['?', '#']).unwrap_or(referer.len());
            Some(referer[..end].to_string())
        }
        Err(_) => None,
    }
}
