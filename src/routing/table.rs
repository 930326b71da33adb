//! Static route table

use crate::config::{RouteConfig, normalize_route_path, validate_routes};
use crate::error::ConfigError;
use url::Url;

/// A configured route with its target already parsed
#[derive(Debug, Clone)]
pub struct Route {
    config: RouteConfig,
    target: Url,
}

impl Route {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Path prefix this route owns (no trailing slash)
    pub fn path(&self) -> &str {
        &self.config.path
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn skip_auth(&self) -> bool {
        self.config.skip_auth
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    /// `path` is the route prefix itself or nested under it at a `/` boundary
    pub fn matches(&self, path: &str) -> bool {
        let prefix = self.path();
        match path.strip_prefix(prefix) {
            Some("") => true,
            Some(rest) => rest.starts_with('/') || prefix.ends_with('/'),
            None => false,
        }
    }

    /// `path` merely starts with the route prefix, no boundary required
    pub fn matches_loosely(&self, path: &str) -> bool {
        path.starts_with(self.path())
    }
}

/// Ordered, read-only set of routes
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Builds the table, normalizing paths and rejecting invalid or duplicate routes.
    ///
    /// An empty list is accepted here; requiring at least one route is a
    /// configuration-level rule.
    pub fn new(configs: Vec<RouteConfig>) -> Result<Self, ConfigError> {
        let configs: Vec<RouteConfig> = configs
            .into_iter()
            .map(|mut c| {
                c.path = normalize_route_path(&c.path);
                c
            })
            .collect();

        validate_routes(&configs)?;

        let routes = configs
            .into_iter()
            .enumerate()
            .map(|(index, config)| {
                let target = Url::parse(&config.target).map_err(|e| ConfigError::InvalidRoute {
                    index,
                    reason: e.to_string(),
                })?;
                Ok(Route { config, target })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn first(&self) -> Option<&Route> {
        self.routes.first()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Most specific route whose prefix contains `path` at a segment boundary
    pub fn longest_match(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|r| r.matches(path))
            .max_by_key(|r| r.path().len())
    }

    /// Most specific route whose prefix is a plain leading substring of `path`
    pub fn longest_loose_match(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|r| r.matches_loosely(path))
            .max_by_key(|r| r.path().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(vec![
            RouteConfig::new("app", "/app", "http://127.0.0.1:3000"),
            RouteConfig::new("admin", "/app/admin/", "http://127.0.0.1:3001"),
        ])
        .unwrap()
    }

    #[test]
    fn paths_are_normalized_on_build() {
        assert_eq!(table().routes()[1].path(), "/app/admin");
    }

    #[test]
    fn match_requires_segment_boundary() {
        let t = table();
        let app = &t.routes()[0];
        assert!(app.matches("/app"));
        assert!(app.matches("/app/x"));
        assert!(!app.matches("/application"));
        assert!(app.matches_loosely("/application"));
    }

    #[test]
    fn root_route_matches_everything_under_it() {
        let t = RouteTable::new(vec![RouteConfig::new("root", "/", "http://127.0.0.1:3000")])
            .unwrap();
        assert!(t.routes()[0].matches("/"));
        assert!(t.routes()[0].matches("/anything"));
    }
}
