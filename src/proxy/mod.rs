//! Reverse proxy functionality
//!
//! Rewrites a request for its backend and relays the backend's answer.
//! Which backend, and under which identity, is decided by the gateway.

pub mod upstream;

pub use upstream::{Forwarder, rewrite_request, strip_route_prefix};
