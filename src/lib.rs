//! CAS Gateway - authenticating reverse proxy
//!
//! Fronts HTTP backends with CAS single sign-on: unauthenticated visitors
//! are sent to the CAS login page, returning service tickets are validated,
//! and authenticated requests are forwarded with identity headers.

pub mod args;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod proxy;
pub mod routing;
pub mod server;

pub use config::Config;
pub use gateway::Gateway;
