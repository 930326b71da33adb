//! Request routing
//!
//! The route table is built once from configuration and never mutated, so
//! it is shared between connection tasks without locking. Resolution maps a
//! request path (and its `Referer`) to the route that governs it.

pub mod resolver;
pub mod table;

pub use resolver::{MatchStrategy, Resolution, resolve};
pub use table::{Route, RouteTable};
