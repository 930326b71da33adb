//! Central Authentication Service (CAS) support
//!
//! [`CasProvider`] implements [`crate::auth::AuthProvider`] against a CAS
//! server; [`response`] holds the XML and JSON validation codecs.

pub mod provider;
pub mod response;

pub use provider::CasProvider;
pub use response::{Attributes, CasResponse, ResponseFormat};
