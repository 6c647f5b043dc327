//! Authentication module
//!
//! Token issuance and verification, plus the password-less login and
//! registration endpoints that hand tokens out.

pub mod handlers;
mod service;

pub use service::{Claims, TokenService};
