//! Database module
//!
//! Postgres persistence for accounts, conversations and messages. The
//! operations type implements the chat collaborator traits so the hub can
//! run against it directly.

pub mod operations;

pub use operations::{DbOperations, DbPoolStatus};
