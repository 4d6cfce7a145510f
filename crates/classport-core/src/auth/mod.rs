//! Session and credential management.
//!
//! This module provides:
//! - `SessionManager`: credential renewal, logout, and session teardown
//! - `CredentialStore`: durable per-role credential storage with in-memory,
//!   file, and OS keychain backends
//!
//! Sessions end either by explicit logout or when a renewal fails; both
//! leave the store empty and broadcast a teardown signal.

pub mod session;
pub mod store;

pub use session::{SessionEnd, SessionManager};
pub use store::{CredentialPair, CredentialStore};
