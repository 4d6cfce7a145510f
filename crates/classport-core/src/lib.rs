//! Core library for the Classport portal client.
//!
//! Classport front ends (one per user role) talk to the portal API through
//! the authenticated request pipeline in this crate. The pipeline attaches
//! the access credential to every call under the role's protected
//! namespaces, renews an expired credential exactly once per call behind a
//! shared in-flight exchange, replays the failed call, and tears the
//! session down when renewal is impossible, signaling the application to
//! return to the login surface.
//!
//! The pieces are wired by dependency injection: the `Transport` and
//! `CredentialStore` seams let embedding code choose the HTTP engine and the
//! storage backend, and let tests run the full protocol against in-memory
//! fakes.

pub mod api;
pub mod auth;
pub mod config;

pub use api::error::{ApiError, RenewError, SessionEndReason};
pub use api::pipeline::{RequestOptions, RequestPipeline};
pub use api::transport::{
    HttpTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
pub use auth::session::{SessionEnd, SessionManager};
pub use auth::store::{CredentialPair, CredentialStore, FileStore, KeyringStore, MemoryStore};
pub use config::{ClientConfig, Role, RoleProfile};
