//! Request pipeline module for the Classport portal API.
//!
//! This module provides the `RequestPipeline` for communicating with the
//! portal: credential injection, expired-credential renewal with a single
//! replay, response-shape normalization, and the error taxonomy callers
//! match on.

pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod transport;

pub use error::ApiError;
pub use pipeline::{RequestOptions, RequestPipeline};
