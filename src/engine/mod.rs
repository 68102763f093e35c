//! Typed access to the extraction engine's HTTP interface.
//!
//! `types` holds the closed set of operations and the validated request
//! record; `client` owns transport, timeouts and the retry policy.

pub mod client;
pub mod types;

pub use client::{EngineClient, EngineError, EngineResponse};
pub use types::{
    ContentKind, ExtractionOptions, ExtractionRequest, FormField, Operation, Payload,
    ValidationError,
};
