//! Core types and traits for lambdarun
//!
//! This crate provides the vocabulary shared by the runtime and the CLI:
//! failure classification, invocation request IDs and payload parsing.

pub mod error;
pub mod payload;
pub mod request_id;

pub use error::{ErrorKind, ParseError, SourceError};
pub use payload::{parse_event, read_to_string, EventSource};
pub use request_id::RequestId;
