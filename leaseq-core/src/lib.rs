//! Core types shared across Leaseq crates
//!
//! Holds the API error taxonomy and request id generation used by the
//! queue handlers and the server binary.

pub mod error;
pub mod request_id;

pub use error::{ApiError, ErrorCode};
pub use request_id::{RequestId, REQUEST_ID_HEADER};
