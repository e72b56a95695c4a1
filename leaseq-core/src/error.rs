//! API error types and formatting

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::request_id::RequestId;

/// Error codes surfaced by the HTTP API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Message lifecycle
    MessageNotFound,
    LeaseMismatch,

    // Request validation
    ValidationError,
    InvalidJson,
    MissingParameter,

    // Server
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageNotFound => "MessageNotFound",
            Self::LeaseMismatch => "LeaseMismatch",
            Self::ValidationError => "ValidationError",
            Self::InvalidJson => "InvalidJson",
            Self::MissingParameter => "MissingParameter",
            Self::InternalError => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::MessageNotFound => 404,
            Self::LeaseMismatch => 409,
            Self::ValidationError | Self::InvalidJson | Self::MissingParameter => 400,
            Self::InternalError => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned to HTTP callers
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: RequestId::new().id,
        }
    }

    pub fn status(&self) -> u16 {
        self.code.http_status()
    }

    /// Format as a JSON error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            code: &'a str,
            message: &'a str,
            request_id: &'a str,
        }

        let error = JsonError {
            code: self.code.as_str(),
            message: &self.message,
            request_id: &self.request_id,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message
            )
        })
    }
}
