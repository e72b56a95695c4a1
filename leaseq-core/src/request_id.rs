//! Request ID generation

use uuid::Uuid;

/// Header carrying the request id on every response
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request identifier echoed back to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId {
    /// Uppercase hex, 32 characters
    pub id: String,
}

impl RequestId {
    /// Generate a new request id
    pub fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        Self { id }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}
