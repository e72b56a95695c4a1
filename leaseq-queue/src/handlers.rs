//! HTTP handlers for the lease queue

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::{get, post, put},
    Router,
};
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use leaseq_core::{ApiError, ErrorCode, RequestId, REQUEST_ID_HEADER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::storage::{LeaseQueue, Message, QueueError};

/// Defaults applied when a request omits a duration
#[derive(Debug, Clone)]
pub struct QueueDefaults {
    pub ttl: Duration,
    pub visibility_timeout: Duration,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// State shared by the queue handlers
#[derive(Debug)]
pub struct QueueState {
    queue: LeaseQueue,
    defaults: QueueDefaults,
}

impl QueueState {
    pub fn new(queue: LeaseQueue, defaults: QueueDefaults) -> Self {
        Self { queue, defaults }
    }

    pub fn queue(&self) -> &LeaseQueue {
        &self.queue
    }
}

/// Routes for the message endpoints
pub fn router(state: Arc<QueueState>) -> Router {
    Router::new()
        .route("/messages", post(insert_message).delete(clear_messages))
        .route("/messages/raw", post(insert_raw_message))
        .route("/messages/receive", post(receive_message))
        .route("/messages/receive-batch", post(receive_messages))
        .route("/messages/peek", get(peek_messages))
        .route("/messages/:id", put(update_message).delete(delete_message))
        .route("/stats", get(queue_stats))
        .with_state(state)
}

// === Request/Response types ===

#[derive(Debug, Deserialize)]
struct InsertRequest {
    content: Value,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InsertQuery {
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ReceiveQuery {
    visibility_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BatchQuery {
    max_count: Option<usize>,
    visibility_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PeekQuery {
    max_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    lease_token: String,
    content: Option<Value>,
    visibility_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    lease_token: Option<String>,
}

/// Wire form of a message
#[derive(Debug, Serialize)]
struct MessageView {
    id: String,
    content: Value,
    insertion_time: DateTime<Utc>,
    expiration_time: DateTime<Utc>,
    lease_token: Option<String>,
    next_visible_time: DateTime<Utc>,
    dequeue_count: u32,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            content: decode_content(&message.id, &message.content),
            id: message.id,
            insertion_time: message.insertion_time,
            expiration_time: message.expiration_time,
            lease_token: message.lease_token,
            next_visible_time: message.next_visible_time,
            dequeue_count: message.dequeue_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReceiveResponse {
    message: Option<MessageView>,
}

#[derive(Debug, Serialize)]
struct MessagesResponse {
    messages: Vec<MessageView>,
}

#[derive(Debug, Serialize)]
struct UpdateResponse {
    id: String,
    lease_token: Option<String>,
    next_visible_time: DateTime<Utc>,
    content: Value,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    id: String,
    deleted: bool,
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    removed: usize,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    queue: String,
    total: usize,
    visible: usize,
    leased: usize,
    max_content_bytes: usize,
}

// === Handlers ===

async fn insert_message(State(state): State<Arc<QueueState>>, body: Bytes) -> Response {
    let req: InsertRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return error_response(ApiError::new(ErrorCode::InvalidJson, e.to_string())),
    };

    let content = match serde_json::to_vec(&req.content) {
        Ok(c) => c,
        Err(e) => return error_response(ApiError::new(ErrorCode::InternalError, e.to_string())),
    };
    let ttl = req
        .ttl_seconds
        .map_or(state.defaults.ttl, Duration::from_secs);

    info!(ttl_secs = ttl.as_secs(), "Insert request");

    match state.queue.insert(content, ttl) {
        Ok(message) => json_response(StatusCode::CREATED, &MessageView::from(message)),
        Err(e) => queue_error_response(e),
    }
}

async fn insert_raw_message(
    State(state): State<Arc<QueueState>>,
    query: Result<Query<InsertQuery>, QueryRejection>,
    body: Bytes,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return error_response(ApiError::new(ErrorCode::ValidationError, e.body_text())),
    };
    let ttl = query
        .ttl_seconds
        .map_or(state.defaults.ttl, Duration::from_secs);

    info!(ttl_secs = ttl.as_secs(), bytes = body.len(), "Raw insert request");

    match state.queue.insert(body.to_vec(), ttl) {
        Ok(message) => json_response(StatusCode::CREATED, &MessageView::from(message)),
        Err(e) => queue_error_response(e),
    }
}

async fn receive_message(
    State(state): State<Arc<QueueState>>,
    query: Result<Query<ReceiveQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return error_response(ApiError::new(ErrorCode::ValidationError, e.body_text())),
    };
    let visibility_timeout = query
        .visibility_timeout
        .map_or(state.defaults.visibility_timeout, Duration::from_secs);

    match state.queue.receive_one(visibility_timeout) {
        Ok(message) => json_response(
            StatusCode::OK,
            &ReceiveResponse {
                message: message.map(MessageView::from),
            },
        ),
        Err(e) => queue_error_response(e),
    }
}

async fn receive_messages(
    State(state): State<Arc<QueueState>>,
    query: Result<Query<BatchQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return error_response(ApiError::new(ErrorCode::ValidationError, e.body_text())),
    };
    let max_count = query.max_count.unwrap_or(1);
    let visibility_timeout = query
        .visibility_timeout
        .map_or(state.defaults.visibility_timeout, Duration::from_secs);

    info!(max_count = max_count, "Receive batch request");

    match state.queue.receive_batch(max_count, visibility_timeout) {
        Ok(messages) => messages_response(messages),
        Err(e) => queue_error_response(e),
    }
}

async fn peek_messages(
    State(state): State<Arc<QueueState>>,
    query: Result<Query<PeekQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return error_response(ApiError::new(ErrorCode::ValidationError, e.body_text())),
    };

    match state.queue.peek(query.max_count.unwrap_or(1)) {
        Ok(messages) => messages_response(messages),
        Err(e) => queue_error_response(e),
    }
}

async fn update_message(
    State(state): State<Arc<QueueState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let req: UpdateRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return error_response(ApiError::new(ErrorCode::InvalidJson, e.to_string())),
    };

    let content = match req.content.as_ref().map(serde_json::to_vec).transpose() {
        Ok(c) => c,
        Err(e) => return error_response(ApiError::new(ErrorCode::InternalError, e.to_string())),
    };
    let visibility_timeout = req
        .visibility_timeout
        .map_or(state.defaults.visibility_timeout, Duration::from_secs);

    info!(message_id = %id, replace_content = content.is_some(), "Update request");

    match state
        .queue
        .update(&id, &req.lease_token, content, visibility_timeout)
    {
        Ok(message) => {
            let view = MessageView::from(message);
            json_response(
                StatusCode::OK,
                &UpdateResponse {
                    id: view.id,
                    lease_token: view.lease_token,
                    next_visible_time: view.next_visible_time,
                    content: view.content,
                },
            )
        }
        Err(e) => queue_error_response(e),
    }
}

async fn delete_message(
    State(state): State<Arc<QueueState>>,
    Path(id): Path<String>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return error_response(ApiError::new(ErrorCode::ValidationError, e.body_text())),
    };
    let Some(lease_token) = query.lease_token else {
        return error_response(ApiError::new(
            ErrorCode::MissingParameter,
            "lease_token is required",
        ));
    };

    match state.queue.delete(&id, &lease_token) {
        Ok(()) => json_response(StatusCode::OK, &DeleteResponse { id, deleted: true }),
        Err(e) => queue_error_response(e),
    }
}

async fn clear_messages(State(state): State<Arc<QueueState>>) -> Response {
    warn!(queue = %state.queue.name(), "Clearing all messages");
    let removed = state.queue.clear();
    json_response(StatusCode::OK, &ClearResponse { removed })
}

async fn queue_stats(State(state): State<Arc<QueueState>>) -> Response {
    let stats = state.queue.stats();
    json_response(
        StatusCode::OK,
        &StatsResponse {
            queue: state.queue.name().to_string(),
            total: stats.total,
            visible: stats.visible,
            leased: stats.leased,
            max_content_bytes: state.queue.options().max_content_bytes,
        },
    )
}

// === Content helpers ===

/// Content is decoded as JSON. Anything else is delivered as a marked
/// placeholder carrying the raw bytes, never as a failed request.
fn decode_content(id: &str, content: &[u8]) -> Value {
    match serde_json::from_slice(content) {
        Ok(value) => value,
        Err(e) => {
            warn!(message_id = %id, error = %e, "Content is not JSON, substituting placeholder");
            serde_json::json!({
                "undecodable": true,
                "reason": e.to_string(),
                "raw_base64": base64::engine::general_purpose::STANDARD.encode(content),
            })
        }
    }
}

// === Response helpers ===

fn queue_error_response(error: QueueError) -> Response {
    let code = match &error {
        QueueError::NotFound(_) => ErrorCode::MessageNotFound,
        QueueError::LeaseMismatch(_) => ErrorCode::LeaseMismatch,
        QueueError::Validation(_) => ErrorCode::ValidationError,
    };
    error_response(ApiError::new(code, error.to_string()))
}

fn messages_response(messages: Vec<Message>) -> Response {
    json_response(
        StatusCode::OK,
        &MessagesResponse {
            messages: messages.into_iter().map(MessageView::from).collect(),
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => build_response(status, bytes, RequestId::new().as_str()),
        Err(e) => error_response(ApiError::new(ErrorCode::InternalError, e.to_string())),
    }
}

fn error_response(error: ApiError) -> Response {
    if error.code == ErrorCode::InternalError {
        warn!(error = %error, "Request failed");
    }
    let status =
        StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    build_response(status, error.to_json().into_bytes(), &error.request_id)
}

fn build_response(status: StatusCode, body: Vec<u8>, request_id: &str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_json_content() {
        let value = decode_content("id", br#"{"name":"Ada","age":36}"#);
        assert_eq!(value["name"], "Ada");
        assert_eq!(value["age"], 36);
    }

    #[test]
    fn test_decode_falls_back_to_placeholder() {
        let value = decode_content("id", b"\xffnot json");
        assert_eq!(value["undecodable"], true);
        assert_eq!(
            value["raw_base64"],
            base64::engine::general_purpose::STANDARD.encode(b"\xffnot json")
        );
        assert!(value["reason"].is_string());
    }

    #[test]
    fn test_queue_errors_map_to_status() {
        let not_found = queue_error_response(QueueError::NotFound("x".into()));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let mismatch = queue_error_response(QueueError::LeaseMismatch("x".into()));
        assert_eq!(mismatch.status(), StatusCode::CONFLICT);

        let invalid = queue_error_response(QueueError::Validation("bad".into()));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert!(invalid.headers().contains_key(REQUEST_ID_HEADER));
    }
}
