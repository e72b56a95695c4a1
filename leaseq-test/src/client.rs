//! Client for interacting with a Leaseq server

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// A message as returned over HTTP
#[derive(Debug, Clone, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub content: Value,
    pub insertion_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub lease_token: Option<String>,
    pub next_visible_time: DateTime<Utc>,
    pub dequeue_count: u32,
}

impl QueueMessage {
    /// Lease token of a received message
    pub fn token(&self) -> &str {
        self.lease_token.as_deref().unwrap_or_default()
    }
}

/// Result of an update
#[derive(Debug, Clone, Deserialize)]
pub struct UpdatedLease {
    pub id: String,
    pub lease_token: Option<String>,
    pub next_visible_time: DateTime<Utc>,
    pub content: Value,
}

#[derive(Deserialize)]
struct ReceiveBody {
    message: Option<QueueMessage>,
}

#[derive(Deserialize)]
struct MessagesBody {
    messages: Vec<QueueMessage>,
}

#[derive(Deserialize)]
struct ClearBody {
    removed: usize,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Client for interacting with Leaseq
pub struct LeaseqClient {
    base_url: String,
    client: Client,
}

impl LeaseqClient {
    /// Create a new client
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { base_url, client }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Insert a JSON payload
    pub async fn insert(
        &self,
        content: Value,
        ttl_seconds: Option<u64>,
    ) -> Result<QueueMessage, ClientError> {
        let url = format!("{}/messages", self.base_url);
        let mut body = json!({ "content": content });
        if let Some(ttl) = ttl_seconds {
            body["ttl_seconds"] = json!(ttl);
        }
        let response = self.client.post(&url).json(&body).send().await?;
        parse(response).await
    }

    /// Insert opaque bytes
    pub async fn insert_raw(&self, content: Vec<u8>) -> Result<QueueMessage, ClientError> {
        let url = format!("{}/messages/raw", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(content)
            .send()
            .await?;
        parse(response).await
    }

    /// Receive one message; `None` when the queue is drained
    pub async fn receive(
        &self,
        visibility_timeout: u64,
    ) -> Result<Option<QueueMessage>, ClientError> {
        let url = format!("{}/messages/receive", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("visibility_timeout", visibility_timeout)])
            .send()
            .await?;
        let body: ReceiveBody = parse(response).await?;
        Ok(body.message)
    }

    /// Receive up to `max_count` messages
    pub async fn receive_batch(
        &self,
        max_count: usize,
        visibility_timeout: u64,
    ) -> Result<Vec<QueueMessage>, ClientError> {
        let url = format!("{}/messages/receive-batch", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("max_count", max_count as u64),
                ("visibility_timeout", visibility_timeout),
            ])
            .send()
            .await?;
        let body: MessagesBody = parse(response).await?;
        Ok(body.messages)
    }

    /// Peek at up to `max_count` messages without leasing them
    pub async fn peek(&self, max_count: usize) -> Result<Vec<QueueMessage>, ClientError> {
        let url = format!("{}/messages/peek", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("max_count", max_count)])
            .send()
            .await?;
        let body: MessagesBody = parse(response).await?;
        Ok(body.messages)
    }

    /// Renew a lease, optionally replacing the content
    pub async fn update(
        &self,
        id: &str,
        lease_token: &str,
        content: Option<Value>,
        visibility_timeout: u64,
    ) -> Result<UpdatedLease, ClientError> {
        let url = format!("{}/messages/{}", self.base_url, id);
        let response = self
            .client
            .put(&url)
            .json(&json!({
                "lease_token": lease_token,
                "content": content,
                "visibility_timeout": visibility_timeout,
            }))
            .send()
            .await?;
        parse(response).await
    }

    /// Delete a leased message
    pub async fn delete(&self, id: &str, lease_token: &str) -> Result<(), ClientError> {
        let url = format!("{}/messages/{}", self.base_url, id);
        let response = self
            .client
            .delete(&url)
            .query(&[("lease_token", lease_token)])
            .send()
            .await?;
        let _: Value = parse(response).await?;
        Ok(())
    }

    /// Drop every message, returning how many were removed
    pub async fn clear(&self) -> Result<usize, ClientError> {
        let url = format!("{}/messages", self.base_url);
        let response = self.client.delete(&url).send().await?;
        let body: ClearBody = parse(response).await?;
        Ok(body.removed)
    }

    /// Raw queue statistics
    pub async fn stats(&self) -> Result<Value, ClientError> {
        let url = format!("{}/stats", self.base_url);
        let response = self.client.get(&url).send().await?;
        parse(response).await
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let body: ErrorBody = serde_json::from_str(&text)
            .map_err(|e| ClientError::ParseError(format!("{e}: {text}")))?;
        return Err(ClientError::Api {
            status,
            code: body.code,
            message: body.message,
        });
    }

    serde_json::from_str(&text).map_err(|e| ClientError::ParseError(format!("{e}: {text}")))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("{status} {code}: {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },
}

impl ClientError {
    /// Error code returned by the server, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}
