//! Test utilities for Leaseq
//!
//! Provides utilities for end-to-end testing over real HTTP:
//! - Start a Leaseq server in-process on a random port
//! - Client helpers for every queue operation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use leaseq_test::TestServer;
//!
//! #[tokio::test]
//! async fn test_queue() {
//!     let server = TestServer::start().await.unwrap();
//!     let client = server.client();
//!
//!     client.insert(serde_json::json!({"hello": "world"}), None).await.unwrap();
//! }
//! ```

pub mod client;
pub mod server;

pub use client::{ClientError, LeaseqClient, QueueMessage, UpdatedLease};
pub use server::{TestError, TestServer};

/// Timeout for waiting on the server to answer health checks
pub const STARTUP_TIMEOUT_SECS: u64 = 10;
