//! Lease-based message queue for Leaseq
//!
//! Provides an in-memory FIFO queue with pop-receipt style leases:
//! - Insert, Receive (single and batch), Peek
//! - Update (renew lease, replace content), Delete, Clear
//! - Lazy visibility-timeout and TTL expiry against an injectable clock

pub mod clock;
pub mod handlers;
mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use handlers::{router, QueueDefaults, QueueState};
pub use storage::{LeaseQueue, Message, QueueError, QueueOptions, QueueStats, MAX_BATCH_SIZE};
