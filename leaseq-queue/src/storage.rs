//! Lease queue storage
//!
//! Messages live in a single insertion-ordered sequence behind one mutex.
//! Visibility and expiry are evaluated against the injected clock on every
//! operation, so correctness never depends on a background sweep.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};

/// Upper bound for `receive_batch` and `peek`
pub const MAX_BATCH_SIZE: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Message not found: {0}")]
    NotFound(String),
    #[error("Lease token does not match for message: {0}")]
    LeaseMismatch(String),
    #[error("Invalid parameter: {0}")]
    Validation(String),
}

/// Limits enforced on queue operations
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub max_ttl: Duration,
    pub max_visibility_timeout: Duration,
    pub max_content_bytes: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            max_visibility_timeout: Duration::from_secs(7 * 24 * 60 * 60),
            max_content_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub content: Vec<u8>,
    pub insertion_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub next_visible_time: DateTime<Utc>,
    pub lease_token: Option<String>,
    pub dequeue_count: u32,
}

impl Message {
    fn new(content: Vec<u8>, now: DateTime<Utc>, expiration_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            insertion_time: now,
            expiration_time,
            next_visible_time: now,
            lease_token: None,
            dequeue_count: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_time
    }

    /// Eligible for receive and peek
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && now >= self.next_visible_time
    }

    /// A token only authorises update/delete while its lease is running.
    fn holds_lease(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.next_visible_time > now && self.lease_token.as_deref() == Some(token)
    }

    fn grant_lease(&mut self, until: DateTime<Utc>) {
        self.lease_token = Some(Uuid::new_v4().to_string());
        self.next_visible_time = until;
    }

    fn without_lease(&self) -> Self {
        Self {
            lease_token: None,
            ..self.clone()
        }
    }
}

/// Live message counts at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub visible: usize,
    pub leased: usize,
}

#[derive(Debug)]
pub struct LeaseQueue {
    name: String,
    options: QueueOptions,
    clock: Arc<dyn Clock>,
    messages: Mutex<VecDeque<Message>>,
}

impl LeaseQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, QueueOptions::default(), Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        options: QueueOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            clock,
            messages: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn insert(&self, content: Vec<u8>, ttl: Duration) -> Result<Message, QueueError> {
        self.check_content(&content)?;
        let ttl = self.check_ttl(ttl)?;

        let mut messages = self.messages.lock();
        let now = self.clock.now();
        let message = Message::new(content, now, deadline(now, ttl)?);
        messages.push_back(message.clone());

        info!(queue = %self.name, message_id = %message.id, "Inserted message");
        Ok(message)
    }

    /// Leases the oldest visible message. `None` means the queue is drained.
    pub fn receive_one(&self, visibility_timeout: Duration) -> Result<Option<Message>, QueueError> {
        let visibility = self.check_visibility_timeout(visibility_timeout)?;

        let mut messages = self.messages.lock();
        let leased = self.lease_visible(&mut messages, 1, visibility)?;
        Ok(leased.into_iter().next())
    }

    /// Leases up to `max_count` visible messages, each under its own token.
    pub fn receive_batch(
        &self,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        check_batch_size(max_count)?;
        let visibility = self.check_visibility_timeout(visibility_timeout)?;

        let mut messages = self.messages.lock();
        self.lease_visible(&mut messages, max_count, visibility)
    }

    /// Returns up to `max_count` visible messages without leasing them.
    pub fn peek(&self, max_count: usize) -> Result<Vec<Message>, QueueError> {
        check_batch_size(max_count)?;

        let messages = self.messages.lock();
        let now = self.clock.now();
        let peeked: Vec<Message> = messages
            .iter()
            .filter(|m| m.is_visible(now))
            .take(max_count)
            .map(Message::without_lease)
            .collect();

        debug!(queue = %self.name, count = peeked.len(), "Peeked messages");
        Ok(peeked)
    }

    /// Renews the lease under a fresh token and optionally replaces the content.
    /// The supplied token is invalid as soon as this returns.
    pub fn update(
        &self,
        id: &str,
        lease_token: &str,
        content: Option<Vec<u8>>,
        visibility_timeout: Duration,
    ) -> Result<Message, QueueError> {
        if let Some(content) = &content {
            self.check_content(content)?;
        }
        let visibility = self.check_visibility_timeout(visibility_timeout)?;

        let mut messages = self.messages.lock();
        let now = self.clock.now();
        let index = leased_position(&messages, id, lease_token, now)?;
        let until = deadline(now, visibility)?;

        let message = &mut messages[index];
        if let Some(content) = content {
            message.content = content;
        }
        message.grant_lease(until);

        info!(
            queue = %self.name,
            message_id = %id,
            next_visible_time = %message.next_visible_time,
            "Updated message"
        );
        Ok(message.clone())
    }

    pub fn delete(&self, id: &str, lease_token: &str) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        let now = self.clock.now();
        let index = leased_position(&messages, id, lease_token, now)?;
        messages.remove(index);

        info!(queue = %self.name, message_id = %id, "Deleted message");
        Ok(())
    }

    /// Drops every message, leased or not, and returns how many live messages
    /// were removed.
    ///
    /// Outstanding leases are not consulted: a consumer still holding a token
    /// gets `NotFound` on its next update or delete. Callers wanting to drain
    /// gracefully should receive and delete instead.
    pub fn clear(&self) -> usize {
        let mut messages = self.messages.lock();
        let now = self.clock.now();
        let removed = messages.iter().filter(|m| !m.is_expired(now)).count();
        messages.clear();

        info!(queue = %self.name, removed = removed, "Cleared queue");
        removed
    }

    /// Reclaims memory held by expired messages.
    pub fn purge_expired(&self) -> usize {
        let mut messages = self.messages.lock();
        let now = self.clock.now();
        let before = messages.len();
        messages.retain(|m| !m.is_expired(now));
        let purged = before - messages.len();

        if purged > 0 {
            debug!(queue = %self.name, purged = purged, "Purged expired messages");
        }
        purged
    }

    pub fn stats(&self) -> QueueStats {
        let messages = self.messages.lock();
        let now = self.clock.now();
        messages
            .iter()
            .filter(|m| !m.is_expired(now))
            .fold(QueueStats::default(), |mut stats, m| {
                stats.total += 1;
                if m.is_visible(now) {
                    stats.visible += 1;
                } else {
                    stats.leased += 1;
                }
                stats
            })
    }

    // Every selected message is leased before the scan moves on, while the
    // lock is held, so concurrent receivers never see the same message.
    fn lease_visible(
        &self,
        messages: &mut VecDeque<Message>,
        limit: usize,
        visibility: chrono::Duration,
    ) -> Result<Vec<Message>, QueueError> {
        let now = self.clock.now();
        let until = deadline(now, visibility)?;
        messages.retain(|m| !m.is_expired(now));

        let mut leased = Vec::new();
        for message in messages.iter_mut() {
            if leased.len() == limit {
                break;
            }
            if !message.is_visible(now) {
                continue;
            }
            message.grant_lease(until);
            message.dequeue_count += 1;
            leased.push(message.clone());
        }

        if leased.is_empty() {
            debug!(queue = %self.name, "No visible messages");
        } else {
            info!(queue = %self.name, count = leased.len(), "Received messages");
        }
        Ok(leased)
    }

    fn check_content(&self, content: &[u8]) -> Result<(), QueueError> {
        if content.len() > self.options.max_content_bytes {
            return Err(QueueError::Validation(format!(
                "content is {} bytes, limit is {}",
                content.len(),
                self.options.max_content_bytes
            )));
        }
        Ok(())
    }

    fn check_ttl(&self, ttl: Duration) -> Result<chrono::Duration, QueueError> {
        if ttl.is_zero() {
            return Err(QueueError::Validation("ttl must be positive".to_string()));
        }
        if ttl > self.options.max_ttl {
            return Err(QueueError::Validation(format!(
                "ttl of {}s exceeds the {}s limit",
                ttl.as_secs(),
                self.options.max_ttl.as_secs()
            )));
        }
        to_chrono(ttl)
    }

    fn check_visibility_timeout(&self, timeout: Duration) -> Result<chrono::Duration, QueueError> {
        if timeout > self.options.max_visibility_timeout {
            return Err(QueueError::Validation(format!(
                "visibility timeout of {}s exceeds the {}s limit",
                timeout.as_secs(),
                self.options.max_visibility_timeout.as_secs()
            )));
        }
        to_chrono(timeout)
    }
}

fn check_batch_size(max_count: usize) -> Result<(), QueueError> {
    if !(1..=MAX_BATCH_SIZE).contains(&max_count) {
        return Err(QueueError::Validation(format!(
            "max_count must be between 1 and {MAX_BATCH_SIZE}, got {max_count}"
        )));
    }
    Ok(())
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration, QueueError> {
    chrono::Duration::from_std(duration)
        .map_err(|e| QueueError::Validation(format!("duration out of range: {e}")))
}

/// `now + delta`, or a validation error past the last representable instant.
fn deadline(now: DateTime<Utc>, delta: chrono::Duration) -> Result<DateTime<Utc>, QueueError> {
    now.checked_add_signed(delta).ok_or_else(|| {
        QueueError::Validation(format!(
            "{}s from now is past the latest supported timestamp",
            delta.num_seconds()
        ))
    })
}

fn leased_position(
    messages: &VecDeque<Message>,
    id: &str,
    lease_token: &str,
    now: DateTime<Utc>,
) -> Result<usize, QueueError> {
    let index = messages
        .iter()
        .position(|m| m.id == id && !m.is_expired(now))
        .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

    if !messages[index].holds_lease(lease_token, now) {
        return Err(QueueError::LeaseMismatch(id.to_string()));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn queue_with_clock() -> (LeaseQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let queue = LeaseQueue::with_clock("test", QueueOptions::default(), clock.clone());
        (queue, clock)
    }

    const HOUR: Duration = Duration::from_secs(3600);
    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_insert_sets_timestamps() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();

        let msg = queue.insert(b"hello".to_vec(), HOUR).unwrap();
        assert_eq!(msg.insertion_time, now);
        assert_eq!(msg.expiration_time, now + chrono::Duration::hours(1));
        assert_eq!(msg.next_visible_time, now);
        assert_eq!(msg.dequeue_count, 0);
        assert!(msg.lease_token.is_none());
    }

    #[test]
    fn test_ids_are_unique_after_deletes() {
        let (queue, _clock) = queue_with_clock();

        let first = queue.insert(b"a".to_vec(), HOUR).unwrap();
        let leased = queue.receive_one(MINUTE).unwrap().unwrap();
        queue
            .delete(&leased.id, leased.lease_token.as_deref().unwrap())
            .unwrap();
        let second = queue.insert(b"b".to_vec(), HOUR).unwrap();

        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_insert_rejects_bad_ttl_and_oversized_content() {
        let (queue, _clock) = queue_with_clock();

        assert!(matches!(
            queue.insert(b"x".to_vec(), Duration::ZERO),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            queue.insert(b"x".to_vec(), Duration::from_secs(8 * 24 * 3600)),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            queue.insert(vec![0u8; 64 * 1024 + 1], HOUR),
            Err(QueueError::Validation(_))
        ));
        assert_eq!(queue.stats().total, 0);
    }

    #[test]
    fn test_receive_one_on_empty_queue() {
        let (queue, _clock) = queue_with_clock();
        assert_eq!(queue.receive_one(MINUTE).unwrap(), None);
    }

    #[test]
    fn test_receive_leases_message() {
        let (queue, clock) = queue_with_clock();
        queue.insert(b"a".to_vec(), HOUR).unwrap();

        let msg = queue.receive_one(MINUTE).unwrap().unwrap();
        assert!(msg.lease_token.is_some());
        assert_eq!(msg.dequeue_count, 1);
        assert_eq!(msg.next_visible_time, clock.now() + chrono::Duration::minutes(1));

        assert_eq!(queue.receive_one(MINUTE).unwrap(), None);
    }

    #[test]
    fn test_batch_size_bounds() {
        let (queue, _clock) = queue_with_clock();

        assert!(matches!(
            queue.receive_batch(0, MINUTE),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            queue.receive_batch(33, MINUTE),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(queue.peek(0), Err(QueueError::Validation(_))));
        assert!(matches!(queue.peek(33), Err(QueueError::Validation(_))));
        assert!(queue.receive_batch(32, MINUTE).unwrap().is_empty());
        assert!(queue.peek(1).unwrap().is_empty());
    }

    #[test]
    fn test_visibility_timeout_limit() {
        let (queue, _clock) = queue_with_clock();
        queue.insert(b"a".to_vec(), HOUR).unwrap();

        let too_long = Duration::from_secs(7 * 24 * 3600 + 1);
        assert!(matches!(
            queue.receive_one(too_long),
            Err(QueueError::Validation(_))
        ));
        // rejected before any lease was granted
        assert_eq!(queue.stats().visible, 1);
    }

    #[test]
    fn test_deadline_past_timestamp_range_is_rejected() {
        let far = Duration::from_secs(10_000_000_000_000);
        let options = QueueOptions {
            max_ttl: far,
            max_visibility_timeout: far,
            ..QueueOptions::default()
        };
        let queue = LeaseQueue::with_clock("far", options, Arc::new(ManualClock::starting_now()));

        assert!(matches!(
            queue.insert(b"a".to_vec(), far),
            Err(QueueError::Validation(_))
        ));

        let inserted = queue.insert(b"b".to_vec(), HOUR).unwrap();
        assert!(matches!(
            queue.receive_one(far),
            Err(QueueError::Validation(_))
        ));
        assert_eq!(queue.stats().visible, 1);

        let leased = queue.receive_one(MINUTE).unwrap().unwrap();
        assert_eq!(leased.id, inserted.id);
        assert!(matches!(
            queue.update(&leased.id, leased.lease_token.as_deref().unwrap(), None, far),
            Err(QueueError::Validation(_))
        ));
        // the original lease still stands
        queue
            .delete(&leased.id, leased.lease_token.as_deref().unwrap())
            .unwrap();
    }

    #[test]
    fn test_peek_does_not_lease() {
        let (queue, _clock) = queue_with_clock();
        queue.insert(b"a".to_vec(), HOUR).unwrap();

        let peeked = queue.peek(5).unwrap();
        assert_eq!(peeked.len(), 1);
        assert!(peeked[0].lease_token.is_none());
        assert_eq!(peeked[0].dequeue_count, 0);

        let received = queue.receive_one(MINUTE).unwrap().unwrap();
        assert_eq!(received.dequeue_count, 1);
    }

    #[test]
    fn test_peek_hides_lapsed_token() {
        let (queue, clock) = queue_with_clock();
        queue.insert(b"a".to_vec(), HOUR).unwrap();
        queue.receive_one(MINUTE).unwrap().unwrap();

        clock.advance(chrono::Duration::minutes(2));
        let peeked = queue.peek(1).unwrap();
        assert_eq!(peeked.len(), 1);
        assert!(peeked[0].lease_token.is_none());
        assert_eq!(peeked[0].dequeue_count, 1);
    }

    #[test]
    fn test_update_unknown_message() {
        let (queue, _clock) = queue_with_clock();
        assert_eq!(
            queue.update("missing", "token", None, MINUTE),
            Err(QueueError::NotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_update_never_leased_message() {
        let (queue, _clock) = queue_with_clock();
        let msg = queue.insert(b"a".to_vec(), HOUR).unwrap();

        assert_eq!(
            queue.update(&msg.id, "anything", None, MINUTE),
            Err(QueueError::LeaseMismatch(msg.id.clone()))
        );
    }

    #[test]
    fn test_update_replaces_content_and_rotates_token() {
        let (queue, clock) = queue_with_clock();
        queue.insert(b"old".to_vec(), HOUR).unwrap();
        let leased = queue.receive_one(MINUTE).unwrap().unwrap();
        let old_token = leased.lease_token.clone().unwrap();

        let updated = queue
            .update(&leased.id, &old_token, Some(b"new".to_vec()), HOUR)
            .unwrap();
        assert_eq!(updated.content, b"new");
        assert_ne!(updated.lease_token.as_deref(), Some(old_token.as_str()));
        assert_eq!(updated.next_visible_time, clock.now() + chrono::Duration::hours(1));
        assert_eq!(updated.dequeue_count, 1);
    }

    #[test]
    fn test_update_keeps_content_when_absent() {
        let (queue, _clock) = queue_with_clock();
        queue.insert(b"keep".to_vec(), HOUR).unwrap();
        let leased = queue.receive_one(MINUTE).unwrap().unwrap();

        let updated = queue
            .update(&leased.id, leased.lease_token.as_deref().unwrap(), None, MINUTE)
            .unwrap();
        assert_eq!(updated.content, b"keep");
    }

    #[test]
    fn test_lapsed_lease_rejects_delete() {
        let (queue, clock) = queue_with_clock();
        queue.insert(b"a".to_vec(), HOUR).unwrap();
        let leased = queue.receive_one(MINUTE).unwrap().unwrap();

        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(
            queue.delete(&leased.id, leased.lease_token.as_deref().unwrap()),
            Err(QueueError::LeaseMismatch(leased.id.clone()))
        );
    }

    #[test]
    fn test_delete_expired_message_is_not_found() {
        let (queue, clock) = queue_with_clock();
        queue.insert(b"a".to_vec(), Duration::from_secs(120)).unwrap();
        let leased = queue.receive_one(HOUR).unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(120));
        assert_eq!(
            queue.delete(&leased.id, leased.lease_token.as_deref().unwrap()),
            Err(QueueError::NotFound(leased.id.clone()))
        );
    }

    #[test]
    fn test_clear_ignores_leases() {
        let (queue, _clock) = queue_with_clock();
        queue.insert(b"a".to_vec(), HOUR).unwrap();
        queue.insert(b"b".to_vec(), HOUR).unwrap();
        let leased = queue.receive_one(MINUTE).unwrap().unwrap();

        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.clear(), 0);
        assert_eq!(
            queue.delete(&leased.id, leased.lease_token.as_deref().unwrap()),
            Err(QueueError::NotFound(leased.id.clone()))
        );
    }

    #[test]
    fn test_clear_does_not_count_expired() {
        let (queue, clock) = queue_with_clock();
        queue.insert(b"short".to_vec(), Duration::from_secs(10)).unwrap();
        queue.insert(b"long".to_vec(), HOUR).unwrap();

        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(queue.clear(), 1);
    }

    #[test]
    fn test_purge_expired() {
        let (queue, clock) = queue_with_clock();
        queue.insert(b"short".to_vec(), Duration::from_secs(10)).unwrap();
        queue.insert(b"long".to_vec(), HOUR).unwrap();

        assert_eq!(queue.purge_expired(), 0);
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(queue.purge_expired(), 1);
        assert_eq!(queue.stats().total, 1);
    }

    #[test]
    fn test_stats() {
        let (queue, _clock) = queue_with_clock();
        for body in ["a", "b", "c"] {
            queue.insert(body.as_bytes().to_vec(), HOUR).unwrap();
        }
        queue.receive_one(MINUTE).unwrap();

        assert_eq!(
            queue.stats(),
            QueueStats {
                total: 3,
                visible: 2,
                leased: 1
            }
        );
    }
}
