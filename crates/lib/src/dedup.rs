//! Webhook message deduplication over a rolling time window.
//!
//! The platform redelivers webhooks on anything it considers a failure, so
//! the same message can arrive more than once. Identity is a SHA-256 digest
//! over (message id, sender, timestamp, kind); entries expire a fixed window
//! after insertion, not after last access.

use crate::message::InboundMessage;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default expiry window for seen-message keys.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Fixed-size digest identifying one inbound message.
pub type DeduplicationKey = [u8; 32];

/// Compute the deduplication key for a message. Deterministic: identical
/// (id, sender, timestamp, kind) always yield the same key.
pub fn message_key(msg: &InboundMessage) -> DeduplicationKey {
    let mut hasher = Sha256::new();
    // Canonical newline-joined payload; field order is fixed here.
    hasher.update(msg.message_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(msg.sender.as_bytes());
    hasher.update(b"\n");
    hasher.update(msg.timestamp.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(msg.kind.as_str().as_bytes());
    hasher.finalize().into()
}

/// In-memory duplicate gate. Safe under concurrent callers; the lock is held
/// only for the membership check and cleanup, never across an await.
pub struct Deduplicator {
    window: Duration,
    seen: Mutex<HashMap<DeduplicationKey, Instant>>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// True if this message was already seen within the window. Expired keys
    /// are evicted before the membership check, so a repeat after the window
    /// elapses counts as first sight and is recorded with a fresh insertion
    /// time.
    pub fn is_duplicate(&self, msg: &InboundMessage) -> bool {
        let key = message_key(msg);
        let now = Instant::now();
        let window = self.window;
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, inserted| now.duration_since(*inserted) < window);
        if seen.contains_key(&key) {
            return true;
        }
        seen.insert(key, now);
        false
    }

    /// Number of keys currently tracked (expired entries linger until the
    /// next `is_duplicate` call evicts them).
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
