//! In-memory queue backend for local runs and tests.
//!
//! Mirrors the visibility model of hosted queue services: a received message
//! is hidden for the visibility timeout and reappears unless it is deleted
//! with the receipt handed out by that receive.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use super::{QueueBackend, QueuedMessage};
use crate::error::QueueError;

/// Messages returned per receive at most.
pub const MEMORY_MAX_BATCH: usize = 32;

/// Default time a received message stays hidden.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct StoredMessage {
    sequence: u64,
    id: String,
    body: String,
}

struct InFlight {
    message: StoredMessage,
    receipt: String,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    next_sequence: u64,
    visible: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlight>,
}

impl QueueState {
    /// Return in-flight messages whose visibility timeout elapsed.
    fn restore_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        for id in expired {
            if let Some(flight) = self.in_flight.remove(&id) {
                self.visible.push_back(flight.message);
            }
        }

        self.visible.make_contiguous().sort_by_key(|m| m.sequence);
    }
}

/// Thread-safe process-local queue.
#[derive(Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
    visibility_timeout: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            visibility_timeout,
        }
    }

    /// Number of messages held, visible or in flight.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|state| state.visible.len() + state.in_flight.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::operation("lock", "memory queue state poisoned"))
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn ensure_queue_exists(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn enqueue(&self, body: &str) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.visible.push_back(StoredMessage {
            sequence,
            id: Uuid::new_v4().to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn receive_batch(&self, max: usize) -> Result<Vec<QueuedMessage>, QueueError> {
        let now = Instant::now();
        let mut state = self.lock()?;
        state.restore_expired(now);

        let count = max.min(MEMORY_MAX_BATCH).min(state.visible.len());
        let mut received = Vec::with_capacity(count);

        for message in state.visible.drain(..count).collect::<Vec<_>>() {
            let receipt = Uuid::new_v4().to_string();
            received.push(QueuedMessage {
                id: message.id.clone(),
                receipt: receipt.clone(),
                body: message.body.clone(),
            });
            state.in_flight.insert(
                message.id.clone(),
                InFlight {
                    message,
                    receipt,
                    visible_at: now + self.visibility_timeout,
                },
            );
        }

        Ok(received)
    }

    async fn delete(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        let mut state = self.lock()?;

        match state.in_flight.get(&message.id) {
            Some(flight) if flight.receipt == message.receipt => {
                state.in_flight.remove(&message.id);
                Ok(())
            }
            _ => Err(QueueError::MessageNotFound {
                id: message.id.clone(),
                receipt: message.receipt.clone(),
            }),
        }
    }

    fn max_batch_size(&self) -> usize {
        MEMORY_MAX_BATCH
    }
}
