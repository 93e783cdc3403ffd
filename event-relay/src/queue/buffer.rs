//! Capture and drain operations over a queue backend.

use std::sync::Arc;

use tracing::{info, warn};

use super::{Event, QueueBackend};
use crate::error::QueueError;

/// Durable FIFO buffer between the capture and pull endpoints.
#[derive(Clone)]
pub struct QueueBuffer {
    backend: Arc<dyn QueueBackend>,
    batch_size: usize,
}

impl QueueBuffer {
    /// Wrap `backend`, pulling at most `batch_size` messages per drain.
    ///
    /// The effective batch size never exceeds the backend's own maximum.
    pub fn new(backend: Arc<dyn QueueBackend>, batch_size: usize) -> Self {
        let batch_size = batch_size.clamp(1, backend.max_batch_size());
        Self {
            backend,
            batch_size,
        }
    }

    /// Messages requested per drain after clamping.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Append a raw event body exactly as it was received.
    pub async fn capture(&self, raw_event: &str) -> Result<(), QueueError> {
        self.backend.enqueue(raw_event).await
    }

    /// Receive one batch of visible messages and delete each of them.
    ///
    /// Deletion happens before the caller gets the events, so an event is
    /// gone once this returns even if the HTTP response never reaches the
    /// consumer. A body that does not parse as an event is deleted and
    /// dropped. If a delete fails the drain fails, and the failed message
    /// plus the rest of the batch are released back to the backend.
    pub async fn drain(&self) -> Result<Vec<Event>, QueueError> {
        let messages = self.backend.receive_batch(self.batch_size).await?;
        let mut events = Vec::with_capacity(messages.len());

        for (index, message) in messages.iter().enumerate() {
            if let Err(e) = self.backend.delete(message).await {
                let remaining = &messages[index..];
                if let Err(release_error) = self.backend.release(remaining).await {
                    warn!(
                        count = remaining.len(),
                        error = %release_error,
                        "queue_release_failed"
                    );
                }
                return Err(e);
            }

            match serde_json::from_str::<Event>(&message.body) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(
                        message_id = %message.id,
                        error = %e,
                        "queued_message_malformed_dropped"
                    );
                }
            }
        }

        if !events.is_empty() {
            info!(count = events.len(), "queue_drained");
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryQueue, QueuedMessage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn event_body(subscription_id: &str, n: usize) -> String {
        format!(
            r#"{{"subscriptionId":"{}","eventType":"NamedVersionCreatedEvent","content":{{"n":{}}}}}"#,
            subscription_id, n
        )
    }

    #[tokio::test]
    async fn test_drain_returns_and_deletes_all_captured() {
        let queue = MemoryQueue::new();
        let buffer = QueueBuffer::new(Arc::new(queue.clone()), 32);

        for n in 0..3 {
            buffer.capture(&event_body("S1", n)).await.unwrap();
        }

        let events = buffer.drain().await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].payload["content"]["n"], 0);
        assert!(queue.is_empty());

        assert!(buffer.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_respects_batch_size() {
        let queue = MemoryQueue::new();
        let buffer = QueueBuffer::new(Arc::new(queue.clone()), 2);

        for n in 0..5 {
            buffer.capture(&event_body("S1", n)).await.unwrap();
        }

        assert_eq!(buffer.drain().await.unwrap().len(), 2);
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_message_is_deleted_and_dropped() {
        let queue = MemoryQueue::new();
        let buffer = QueueBuffer::new(Arc::new(queue.clone()), 32);

        buffer.capture("not json").await.unwrap();
        buffer.capture(&event_body("S1", 1)).await.unwrap();

        let events = buffer.drain().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_batch_size_clamped_to_backend_max() {
        let buffer = QueueBuffer::new(Arc::new(MemoryQueue::new()), 1000);
        assert_eq!(buffer.batch_size(), crate::queue::memory::MEMORY_MAX_BATCH);

        let buffer = QueueBuffer::new(Arc::new(MemoryQueue::new()), 0);
        assert_eq!(buffer.batch_size(), 1);
    }

    /// Backend whose deletes fail after a fixed number of successes.
    struct FailingDeletes {
        inner: MemoryQueue,
        allowed: AtomicUsize,
        released: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueueBackend for FailingDeletes {
        async fn ensure_queue_exists(&self) -> Result<(), QueueError> {
            Ok(())
        }

        async fn enqueue(&self, body: &str) -> Result<(), QueueError> {
            self.inner.enqueue(body).await
        }

        async fn receive_batch(&self, max: usize) -> Result<Vec<QueuedMessage>, QueueError> {
            self.inner.receive_batch(max).await
        }

        async fn delete(&self, message: &QueuedMessage) -> Result<(), QueueError> {
            let left = self.allowed.load(Ordering::SeqCst);
            if left == 0 {
                return Err(QueueError::operation("delete", "backend unavailable"));
            }
            self.allowed.store(left - 1, Ordering::SeqCst);
            self.inner.delete(message).await
        }

        async fn release(&self, messages: &[QueuedMessage]) -> Result<(), QueueError> {
            let mut released = self.released.lock().unwrap();
            released.extend(messages.iter().map(|m| m.body.clone()));
            Ok(())
        }

        fn max_batch_size(&self) -> usize {
            self.inner.max_batch_size()
        }
    }

    #[tokio::test]
    async fn test_failed_delete_fails_drain_and_releases_rest() {
        let inner = MemoryQueue::new();
        let backend = Arc::new(FailingDeletes {
            inner: inner.clone(),
            allowed: AtomicUsize::new(1),
            released: Mutex::new(Vec::new()),
        });
        let buffer = QueueBuffer::new(backend.clone(), 32);

        for n in 1..=3 {
            buffer.capture(&event_body("S1", n)).await.unwrap();
        }

        assert!(buffer.drain().await.is_err());
        // First message deleted, the other two handed back.
        assert_eq!(inner.len(), 2);
        assert_eq!(
            *backend.released.lock().unwrap(),
            vec![event_body("S1", 2), event_body("S1", 3)]
        );
    }
}
