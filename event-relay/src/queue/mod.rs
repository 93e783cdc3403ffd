//! Queue module: the durable buffer between push capture and pull delivery.
//!
//! This module provides:
//! - The [`QueueBackend`] seam over a concrete queue service
//! - An AMQP backend (RabbitMQ) and an in-memory backend
//! - [`QueueBuffer`], the capture / drain operations used by the web layer
//!
//! ## Architecture
//!
//! ```text
//! POST /events → QueueBuffer::capture → backend → QueueBuffer::drain → GET /events
//! ```

pub mod amqp;
pub mod buffer;
pub mod memory;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ConfigError, QueueError};

pub use amqp::AmqpQueue;
pub use buffer::QueueBuffer;
pub use memory::MemoryQueue;
pub use types::{Event, EventEnvelope, QueuedMessage};

/// Primitives the relay needs from a queue service.
///
/// Visibility, ordering and concurrency control are the backend's concern.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create the queue if it does not exist yet.
    async fn ensure_queue_exists(&self) -> Result<(), QueueError>;

    /// Append a raw message.
    async fn enqueue(&self, body: &str) -> Result<(), QueueError>;

    /// Receive up to `max` currently visible messages without removing them.
    async fn receive_batch(&self, max: usize) -> Result<Vec<QueuedMessage>, QueueError>;

    /// Remove a previously received message.
    async fn delete(&self, message: &QueuedMessage) -> Result<(), QueueError>;

    /// Hand received-but-undeleted messages back to the queue.
    ///
    /// Backends with a visibility timeout may leave this a no-op; the
    /// messages reappear on their own.
    async fn release(&self, _messages: &[QueuedMessage]) -> Result<(), QueueError> {
        Ok(())
    }

    /// Largest batch a single receive may return.
    fn max_batch_size(&self) -> usize;

    /// Release connections. Default is a no-op.
    async fn close(&self) {}
}

/// Build the backend named by a connection string.
///
/// `amqp://` / `amqps://` select RabbitMQ, `memory://` a process-local queue.
pub fn connect_backend(
    connection_string: &str,
    queue_name: &str,
) -> Result<Arc<dyn QueueBackend>, ConfigError> {
    let scheme = connection_string
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .unwrap_or_default();

    match scheme.as_str() {
        "amqp" | "amqps" => Ok(Arc::new(AmqpQueue::new(
            connection_string.to_string(),
            queue_name.to_string(),
        ))),
        "memory" => Ok(Arc::new(MemoryQueue::new())),
        _ => Err(ConfigError::UnsupportedQueueScheme(scheme)),
    }
}
