//! RabbitMQ queue backend.
//!
//! Holds one connection and channel shared by all request tasks and
//! reconnects lazily when the channel drops. Messages are received with
//! `basic_get` in manual-ack mode and deleted with `basic_ack`.
//!
//! A delivery tag only means something on the channel that issued it, so a
//! receipt is `<channel generation>:<delivery tag>` and a receipt from an
//! earlier channel is refused instead of being acked on the new one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::{
        BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
        ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{QueueBackend, QueuedMessage};
use crate::error::QueueError;

/// Messages fetched per pull at most, matching common queue service limits.
pub const AMQP_MAX_BATCH: usize = 32;

/// RabbitMQ-backed queue with connection management.
#[derive(Clone)]
pub struct AmqpQueue {
    inner: Arc<AmqpQueueInner>,
}

struct AmqpQueueInner {
    url: String,
    queue_name: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    /// Bumped every time a new channel replaces the old one.
    generation: AtomicU64,
}

impl AmqpQueue {
    /// Create a backend for `queue_name` on the broker at `url`.
    ///
    /// No connection is opened until the first operation.
    pub fn new(url: String, queue_name: String) -> Self {
        Self {
            inner: Arc::new(AmqpQueueInner {
                url,
                queue_name,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    ///
    /// Returns the channel with its generation.
    async fn ensure_connected(&self) -> Result<(Channel, u64), QueueError> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok((ch.clone(), self.current_generation()));
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok((ch.clone(), self.current_generation()));
            }
        }

        info!("rabbitmq_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default()).await?;

        info!("rabbitmq_connected");

        let ch = conn.create_channel().await?;

        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::operation("confirm_select", e))?;

        // Declaring is idempotent, so every fresh channel re-asserts the queue.
        ch.queue_declare(
            &self.inner.queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| QueueError::operation("queue_declare", e))?;

        info!(queue = %self.inner.queue_name, "rabbitmq_queue_declared");

        *connection = Some(conn);
        *channel = Some(ch.clone());
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        Ok((ch, generation))
    }

    fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Resolve a receipt to a delivery tag on the live channel.
    async fn channel_for_receipt(&self, receipt: &str) -> Result<(Channel, u64), QueueError> {
        let (generation, delivery_tag) = parse_receipt(receipt)?;

        if generation != self.current_generation() {
            return Err(QueueError::InvalidReceipt(receipt.to_string()));
        }

        let (channel, live) = self.ensure_connected().await?;
        if live != generation {
            return Err(QueueError::InvalidReceipt(receipt.to_string()));
        }

        Ok((channel, delivery_tag))
    }
}

fn format_receipt(generation: u64, delivery_tag: u64) -> String {
    format!("{}:{}", generation, delivery_tag)
}

fn parse_receipt(receipt: &str) -> Result<(u64, u64), QueueError> {
    receipt
        .split_once(':')
        .and_then(|(generation, tag)| Some((generation.parse().ok()?, tag.parse().ok()?)))
        .ok_or_else(|| QueueError::InvalidReceipt(receipt.to_string()))
}

#[async_trait]
impl QueueBackend for AmqpQueue {
    async fn ensure_queue_exists(&self) -> Result<(), QueueError> {
        self.ensure_connected().await.map(|_| ())
    }

    async fn enqueue(&self, body: &str) -> Result<(), QueueError> {
        let (channel, _) = self.ensure_connected().await?;
        let message_id = Uuid::new_v4().to_string();

        let confirmation = channel
            .basic_publish(
                "",
                &self.inner.queue_name,
                BasicPublishOptions::default(),
                body.as_bytes(),
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.clone().into()),
            )
            .await
            .map_err(|e| QueueError::operation("basic_publish", e))?
            .await
            .map_err(|e| QueueError::operation("publish_confirm", e))?;

        if confirmation.is_nack() {
            return Err(QueueError::operation(
                "publish_confirm",
                "broker rejected the message",
            ));
        }

        debug!(
            queue = %self.inner.queue_name,
            message_id = %message_id,
            body_length = body.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }

    async fn receive_batch(&self, max: usize) -> Result<Vec<QueuedMessage>, QueueError> {
        let (channel, generation) = self.ensure_connected().await?;
        let mut messages = Vec::new();

        while messages.len() < max.min(AMQP_MAX_BATCH) {
            let fetched = channel
                .basic_get(&self.inner.queue_name, BasicGetOptions { no_ack: false })
                .await
                .map_err(|e| QueueError::operation("basic_get", e))?;

            let Some(message) = fetched else {
                break;
            };

            let delivery = message.delivery;
            let id = delivery
                .properties
                .message_id()
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| delivery.delivery_tag.to_string());

            let body = match String::from_utf8(delivery.data) {
                Ok(body) => body,
                Err(e) => {
                    warn!(message_id = %id, "rabbitmq_message_not_utf8");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };

            messages.push(QueuedMessage {
                id,
                receipt: format_receipt(generation, delivery.delivery_tag),
                body,
            });
        }

        Ok(messages)
    }

    async fn delete(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        let (channel, delivery_tag) = self.channel_for_receipt(&message.receipt).await?;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::operation("basic_ack", e))
    }

    /// Requeue unacked deliveries so they do not sit on the channel until it closes.
    async fn release(&self, messages: &[QueuedMessage]) -> Result<(), QueueError> {
        for message in messages {
            let (channel, delivery_tag) = match self.channel_for_receipt(&message.receipt).await {
                Ok(found) => found,
                // The issuing channel is gone and the broker already requeued it.
                Err(QueueError::InvalidReceipt(_)) => continue,
                Err(e) => return Err(e),
            };

            channel
                .basic_nack(
                    delivery_tag,
                    BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| QueueError::operation("basic_nack", e))?;
        }

        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        AMQP_MAX_BATCH
    }

    /// Close the connection gracefully.
    async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_queue_closed");
    }
}
