//! Message types carried by the queue buffer.
//!
//! Captured events are stored as the raw request body so the bytes the
//! provider signed are exactly the bytes a consumer later pulls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message handed out by a queue backend.
///
/// `receipt` is the backend token that must accompany a delete; it is only
/// valid for the receive that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: String,
    pub receipt: String,
    pub body: String,
}

/// The part of an inbound push the relay reads before queueing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub subscription_id: String,
}

/// An event as returned to pull consumers.
///
/// Only `subscriptionId` is interpreted; every other field, `eventType`
/// included, is passed through untouched whatever its JSON type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub subscription_id: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}
