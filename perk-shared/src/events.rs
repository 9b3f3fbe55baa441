use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

/// Emitted whenever an offer is created, updated or deleted. The kind label
/// stays a raw string until the worker parses it, so malformed events can be
/// rejected per-job instead of poisoning the producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferChangeEvent {
    pub event_type: ChangeType,
    pub offer_type: String,
    pub offer_id: String,
    pub merchant_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Delivery wrapper around an offer-change event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub event: OfferChangeEvent,
    pub priority: i32,
    pub retry_count: u32,
}

impl JobEnvelope {
    pub fn new(event: OfferChangeEvent) -> Self {
        Self {
            event,
            priority: 0,
            retry_count: 0,
        }
    }
}
