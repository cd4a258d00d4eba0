use tokio::sync::oneshot;

use crate::models::cloud_event::CloudEvent;
use crate::services::schema::{DecodedPayload, EventPayload};

/// Why a produce request was not acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub enum NackCause {
    /// The worker inbox was full; the caller should back off.
    Overflow,
    /// No reply arrived within the DSL ask timeout.
    Timeout,
    /// The worker stopped before the request completed.
    Cancelled,
    /// No producer stream exists for the addressed (test, topic).
    NoSuchStream,
    Serialization(String),
    Kafka(String),
}

/// Broker-confirmed write or a structured refusal. Every produce request
/// receives exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum ProduceResult {
    Ack { partition: i32, offset: i64 },
    Nack(NackCause),
}

impl ProduceResult {
    pub fn is_ack(&self) -> bool {
        matches!(self, ProduceResult::Ack { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotAvailableReason {
    TimedOut,
    Cancelled,
    NoSuchStream,
}

/// A consumed record that survived the event filter, stored under its
/// correlation id until a fetch claims it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedEvent {
    pub key: CloudEvent,
    pub value: DecodedPayload,
    pub headers: Vec<(String, String)>,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsumedResult {
    Success(Box<ConsumedEvent>),
    NotAvailable(NotAvailableReason),
}

impl ConsumedResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConsumedResult::Success(_))
    }
}

/// One unit of work for a producer stream worker. The worker replies
/// exactly once on `reply`.
#[derive(Debug)]
pub struct ProduceRequest {
    pub key: CloudEvent,
    pub payload: EventPayload,
    pub headers: Vec<(String, String)>,
    pub reply: oneshot::Sender<ProduceResult>,
}

/// One fetch against a consumer stream worker's correlation buffer.
#[derive(Debug)]
pub struct FetchRequest {
    pub correlation_id: String,
    pub expected_type: String,
    pub reply: oneshot::Sender<ConsumedResult>,
}
