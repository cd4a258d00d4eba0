use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

/// CloudEvents 1.0 envelope used as the key of every Kafka record the probe
/// produces or expects. The `correlationid` extension is the handle scenario
/// steps use to fetch consumed events back out of a stream worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub id: String,
    pub source: String,
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub correlationid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payloadversion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_epoch_micro_source: Option<i64>,
}

impl CloudEvent {
    pub fn new(event_type: &str, correlation_id: &str, source: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            specversion: "1.0".to_string(),
            event_type: event_type.to_string(),
            subject: None,
            correlationid: correlation_id.to_string(),
            payloadversion: Some("v1".to_string()),
            datacontenttype: Some("application/json".to_string()),
            time: Some(now),
            time_epoch_micro_source: Some(now.timestamp_micros()),
        }
    }

    /// Required attributes per the envelope contract: id, source, specversion,
    /// type and correlationid must all be present and non-empty.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut missing = Vec::new();
        if self.id.is_empty() {
            missing.push("id");
        }
        if self.source.is_empty() {
            missing.push("source");
        }
        if self.specversion.is_empty() {
            missing.push("specversion");
        }
        if self.event_type.is_empty() {
            missing.push("type");
        }
        if self.correlationid.is_empty() {
            missing.push("correlationid");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "CloudEvent is missing required attributes: {}",
                missing.join(", ")
            )))
        }
    }
}
