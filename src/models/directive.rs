use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Which side of a topic a stream worker drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicRole {
    Producer,
    Consumer,
}

impl fmt::Display for TopicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicRole::Producer => write!(f, "producer"),
            TopicRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// Allow-list entry for consumed events: a record survives the consumer
/// filter iff its CloudEvent (type, payloadversion) matches some entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_type: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDirective {
    pub topic: String,
    pub role: TopicRole,
    pub client_principal: String,
    #[serde(default)]
    pub event_filters: Vec<EventFilter>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Optional per-topic override for the engine-level bootstrap servers,
    /// `host:port[,host:port...]`.
    #[serde(default)]
    pub bootstrap_servers: Option<String>,
}

/// The parsed test bundle manifest pulled from object storage. Immutable
/// after load; consumed once by the owning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStorageDirective {
    pub object_storage_location: String,
    pub evidence_dir: String,
    pub bucket: String,
    pub topic_directives: Vec<TopicDirective>,
    #[serde(default)]
    pub user_glue_packages: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityProtocol {
    #[serde(rename = "PLAINTEXT")]
    Plaintext,
    #[serde(rename = "SSL")]
    Ssl,
    #[serde(rename = "SASL_PLAINTEXT")]
    SaslPlaintext,
    #[serde(rename = "SASL_SSL")]
    SaslSsl,
}

impl SecurityProtocol {
    /// Value for the rdkafka `security.protocol` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }
}

/// Security material for one (topic, role) pair. The credential blob is
/// opaque everywhere except the Kafka client setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSecurityDirective {
    pub topic: String,
    pub role: TopicRole,
    pub protocol: SecurityProtocol,
    #[serde(default)]
    pub credential_blob: Option<String>,
}

/// Decoded form of the credential blob (base64-wrapped JSON). Only the
/// stream client builder ever looks inside.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialMaterial {
    #[serde(default)]
    pub sasl_username: Option<String>,
    #[serde(default)]
    pub sasl_password: Option<String>,
    #[serde(default)]
    pub sasl_mechanism: Option<String>,
    #[serde(default)]
    pub ssl_ca_location: Option<String>,
}

impl KafkaSecurityDirective {
    pub fn plaintext(topic: &str, role: TopicRole) -> Self {
        Self {
            topic: topic.to_string(),
            role,
            protocol: SecurityProtocol::Plaintext,
            credential_blob: None,
        }
    }

    pub fn decode_credentials(&self) -> Result<CredentialMaterial, AppError> {
        use base64::Engine as _;

        let blob = match &self.credential_blob {
            Some(blob) if !blob.is_empty() => blob,
            _ => return Ok(CredentialMaterial::default()),
        };
        let raw = base64::engine::general_purpose::STANDARD
            .decode(blob)
            .map_err(|e| {
                AppError::Vault(format!(
                    "Invalid credential blob for topic '{}' ({}): {}",
                    self.topic, self.role, e
                ))
            })?;
        serde_json::from_slice(&raw).map_err(|e| {
            AppError::Vault(format!(
                "Malformed credential material for topic '{}' ({}): {}",
                self.topic, self.role, e
            ))
        })
    }
}
