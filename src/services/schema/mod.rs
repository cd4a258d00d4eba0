pub mod client;
pub mod codec;

pub use client::*;
pub use codec::*;

use serde::{Deserialize, Serialize};

/// Serialization format of a registered schema, as reported by the
/// Schema Registry `schemaType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaFormat {
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "AVRO")]
    Avro,
    #[serde(rename = "PROTOBUF")]
    Protobuf,
}

impl SchemaFormat {
    /// The registry omits `schemaType` for Avro schemas.
    pub fn from_registry(schema_type: Option<&str>) -> Self {
        match schema_type {
            Some("JSON") => SchemaFormat::Json,
            Some("PROTOBUF") => SchemaFormat::Protobuf,
            _ => SchemaFormat::Avro,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaFormat::Json => "JSON",
            SchemaFormat::Avro => "AVRO",
            SchemaFormat::Protobuf => "PROTOBUF",
        }
    }
}

/// A schema known to the registry, cached for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredSchema {
    pub subject: String,
    pub schema_id: u32,
    pub format: SchemaFormat,
    pub schema_text: String,
}

/// A typed payload on its way onto the wire. JSON payloads are encoded
/// structurally; Avro and Protobuf payloads arrive pre-encoded from the
/// bundle and the codec owns only the Confluent framing for them.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Json {
        record_name: String,
        value: serde_json::Value,
    },
    Avro {
        record_name: String,
        encoded: Vec<u8>,
    },
    Protobuf {
        message_indexes: Vec<i32>,
        encoded: Vec<u8>,
    },
}

impl EventPayload {
    /// Record name used in the `{topic}-{recordName}` subject convention.
    /// Dynamically-typed protobuf payloads always register under the
    /// literal `DynamicMessage`.
    pub fn record_name(&self) -> &str {
        match self {
            EventPayload::Json { record_name, .. } => record_name,
            EventPayload::Avro { record_name, .. } => record_name,
            EventPayload::Protobuf { .. } => "DynamicMessage",
        }
    }

    pub fn format(&self) -> SchemaFormat {
        match self {
            EventPayload::Json { .. } => SchemaFormat::Json,
            EventPayload::Avro { .. } => SchemaFormat::Avro,
            EventPayload::Protobuf { .. } => SchemaFormat::Protobuf,
        }
    }
}

/// A payload decoded off the wire, tagged with the schema id that framed it.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    Json {
        schema_id: u32,
        value: serde_json::Value,
    },
    Avro {
        schema_id: u32,
        encoded: Vec<u8>,
    },
    Protobuf {
        schema_id: u32,
        message_indexes: Vec<i32>,
        encoded: Vec<u8>,
    },
}

impl DecodedPayload {
    pub fn schema_id(&self) -> u32 {
        match self {
            DecodedPayload::Json { schema_id, .. }
            | DecodedPayload::Avro { schema_id, .. }
            | DecodedPayload::Protobuf { schema_id, .. } => *schema_id,
        }
    }
}
