use std::sync::Arc;

use serde_json::Value;

use crate::errors::AppError;
use crate::models::cloud_event::CloudEvent;

use super::{DecodedPayload, EventPayload, SchemaFormat, SchemaRegistryClient};

/// Leading byte of every Confluent-framed message.
pub const MAGIC_BYTE: u8 = 0x00;

/// Frame layout:
///
/// ```text
/// JSON/Avro:   [0x00][schemaId:u32 BE][payload bytes]
/// Protobuf:    [0x00][schemaId:u32 BE][msgIndexVarintArray][payload bytes]
/// ```
const FRAME_HEADER_LEN: usize = 5;

/// Record name the CloudEvent key serializes under, per the
/// `{topic}-{recordName}` subject convention.
pub const CLOUD_EVENT_RECORD: &str = "CloudEvent";

pub fn subject_for(topic: &str, record_name: &str) -> String {
    format!("{}-{}", topic, record_name)
}

/// Confluent wire codec: the sole wire contract every external consumer of
/// the probe's traffic observes.
#[derive(Debug, Clone)]
pub struct WireCodec {
    registry: Arc<SchemaRegistryClient>,
}

impl WireCodec {
    pub fn new(registry: Arc<SchemaRegistryClient>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistryClient> {
        &self.registry
    }

    /// Serialize a payload for a topic, resolving (or in development mode
    /// auto-registering) its schema and prepending the Confluent frame.
    pub async fn serialize(
        &self,
        payload: &EventPayload,
        topic: &str,
    ) -> Result<Vec<u8>, AppError> {
        let subject = subject_for(topic, payload.record_name());
        let payload_json = match payload {
            EventPayload::Json { value, .. } => Some(value),
            _ => None,
        };
        let schema = self
            .registry
            .resolve_for_produce(&subject, payload.format(), payload_json)
            .await?;

        if schema.format != payload.format() {
            return Err(AppError::Serialization {
                subject,
                message: format!(
                    "payload format {} does not match registered schema format {}",
                    payload.format().as_str(),
                    schema.format.as_str()
                ),
            });
        }

        let body = match payload {
            EventPayload::Json { value, .. } => {
                serde_json::to_vec(value).map_err(|e| AppError::Serialization {
                    subject: schema.subject.clone(),
                    message: e.to_string(),
                })?
            }
            EventPayload::Avro { encoded, .. } => encoded.clone(),
            EventPayload::Protobuf { encoded, .. } => encoded.clone(),
        };

        let message_indexes = match payload {
            EventPayload::Protobuf {
                message_indexes, ..
            } => Some(message_indexes.as_slice()),
            _ => None,
        };

        Ok(encode_frame(schema.schema_id, message_indexes, &body))
    }

    /// Serialize the CloudEvent key of a record.
    pub async fn serialize_key(
        &self,
        key: &CloudEvent,
        topic: &str,
    ) -> Result<Vec<u8>, AppError> {
        key.validate()?;
        let value = serde_json::to_value(key).map_err(|e| AppError::Serialization {
            subject: subject_for(topic, CLOUD_EVENT_RECORD),
            message: e.to_string(),
        })?;
        let payload = EventPayload::Json {
            record_name: CLOUD_EVENT_RECORD.to_string(),
            value,
        };
        self.serialize(&payload, topic).await
    }

    /// Deserialize any Confluent-framed payload, resolving the embedded
    /// schema id through the cache.
    pub async fn deserialize(
        &self,
        bytes: &[u8],
        topic: &str,
    ) -> Result<DecodedPayload, AppError> {
        let schema_id = read_frame_header(bytes)?;
        let schema = self
            .registry
            .schema_by_id(schema_id, &subject_for(topic, "unknown"))
            .await
            .map_err(|e| AppError::Deserialization {
                schema_id,
                message: e.to_string(),
            })?;

        let body = &bytes[FRAME_HEADER_LEN..];
        match schema.format {
            SchemaFormat::Json => {
                let value: Value =
                    serde_json::from_slice(body).map_err(|e| AppError::Deserialization {
                        schema_id,
                        message: e.to_string(),
                    })?;
                Ok(DecodedPayload::Json { schema_id, value })
            }
            SchemaFormat::Avro => Ok(DecodedPayload::Avro {
                schema_id,
                encoded: body.to_vec(),
            }),
            SchemaFormat::Protobuf => {
                let (message_indexes, consumed) =
                    decode_message_indexes(body).map_err(|message| {
                        AppError::Deserialization { schema_id, message }
                    })?;
                Ok(DecodedPayload::Protobuf {
                    schema_id,
                    message_indexes,
                    encoded: body[consumed..].to_vec(),
                })
            }
        }
    }

    /// Deserialize a record key back into its CloudEvent envelope.
    pub async fn deserialize_key(
        &self,
        bytes: &[u8],
        topic: &str,
    ) -> Result<CloudEvent, AppError> {
        match self.deserialize(bytes, topic).await? {
            DecodedPayload::Json { schema_id, value } => serde_json::from_value(value)
                .map_err(|e| AppError::Deserialization {
                    schema_id,
                    message: format!("key is not a CloudEvent envelope: {}", e),
                }),
            other => Err(AppError::Deserialization {
                schema_id: other.schema_id(),
                message: "record keys must be JSON CloudEvent envelopes".to_string(),
            }),
        }
    }
}

/// Prepend the magic byte, big-endian schema id and, for protobuf, the
/// varint-encoded message-index array.
pub fn encode_frame(schema_id: u32, message_indexes: Option<&[i32]>, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len() + 4);
    frame.push(MAGIC_BYTE);
    frame.extend_from_slice(&schema_id.to_be_bytes());
    if let Some(indexes) = message_indexes {
        encode_message_indexes(indexes, &mut frame);
    }
    frame.extend_from_slice(payload);
    frame
}

/// Validate the frame header and return the schema id.
pub fn read_frame_header(bytes: &[u8]) -> Result<u32, AppError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(AppError::WireFormat(format!(
            "message of {} bytes is shorter than the {}-byte Confluent header",
            bytes.len(),
            FRAME_HEADER_LEN
        )));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(AppError::WireFormat(format!(
            "unknown magic byte 0x{:02x}",
            bytes[0]
        )));
    }
    let schema_id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    if schema_id == 0 {
        return Err(AppError::WireFormat(
            "schema id must be a positive integer".to_string(),
        ));
    }
    Ok(schema_id)
}

/// Confluent encodes the protobuf message-index array as zigzag varints:
/// array length followed by each index. The common single-message case
/// (`[0]`) collapses to one zero byte.
fn encode_message_indexes(indexes: &[i32], out: &mut Vec<u8>) {
    if indexes == [0] {
        out.push(0);
        return;
    }
    put_varint(zigzag_encode(indexes.len() as i64), out);
    for index in indexes {
        put_varint(zigzag_encode(i64::from(*index)), out);
    }
}

/// Returns the decoded index array and how many bytes it occupied.
fn decode_message_indexes(bytes: &[u8]) -> Result<(Vec<i32>, usize), String> {
    let (count, mut offset) = get_varint(bytes)?;
    let count = zigzag_decode(count);
    if count == 0 {
        return Ok((vec![0], offset));
    }
    if count < 0 || count > 128 {
        return Err(format!("implausible message-index array length {}", count));
    }
    let mut indexes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (raw, used) = get_varint(&bytes[offset..])?;
        offset += used;
        indexes.push(zigzag_decode(raw) as i32);
    }
    Ok((indexes, offset))
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn put_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn get_varint(bytes: &[u8]) -> Result<(u64, usize), String> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, byte) in bytes.iter().enumerate() {
        if shift > 63 {
            return Err("varint longer than 64 bits".to_string());
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err("truncated varint in message-index array".to_string())
}
