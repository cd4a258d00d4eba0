use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use serde::{Serialize, Deserialize};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error for subject '{subject}': {message}")]
    Serialization { subject: String, message: String },

    #[error("Deserialization error for schema id {schema_id}: {message}")]
    Deserialization { schema_id: u32, message: String },

    #[error("Wire format error: {0}")]
    WireFormat(String),

    #[error("Schema registry error: {0}")]
    SchemaRegistry(String),

    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Vault error: {0}")]
    Vault(String),

    #[error("Scenario error: {0}")]
    Scenario(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Validation(_) | AppError::Config(_) | AppError::BadRequest(_) => {
                HttpResponse::BadRequest().json(ErrorResponse::new(self))
            }
            AppError::NotFound(_) => {
                HttpResponse::NotFound().json(ErrorResponse::new(self))
            }
            AppError::Conflict(_) => {
                HttpResponse::Conflict().json(ErrorResponse::new(self))
            }
            _ => HttpResponse::InternalServerError().json(ErrorResponse::new(self)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ErrorResponse {
    fn new(error: &AppError) -> Self {
        let error_type = match error {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Serialization { .. } => "SERIALIZATION_ERROR",
            AppError::Deserialization { .. } => "DESERIALIZATION_ERROR",
            AppError::WireFormat(_) => "WIRE_FORMAT_ERROR",
            AppError::SchemaRegistry(_) => "SCHEMA_REGISTRY_ERROR",
            AppError::Kafka(_) => "KAFKA_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Vault(_) => "VAULT_ERROR",
            AppError::Scenario(_) => "SCENARIO_ERROR",
            AppError::Timeout(_) => "TIMEOUT_ERROR",
            AppError::Cancelled(_) => "CANCELLED",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        };

        Self {
            error: error_type.to_string(),
            message: error.to_string(),
        }
    }
}

// Common conversion implementations
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

// Bundle manifests and scenario scripts arrive as YAML; a parse failure
// there is a caller mistake, not a server fault.
impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Internal(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Internal(err.to_string())
    }
}

// Specific conversions for external libraries
impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        AppError::Kafka(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::SchemaRegistry(err.to_string())
    }
}
