// Copyright (c) 2025 Rajan Panneer Selvam
//
// Licensed under the Business Source License 1.1 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.mariadb.com/bsl11
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

use super::{RegisteredSchema, SchemaFormat};

#[derive(Debug, Deserialize)]
struct LatestVersionResponse {
    subject: String,
    id: u32,
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
    schema: String,
}

#[derive(Debug, Deserialize)]
struct SchemaByIdResponse {
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
    schema: String,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: u32,
}

/// One Schema Registry client per process. The two caches (subject to id,
/// id to schema) are the only thing between every produce/consume and a
/// registry HTTP round-trip; entries live until an explicit reset.
#[derive(Debug)]
pub struct SchemaRegistryClient {
    base_url: String,
    http: reqwest::Client,
    auto_register: bool,
    retry: RetryPolicy,
    max_cache_entries: Option<usize>,
    subject_ids: DashMap<String, u32>,
    schemas_by_id: DashMap<u32, RegisteredSchema>,
}

impl SchemaRegistryClient {
    pub fn new(base_url: &str, auto_register: bool, max_retries: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            auto_register,
            retry: RetryPolicy::schema_registry(max_retries),
            max_cache_entries: None,
            subject_ids: DashMap::new(),
            schemas_by_id: DashMap::new(),
        }
    }

    /// Bound the caches by entry count. Beyond the bound, lookups still
    /// work but stop being cached. Unbounded by default.
    pub fn with_cache_limit(mut self, max_cache_entries: Option<usize>) -> Self {
        self.max_cache_entries = max_cache_entries;
        self
    }

    pub fn auto_register_enabled(&self) -> bool {
        self.auto_register
    }

    /// Drop every cached entry. The next produce/consume per subject pays a
    /// registry round-trip again.
    pub fn reset_cache(&self) {
        self.subject_ids.clear();
        self.schemas_by_id.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.subject_ids.len() + self.schemas_by_id.len()
    }

    /// Latest registered schema for a subject, from cache when possible.
    pub async fn latest_for_subject(
        &self,
        subject: &str,
    ) -> Result<Option<RegisteredSchema>, AppError> {
        if let Some(id) = self.subject_ids.get(subject) {
            if let Some(schema) = self.schemas_by_id.get(&id) {
                return Ok(Some(schema.clone()));
            }
        }

        let url = format!("{}/subjects/{}/versions/latest", self.base_url, subject);
        let response = retry_with_backoff(&self.retry, || async {
            self.fetch_latest(&url).await
        })
        .await?;

        let Some(latest) = response else {
            return Ok(None);
        };

        let schema = RegisteredSchema {
            subject: latest.subject,
            schema_id: latest.id,
            format: SchemaFormat::from_registry(latest.schema_type.as_deref()),
            schema_text: latest.schema,
        };
        self.cache(schema.clone());
        debug!(
            subject = subject,
            schema_id = schema.schema_id,
            "Cached latest schema version"
        );
        Ok(Some(schema))
    }

    /// Schema lookup by the id found in a wire frame, from cache when possible.
    pub async fn schema_by_id(
        &self,
        schema_id: u32,
        subject_hint: &str,
    ) -> Result<RegisteredSchema, AppError> {
        if let Some(schema) = self.schemas_by_id.get(&schema_id) {
            return Ok(schema.clone());
        }

        let url = format!("{}/schemas/ids/{}", self.base_url, schema_id);
        let response = retry_with_backoff(&self.retry, || async {
            let response = self.http.get(&url).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = response.error_for_status()?;
            let body: SchemaByIdResponse = response.json().await?;
            Ok::<_, reqwest::Error>(Some(body))
        })
        .await
        .map_err(|e| AppError::SchemaRegistry(e.to_string()))?;

        let Some(body) = response else {
            return Err(AppError::SchemaRegistry(format!(
                "Schema id {} is not known to the registry",
                schema_id
            )));
        };

        let schema = RegisteredSchema {
            subject: subject_hint.to_string(),
            schema_id,
            format: SchemaFormat::from_registry(body.schema_type.as_deref()),
            schema_text: body.schema,
        };
        self.cache(schema.clone());
        Ok(schema)
    }

    /// Register a schema under a subject and return the minted global id.
    pub async fn register(
        &self,
        subject: &str,
        format: SchemaFormat,
        schema_text: &str,
    ) -> Result<u32, AppError> {
        let url = format!("{}/subjects/{}/versions", self.base_url, subject);
        let body = json!({
            "schemaType": format.as_str(),
            "schema": schema_text,
        });

        let response = retry_with_backoff(&self.retry, || async {
            let response = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            let body: RegisterResponse = response.json().await?;
            Ok::<_, reqwest::Error>(body)
        })
        .await
        .map_err(|e| AppError::SchemaRegistry(e.to_string()))?;

        info!(
            subject = subject,
            schema_id = response.id,
            format = format.as_str(),
            "Registered schema"
        );
        let schema = RegisteredSchema {
            subject: subject.to_string(),
            schema_id: response.id,
            format,
            schema_text: schema_text.to_string(),
        };
        self.cache(schema);
        Ok(response.id)
    }

    /// Resolve the schema a produce call must frame its payload with:
    /// cached subject, else latest registry version, else (development mode
    /// only) auto-register a schema inferred from the payload.
    pub async fn resolve_for_produce(
        &self,
        subject: &str,
        format: SchemaFormat,
        payload_json: Option<&serde_json::Value>,
    ) -> Result<RegisteredSchema, AppError> {
        if let Some(schema) = self.latest_for_subject(subject).await? {
            return Ok(schema);
        }

        if !self.auto_register {
            return Err(AppError::Serialization {
                subject: subject.to_string(),
                message: "subject is not registered and auto-registration is disabled".to_string(),
            });
        }

        let schema_text = match (format, payload_json) {
            (SchemaFormat::Json, Some(value)) => infer_json_schema(value).to_string(),
            _ => {
                return Err(AppError::Serialization {
                    subject: subject.to_string(),
                    message: format!(
                        "auto-registration is only supported for JSON payloads, not {}",
                        format.as_str()
                    ),
                })
            }
        };

        let schema_id = self.register(subject, format, &schema_text).await?;
        Ok(RegisteredSchema {
            subject: subject.to_string(),
            schema_id,
            format,
            schema_text,
        })
    }

    async fn fetch_latest(
        &self,
        url: &str,
    ) -> Result<Option<LatestVersionResponse>, reqwest::Error> {
        let response = self.http.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let body: LatestVersionResponse = response.json().await?;
        Ok(Some(body))
    }

    fn cache(&self, schema: RegisteredSchema) {
        if let Some(limit) = self.max_cache_entries {
            if self.subject_ids.len() >= limit || self.schemas_by_id.len() >= limit {
                return;
            }
        }
        self.subject_ids
            .insert(schema.subject.clone(), schema.schema_id);
        self.schemas_by_id.insert(schema.schema_id, schema);
    }
}

/// Structural JSON Schema inference for development-mode auto-registration.
fn infer_json_schema(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Null => json!({"type": "null"}),
        serde_json::Value::Bool(_) => json!({"type": "boolean"}),
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                json!({"type": "integer"})
            } else {
                json!({"type": "number"})
            }
        }
        serde_json::Value::String(_) => json!({"type": "string"}),
        serde_json::Value::Array(items) => match items.first() {
            Some(first) => json!({"type": "array", "items": infer_json_schema(first)}),
            None => json!({"type": "array"}),
        },
        serde_json::Value::Object(fields) => {
            let mut properties = serde_json::Map::new();
            for (key, field) in fields {
                properties.insert(key.clone(), infer_json_schema(field));
            }
            json!({"type": "object", "properties": properties})
        }
    }
}
