use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::services::registry::TestRegistry;

#[derive(Debug, Serialize, Deserialize)]
pub struct InitializeResponse {
    #[serde(rename = "test-id")]
    pub test_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartTestRequest {
    #[serde(rename = "test-id")]
    pub test_id: Uuid,
    #[serde(rename = "block-storage-path")]
    pub block_storage_path: String,
    #[serde(rename = "test-type")]
    pub test_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartTestResponse {
    #[serde(rename = "test-id")]
    pub test_id: Uuid,
    pub accepted: bool,
    #[serde(rename = "test-type")]
    pub test_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListActiveResponse {
    pub active: Vec<Uuid>,
}

/// Thin HTTP shims over the registry; all per-test work happens inside
/// the owning engine.
pub struct TestRunController {
    registry: Arc<TestRegistry>,
}

impl TestRunController {
    pub fn new(registry: Arc<TestRegistry>) -> Self {
        Self { registry }
    }
}

/// Bucket names arrive as object-storage paths (`s3://bucket/...` or a
/// bare bucket name).
pub fn bucket_from_path(path: &str) -> Result<String, AppError> {
    let trimmed = path.trim();
    let without_scheme = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => trimmed,
    };
    let bucket = without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();
    if bucket.is_empty() {
        return Err(AppError::BadRequest(format!(
            "No bucket in block storage path '{}'",
            path
        )));
    }
    Ok(bucket)
}

pub async fn initialize(
    controller: web::Data<TestRunController>,
) -> Result<impl Responder, AppError> {
    let test_id = controller.registry.initialize();
    Ok(HttpResponse::Ok().json(InitializeResponse { test_id }))
}

pub async fn start(
    controller: web::Data<TestRunController>,
    request: web::Json<StartTestRequest>,
) -> Result<impl Responder, AppError> {
    let request = request.into_inner();
    let bucket = bucket_from_path(&request.block_storage_path)?;

    let response = match controller
        .registry
        .start(request.test_id, &bucket, &request.test_type)
        .await
    {
        Ok(()) => StartTestResponse {
            test_id: request.test_id,
            accepted: true,
            test_type: request.test_type,
            error: None,
        },
        Err(e) => {
            info!(test_id = %request.test_id, "Start rejected: {}", e);
            StartTestResponse {
                test_id: request.test_id,
                accepted: false,
                test_type: request.test_type,
                error: Some(e.to_string()),
            }
        }
    };
    Ok(HttpResponse::Ok().json(response))
}

pub async fn status(
    controller: web::Data<TestRunController>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, AppError> {
    let response = controller.registry.status(path.into_inner())?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn delete(
    controller: web::Data<TestRunController>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, AppError> {
    controller.registry.delete(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_active(
    controller: web::Data<TestRunController>,
) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(ListActiveResponse {
        active: controller.registry.list_active(),
    }))
}
