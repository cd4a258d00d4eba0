use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;

use crate::errors::AppError;
use crate::services::registry::TestRegistry;

pub async fn health(
    registry: web::Data<Arc<TestRegistry>>,
) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "active_tests": registry.active_count(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })))
}
