use actix_web::web;

use crate::controllers::{health, test_run};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health))
            .route("/test/initialize", web::post().to(test_run::initialize))
            .route("/test/start", web::post().to(test_run::start))
            .route("/test", web::get().to(test_run::list_active))
            .route("/test/{id}/status", web::get().to(test_run::status))
            .route("/test/{id}", web::delete().to(test_run::delete)),
    );
}
