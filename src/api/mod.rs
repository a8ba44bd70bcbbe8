//! HTTP surface
//!
//! The master and node roles mount different route sets under `/api/v1`.
//! Every handler returns `Result<HttpResponse, actix_web::Error>` and lets
//! `StoreError` pick the status code.

pub mod auth;
pub mod handlers;
pub mod internal;
pub mod nodes;

use actix_web::dev::{Service, ServiceRequest, ServiceResponse};
use actix_web::{web, Error, HttpResponse};

use crate::app_state::AppState;
use crate::service::reset_log_context;

/// `wrap_fn` middleware: every request starts with no `user`/`bucket` log tags
pub fn fresh_log_context<S, B>(req: ServiceRequest, srv: &S) -> S::Future
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    reset_log_context();
    srv.call(req)
}

pub async fn health_handler(app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "role": app_state.config.role,
    })))
}

pub fn configure_master(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_handler))
            .route("/capacity", web::get().to(handlers::capacity_handler))
            .route("/buckets", web::post().to(handlers::create_bucket_handler))
            .route("/buckets/{bucket}/files", web::post().to(handlers::upload_handler))
            .route("/buckets/{bucket}/files/{file}/info", web::get().to(handlers::object_info_handler))
            .route("/buckets/{bucket}/files/{file}/signed-url", web::post().to(handlers::signed_url_handler))
            .route("/buckets/{bucket}/files/{file}", web::delete().to(handlers::delete_object_handler))
            .route("/file/{bucket_id}/{file_id}", web::get().to(handlers::serve_file_handler))
            .route("/node/register", web::post().to(nodes::self_register_handler))
            .route("/node/ping", web::post().to(nodes::ping_handler))
            // Literal segment before the {id} routes
            .route("/nodes/health", web::get().to(nodes::sweep_health_handler))
            .route("/nodes", web::get().to(nodes::list_nodes_handler))
            .route("/nodes", web::post().to(nodes::register_node_handler))
            .route("/nodes/{id}", web::patch().to(nodes::update_node_handler))
            .route("/nodes/{id}/health", web::get().to(nodes::node_health_handler)),
    );
}

pub fn configure_node(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_handler))
            .route("/internal/upload", web::post().to(internal::internal_upload_handler))
            .route("/internal/file", web::get().to(internal::internal_file_handler))
            .route("/internal/delete", web::delete().to(internal::internal_delete_handler)),
    );
}
