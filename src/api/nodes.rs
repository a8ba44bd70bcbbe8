// Node registry routes on the master
use actix_web::{web, Error, HttpRequest, HttpResponse};
use log::{debug, info};
use serde::Deserialize;

use crate::api::auth::node_credential;
use crate::app_state::AppState;
use crate::proxy::Registration;
use crate::service::node_service::NodeRegistration;

#[derive(Debug, Deserialize)]
pub struct PingQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNodeRequest {
    pub active: bool,
}

/// Self-registration by a storage node. Needs no credentials; the
/// response carries the secret the node must present from now on.
pub async fn self_register_handler(
    body: web::Json<Registration>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let registration = body.into_inner();
    info!("Self-registration request from {} at {}", registration.name, registration.url);
    let response = app_state.nodes.self_register(&registration)?;
    Ok(HttpResponse::Created().json(serde_json::json!({
        "success": true,
        "node_id": response.node_id,
        "secret": response.secret,
    })))
}

pub async fn ping_handler(
    query: web::Query<PingQuery>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let secret = node_credential(&req)?;
    let node = app_state.health.ping(&query.url, &secret)?;
    debug!("Ping from node {}", node.name);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "node_id": node.id,
        "healthy": node.healthy,
    })))
}

pub async fn list_nodes_handler(
    query: web::Query<ListQuery>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let nodes = app_state.nodes.list(query.active.unwrap_or(false))?;
    Ok(HttpResponse::Ok().json(nodes))
}

pub async fn register_node_handler(
    body: web::Json<NodeRegistration>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let registered = app_state.nodes.register(body.into_inner())?;
    Ok(HttpResponse::Created().json(registered))
}

pub async fn update_node_handler(
    path: web::Path<String>,
    body: web::Json<UpdateNodeRequest>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let node = app_state.nodes.set_active(&path.into_inner(), body.active)?;
    Ok(HttpResponse::Ok().json(node))
}

pub async fn sweep_health_handler(app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let reports = app_state.health.sweep().await?;
    Ok(HttpResponse::Ok().json(reports))
}

pub async fn node_health_handler(
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let report = app_state.health.probe(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(report))
}
