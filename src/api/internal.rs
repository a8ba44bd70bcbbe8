// Storage node endpoints, called by the master only
use actix_multipart::Multipart;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use bytes::BytesMut;
use futures::TryStreamExt;
use log::{debug, warn};
use serde::Deserialize;

use crate::api::auth::require_node_secret;
use crate::app_state::AppState;
use crate::error::StoreError;
use crate::service::node_service::IncomingObject;

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub bucket_id: String,
    pub file_id: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub bucket_name: String,
    pub file_name: String,
}

fn multipart_error(e: actix_multipart::MultipartError) -> StoreError {
    warn!("Malformed multipart upload: {}", e);
    StoreError::BadRequest(format!("malformed multipart body: {}", e))
}

pub async fn internal_upload_handler(
    mut payload: Multipart,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_node_secret(&req, &app_state)?;

    let limit = app_state.config.server.max_payload_size;
    let mut incoming = IncomingObject::default();
    let mut data: Option<BytesMut> = None;

    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        let name = field.name().to_string();
        let mut value = BytesMut::new();
        while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
            if value.len() + chunk.len() > limit {
                return Err(StoreError::BadRequest(format!("payload exceeds {} bytes", limit)).into());
            }
            value.extend_from_slice(&chunk);
        }

        if name == "file" {
            data = Some(value);
            continue;
        }
        let text = String::from_utf8_lossy(&value).trim().to_string();
        match name.as_str() {
            "bucket_id" => incoming.bucket_id = text,
            "bucket_name" => incoming.bucket_name = text,
            "file_id" => incoming.object_id = text,
            "filename" => incoming.filename = text,
            other => debug!("Ignoring multipart field {}", other),
        }
    }

    let data = data.ok_or_else(|| StoreError::BadRequest("missing file field".to_string()))?;
    let stored = app_state.node_objects.store(&incoming, &data)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "file_id": stored.object_id,
        "size": stored.size,
    })))
}

pub async fn internal_file_handler(
    query: web::Query<FileQuery>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_node_secret(&req, &app_state)?;

    let (row, data) = app_state.node_objects.read(&query.bucket_id, &query.file_id)?;
    let filename = query.filename.clone().unwrap_or(row.filename);
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header(("Content-Disposition", format!("attachment; filename=\"{}\"", filename.replace('"', ""))))
        .body(data))
}

/// Always answers 200; `deleted` is false when nothing was held
pub async fn internal_delete_handler(
    query: web::Query<DeleteQuery>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_node_secret(&req, &app_state)?;

    let deleted = app_state.node_objects.delete(&query.bucket_name, &query.file_name)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true, "deleted": deleted })))
}
