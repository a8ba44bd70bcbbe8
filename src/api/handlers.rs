// Master object routes: buckets, uploads, signed URLs and downloads
use actix_web::{web, Error, HttpRequest, HttpResponse};
use bytes::BytesMut;
use futures::StreamExt;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::api::auth::{authorize_read, ReadGrant};
use crate::app_state::AppState;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{AuthPolicy, Bucket, ObjectCatalog, StoredObject};
use crate::service::placement_service::UploadRequest;
use crate::service::router::ObjectContent;
use crate::service::{anonymous_context, header_handler};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
pub struct CreateBucketRequest {
    pub name: String,
    #[serde(default)]
    pub public_read: bool,
    #[serde(default)]
    pub auth_policy: Option<AuthPolicy>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct SignedUrlRequest {
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub single_use: bool,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
pub struct ServeQuery {
    pub signature: Option<String>,
}

fn bucket_by_name(state: &AppState, name: &str) -> StoreResult<Bucket> {
    state
        .metadata
        .find_bucket_by_name(name)?
        .ok_or_else(|| StoreError::NotFound(format!("bucket {}", name)))
}

fn object_in(state: &AppState, bucket: &Bucket, object_id: &str) -> StoreResult<StoredObject> {
    state
        .metadata
        .find_object(&bucket.id, object_id)?
        .ok_or_else(|| StoreError::NotFound(format!("object {}", object_id)))
}

pub async fn create_bucket_handler(
    body: web::Json<CreateBucketRequest>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let body = body.into_inner();
    let context = header_handler(&req, &body.name)?;
    if body.name.trim().is_empty() {
        return Err(StoreError::BadRequest("bucket name is required".to_string()).into());
    }

    let bucket = Bucket::new(
        &body.name,
        &context.user_id,
        body.public_read,
        body.auth_policy.unwrap_or_default(),
    );
    app_state.metadata.create_bucket(&bucket)?;
    info!("Created bucket {} for {}", bucket.name, context.user_id);
    Ok(HttpResponse::Created().json(bucket))
}

pub async fn upload_handler(
    path: web::Path<String>,
    query: web::Query<UploadQuery>,
    mut payload: web::Payload,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let bucket_name = path.into_inner();
    let context = header_handler(&req, &bucket_name)?;
    let bucket = bucket_by_name(&app_state, &bucket_name)?;

    let limit = app_state.config.server.max_payload_size;
    let mut bytes = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("Error reading payload chunk: {}", e);
            StoreError::BadRequest("error reading payload".to_string())
        })?;
        if bytes.len() + chunk.len() > limit {
            return Err(StoreError::BadRequest(format!("payload exceeds {} bytes", limit)).into());
        }
        bytes.extend_from_slice(&chunk);
    }
    if bytes.is_empty() {
        warn!("Empty payload for upload to {}", bucket_name);
        return Err(StoreError::BadRequest("empty payload".to_string()).into());
    }

    let content_type = req
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    debug!("Upload of {} ({} bytes) to {}", query.filename, bytes.len(), bucket_name);
    let object = app_state
        .placement
        .place(UploadRequest {
            bucket,
            filename: query.into_inner().filename,
            content_type,
            uploaded_by: context.user_id,
            auth_policy: None,
            data: bytes.freeze(),
        })
        .await?;
    Ok(HttpResponse::Created().json(object))
}

pub async fn object_info_handler(
    path: web::Path<(String, String)>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (bucket_name, object_id) = path.into_inner();
    header_handler(&req, &bucket_name)?;
    let bucket = bucket_by_name(&app_state, &bucket_name)?;
    let object = object_in(&app_state, &bucket, &object_id)?;
    Ok(HttpResponse::Ok().json(object))
}

pub async fn delete_object_handler(
    path: web::Path<(String, String)>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (bucket_name, object_id) = path.into_inner();
    let context = header_handler(&req, &bucket_name)?;
    let bucket = bucket_by_name(&app_state, &bucket_name)?;
    let object = object_in(&app_state, &bucket, &object_id)?;

    app_state.router.delete(&bucket, &object).await?;
    info!("{} deleted object {} from {}", context.user_id, object_id, bucket_name);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": true, "id": object_id })))
}

pub async fn signed_url_handler(
    path: web::Path<(String, String)>,
    body: Option<web::Json<SignedUrlRequest>>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (bucket_name, object_id) = path.into_inner();
    header_handler(&req, &bucket_name)?;
    let bucket = bucket_by_name(&app_state, &bucket_name)?;
    let object = object_in(&app_state, &bucket, &object_id)?;

    let request = body.map(|b| b.into_inner()).unwrap_or(SignedUrlRequest {
        expires_in: default_expires_in(),
        single_use: false,
    });
    let signed = app_state
        .tokens
        .issue(&bucket, &object, request.expires_in, request.single_use)?;
    Ok(HttpResponse::Ok().json(signed))
}

/// Serves object content to anyone holding a valid signature, to anyone
/// for public buckets, or to callers whose API key the policy accepts.
pub async fn serve_file_handler(
    path: web::Path<(String, String)>,
    query: web::Query<ServeQuery>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (bucket_id, object_id) = path.into_inner();

    if let Some(signature) = query.into_inner().signature.filter(|s| !s.is_empty()) {
        let access = match app_state.tokens.validate(&signature) {
            Ok(access) => access,
            Err(e) => {
                if e.is_expiry_or_replay() {
                    info!("Refused signed read of {}: {}", object_id, e);
                }
                return Err(e.into());
            }
        };
        if !access.grants(&bucket_id, &object_id) {
            warn!("Signature for {} presented for {}/{}", access.object.id, bucket_id, object_id);
            return Err(StoreError::Unauthorized("signature does not grant this object".to_string()).into());
        }
        anonymous_context(&access.bucket.name);

        let content = app_state.router.open(&access.object).await?;
        app_state.tokens.mark_used(&signature)?;
        return Ok(content_response(&access.object, content, false));
    }

    let bucket = app_state
        .metadata
        .find_bucket(&bucket_id)?
        .ok_or_else(|| StoreError::NotFound(format!("bucket {}", bucket_id)))?;
    anonymous_context(&bucket.name);
    let object = object_in(&app_state, &bucket, &object_id)?;
    let grant = authorize_read(&req, &bucket, &object)?;

    let content = app_state.router.open(&object).await?;
    Ok(content_response(&object, content, grant == ReadGrant::Public))
}

fn content_response(object: &StoredObject, content: ObjectContent, cacheable: bool) -> HttpResponse {
    let mut builder = HttpResponse::Ok();
    builder
        .content_type(content.content_type)
        .insert_header((
            "Content-Disposition",
            format!("inline; filename=\"{}\"", object.name.replace('"', "")),
        ))
        .insert_header((
            "Cache-Control",
            if cacheable { "public, max-age=3600" } else { "private, no-store" },
        ));
    if let Some(length) = content.content_length {
        builder.no_chunking(length);
    }
    builder.streaming(content.body)
}

pub async fn capacity_handler(app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let report = app_state.capacity.report()?;
    Ok(HttpResponse::Ok().json(report))
}
