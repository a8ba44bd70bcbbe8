//! Request credentials: node bearer secrets and object read access

use actix_web::HttpRequest;
use log::warn;

use crate::app_state::AppState;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{Bucket, StoredObject};

/// Value of `Authorization`, with an optional `Bearer ` prefix removed
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    let raw = req.headers().get("Authorization")?.to_str().ok()?.trim();
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub fn api_key(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Node credential on a ping: bearer first, `X-API-Key` as fallback
pub fn node_credential(req: &HttpRequest) -> StoreResult<String> {
    bearer_token(req).or_else(|| api_key(req)).ok_or_else(|| {
        StoreError::Unauthorized("Authorization header or X-API-Key header required".to_string())
    })
}

/// Internal endpoints on a node only answer its master
pub fn require_node_secret(req: &HttpRequest, state: &AppState) -> StoreResult<()> {
    let expected = state
        .node_secret()
        .ok_or_else(|| StoreError::Unauthorized("node is not registered with a master yet".to_string()))?;
    match bearer_token(req) {
        Some(presented) if presented == expected => Ok(()),
        Some(_) => {
            warn!("Rejected internal request from {:?}: wrong secret", req.peer_addr());
            Err(StoreError::Unauthorized("invalid node secret".to_string()))
        }
        None => Err(StoreError::Unauthorized("missing bearer token".to_string())),
    }
}

/// How a read without a signature was allowed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadGrant {
    Public,
    ApiKey,
}

/// Public buckets are open; otherwise the object's effective policy must accept the API key
pub fn authorize_read(req: &HttpRequest, bucket: &Bucket, object: &StoredObject) -> StoreResult<ReadGrant> {
    if bucket.public_read {
        return Ok(ReadGrant::Public);
    }
    match api_key(req) {
        Some(key) if object.effective_policy(bucket).allows_api_key(&key) => Ok(ReadGrant::ApiKey),
        Some(_) => {
            warn!("API key rejected for object {} in bucket {}", object.id, bucket.name);
            Err(StoreError::Unauthorized("API key not allowed for this object".to_string()))
        }
        None => Err(StoreError::Unauthorized(
            "authentication required: use a signed URL or an API key".to_string(),
        )),
    }
}
