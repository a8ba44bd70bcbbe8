//service/mod.rs
pub mod capacity;
pub mod health_service;
pub mod health_worker;
pub mod node_service;
pub mod placement_service;
pub mod router;
pub mod token_service;
pub mod user_context;

use actix_web::HttpRequest;
use log::debug;
use log_mdc;

use crate::error::{StoreError, StoreResult};
use crate::service::user_context::UserContext;

/// Builds the caller's context from the `User` header and tags the log
/// context with the user and bucket for the rest of the request.
pub fn header_handler(req: &HttpRequest, bucket: &str) -> StoreResult<UserContext> {
    let user_id = req
        .headers()
        .get("User")
        .ok_or_else(|| StoreError::BadRequest("Missing User header".to_string()))?
        .to_str()
        .map_err(|_| StoreError::BadRequest("Invalid User header value".to_string()))?
        .to_string();
    if user_id.is_empty() {
        return Err(StoreError::BadRequest("Empty User header".to_string()));
    }

    log_mdc::insert("user", &user_id);
    log_mdc::insert("bucket", bucket);

    if let Some(agent) = req.headers().get("User-Agent").and_then(|h| h.to_str().ok()) {
        debug!("Request from {} via {}", user_id, agent);
    }
    Ok(UserContext::with_bucket(user_id, bucket.to_string()))
}

/// Drops the `user` and `bucket` tags left on this worker thread by an
/// earlier request
pub fn reset_log_context() {
    log_mdc::clear();
}

/// Tags the log context for requests that carry no `User` header
pub fn anonymous_context(bucket: &str) -> UserContext {
    log_mdc::insert("user", "anonymous");
    log_mdc::insert("bucket", bucket);
    UserContext::with_bucket("anonymous".to_string(), bucket.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_header_handler_with_valid_user() {
        let req = TestRequest::default()
            .insert_header(("User", "test_user"))
            .insert_header(("User-Agent", "curl/8"))
            .to_http_request();

        let context = header_handler(&req, "photos").unwrap();
        assert_eq!(context.user_id, "test_user");
        assert_eq!(context.bucket, "photos");
        assert_eq!(log_mdc::get("user", |v| v.map(str::to_string)).as_deref(), Some("test_user"));
        assert_eq!(log_mdc::get("bucket", |v| v.map(str::to_string)).as_deref(), Some("photos"));
    }

    #[test]
    fn test_header_handler_missing_user_header() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(header_handler(&req, "photos"), Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_header_handler_with_empty_user() {
        let req = TestRequest::default().insert_header(("User", "")).to_http_request();
        assert!(header_handler(&req, "photos").is_err());
    }

    #[test]
    fn test_anonymous_context() {
        let context = anonymous_context("public");
        assert_eq!(context.user_id, "anonymous");
        assert_eq!(context.bucket, "public");
    }

    #[test]
    fn test_reset_log_context_clears_tags() {
        anonymous_context("public");
        reset_log_context();
        assert!(log_mdc::get("user", |v| v.is_none()));
        assert!(log_mdc::get("bucket", |v| v.is_none()));
    }
}
