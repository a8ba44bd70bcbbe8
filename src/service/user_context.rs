//! Identity of the caller of a request

use serde::{Deserialize, Serialize};

/// Who is calling and which bucket the request is about
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    pub user_id: String,
    /// Bucket name taken from the request path
    pub bucket: String,
}

impl UserContext {
    pub fn with_bucket(user_id: String, bucket: String) -> Self {
        Self { user_id, bucket }
    }
}
