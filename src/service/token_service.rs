//! Capability tokens: signed, expiring, optionally single-use object links
//!
//! A token's signature is the hex HMAC-SHA256 of `bucket_id:object_id`
//! under the server secret and doubles as its primary key, so issuing twice
//! for the same object while a token is still usable returns that token.

use crate::config::SigningConfig;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{
    AccessMethod, AuthPolicy, Bucket, CapabilityToken, InsertOutcome, MetadataStorage, ObjectCatalog,
    StoredObject, TokenStore,
};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use log::{debug, info, warn};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub signature: String,
    pub expires_at: DateTime<Utc>,
    pub single_use: bool,
}

/// A validated token and the bucket and object it grants
#[derive(Debug, Clone)]
pub struct ResolvedAccess {
    pub token: CapabilityToken,
    pub bucket: Bucket,
    pub object: StoredObject,
}

impl ResolvedAccess {
    pub fn grants(&self, bucket_id: &str, object_id: &str) -> bool {
        self.bucket.id == bucket_id && self.object.id == object_id
    }
}

pub struct CapabilityTokenService {
    metadata: Arc<dyn MetadataStorage>,
    secret: Vec<u8>,
    base_url: String,
    min_ttl_secs: i64,
    max_ttl_secs: i64,
}

impl CapabilityTokenService {
    pub fn new(metadata: Arc<dyn MetadataStorage>, signing: &SigningConfig, base_url: &str) -> Self {
        Self {
            metadata,
            secret: signing.secret.as_bytes().to_vec(),
            base_url: base_url.trim_end_matches('/').to_string(),
            min_ttl_secs: signing.min_ttl_secs,
            max_ttl_secs: signing.max_ttl_secs,
        }
    }

    fn mac(&self, bucket_id: &str, object_id: &str) -> StoreResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| StoreError::Internal(format!("invalid signing key: {}", e)))?;
        mac.update(bucket_id.as_bytes());
        mac.update(b":");
        mac.update(object_id.as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, bucket_id: &str, object_id: &str) -> StoreResult<String> {
        Ok(hex::encode(self.mac(bucket_id, object_id)?.finalize().into_bytes()))
    }

    fn verify(&self, bucket_id: &str, object_id: &str, signature: &str) -> StoreResult<bool> {
        let Ok(raw) = hex::decode(signature) else {
            return Ok(false);
        };
        Ok(self.mac(bucket_id, object_id)?.verify_slice(&raw).is_ok())
    }

    pub fn url_for(&self, bucket_id: &str, object_id: &str, signature: &str) -> String {
        format!(
            "{}/api/v1/file/{}/{}?signature={}",
            self.base_url, bucket_id, object_id, signature
        )
    }

    fn check_ttl(&self, policy: &AuthPolicy, ttl_secs: i64, single_use: bool) -> StoreResult<()> {
        if ttl_secs < self.min_ttl_secs || ttl_secs > self.max_ttl_secs {
            return Err(StoreError::BadRequest(format!(
                "expires_in must be between {} and {} seconds",
                self.min_ttl_secs, self.max_ttl_secs
            )));
        }
        if let AuthPolicy::SignedUrl { max_ttl_secs, allow_single_use } = policy {
            if ttl_secs > *max_ttl_secs {
                return Err(StoreError::BadRequest(format!(
                    "bucket policy limits signed URLs to {} seconds",
                    max_ttl_secs
                )));
            }
            if single_use && !allow_single_use {
                return Err(StoreError::BadRequest(
                    "bucket policy does not allow single-use URLs".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn issue(&self, bucket: &Bucket, object: &StoredObject, ttl_secs: i64, single_use: bool) -> StoreResult<SignedUrl> {
        self.issue_at(bucket, object, ttl_secs, single_use, Utc::now())
    }

    pub fn issue_at(
        &self,
        bucket: &Bucket,
        object: &StoredObject,
        ttl_secs: i64,
        single_use: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<SignedUrl> {
        self.check_ttl(object.effective_policy(bucket), ttl_secs, single_use)?;
        let signature = self.sign(&bucket.id, &object.id)?;

        if let Some(existing) = self.metadata.find_token(&signature)? {
            if !existing.is_expired_at(now) {
                // A consumed link stays dead until it expires, the signature cannot change
                if existing.is_consumed() {
                    info!("Refusing to revive spent single-use URL for {}/{}", bucket.name, object.name);
                    return Err(StoreError::TokenAlreadyUsed);
                }
                debug!("Reusing signed URL for {}/{}", bucket.name, object.name);
                return Ok(self.signed_url(&bucket.id, &object.id, &existing));
            }
            self.metadata.delete_token(&signature)?;
        }

        let token = CapabilityToken {
            signature: signature.clone(),
            bucket_name: bucket.name.clone(),
            object_name: object.name.clone(),
            method: AccessMethod::Get,
            expires_at: now + Duration::seconds(ttl_secs),
            single_use,
            used: false,
            used_at: None,
            created_at: now,
        };
        let token = match self.metadata.insert_token(&token)? {
            InsertOutcome::Inserted => {
                info!(
                    "Issued signed URL for {}/{} valid until {}",
                    bucket.name, object.name, token.expires_at
                );
                token
            }
            // A concurrent issue won the insert
            InsertOutcome::AlreadyExists => self
                .metadata
                .find_token(&signature)?
                .ok_or_else(|| StoreError::Internal("token vanished after duplicate insert".to_string()))?,
        };
        Ok(self.signed_url(&bucket.id, &object.id, &token))
    }

    fn signed_url(&self, bucket_id: &str, object_id: &str, token: &CapabilityToken) -> SignedUrl {
        SignedUrl {
            url: self.url_for(bucket_id, object_id, &token.signature),
            signature: token.signature.clone(),
            expires_at: token.expires_at,
            single_use: token.single_use,
        }
    }

    /// Check a presented signature without consuming it
    pub fn validate(&self, signature: &str) -> StoreResult<ResolvedAccess> {
        self.validate_at(signature, Utc::now())
    }

    pub fn validate_at(&self, signature: &str, now: DateTime<Utc>) -> StoreResult<ResolvedAccess> {
        let token = self.metadata.find_token(signature)?.ok_or(StoreError::TokenNotFound)?;

        if token.is_expired_at(now) {
            self.metadata.delete_token(signature)?;
            debug!("Pruned expired token for {}/{}", token.bucket_name, token.object_name);
            return Err(StoreError::TokenExpired);
        }
        if token.is_consumed() {
            return Err(StoreError::TokenAlreadyUsed);
        }

        let Some(bucket) = self.metadata.find_bucket_by_name(&token.bucket_name)? else {
            warn!("Possible tampering: token names unknown bucket {}", token.bucket_name);
            return Err(StoreError::IntegrityFailure);
        };
        // Names are not unique within a bucket; the signature picks the object
        let candidates: Vec<StoredObject> = self
            .metadata
            .list_objects(&bucket.id)?
            .into_iter()
            .filter(|o| o.name == token.object_name)
            .collect();
        if candidates.is_empty() {
            warn!(
                "Possible tampering: token for {}/{} no longer resolves to an object",
                token.bucket_name, token.object_name
            );
            return Err(StoreError::IntegrityFailure);
        }
        for object in candidates {
            if self.verify(&bucket.id, &object.id, &token.signature)? {
                return Ok(ResolvedAccess { token, bucket, object });
            }
        }
        warn!(
            "Possible tampering: signature mismatch for {}/{}",
            token.bucket_name, token.object_name
        );
        Err(StoreError::IntegrityFailure)
    }

    /// Consume a single-use token; multi-use tokens are left alone
    pub fn mark_used(&self, signature: &str) -> StoreResult<()> {
        let token = self.metadata.find_token(signature)?.ok_or(StoreError::TokenNotFound)?;
        if !token.single_use {
            return Ok(());
        }
        self.metadata.mark_token_used(signature, Utc::now())?;
        debug!("Consumed single-use token for {}/{}", token.bucket_name, token.object_name);
        Ok(())
    }
}
