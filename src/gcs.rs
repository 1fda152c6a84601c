//! Google Cloud Storage JSON API client.
//!
//! An upload is two calls: a media upload that writes the bytes, then a
//! metadata patch that finalizes the object with its custom metadata.
//! Either failing is a [`StorageError`]; a finalize failure leaves the
//! bytes in the bucket without metadata.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde_json::json;
use tracing::debug;

use crate::blob::{BlobObject, BlobStore};
use crate::error::StorageError;
use crate::gcp::AccessTokenSource;

const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1/b";
const OBJECTS_BASE: &str = "https://storage.googleapis.com/storage/v1/b";

pub struct GcsBlobStore {
    bucket: String,
    http: reqwest::Client,
    tokens: Arc<AccessTokenSource>,
}

impl GcsBlobStore {
    pub fn new(http: reqwest::Client, tokens: Arc<AccessTokenSource>, bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            http,
            tokens,
        }
    }

    fn upload_url(&self, key: &str) -> Result<Url, String> {
        let mut url = Url::parse(UPLOAD_BASE).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|_| "upload base cannot be a base URL".to_string())?
            .push(&self.bucket)
            .push("o");
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }

    fn object_url(&self, key: &str) -> Result<Url, String> {
        let mut url = Url::parse(OBJECTS_BASE).map_err(|e| e.to_string())?;
        // `push` percent-encodes the `/` separators inside the object name.
        url.path_segments_mut()
            .map_err(|_| "objects base cannot be a base URL".to_string())?
            .push(&self.bucket)
            .push("o")
            .push(key);
        Ok(url)
    }

    async fn write(&self, object: &BlobObject, token: &str) -> Result<(), String> {
        let url = self.upload_url(&object.key)?;
        self.http
            .post(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, &object.content_type)
            .body(object.bytes.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn finalize(&self, object: &BlobObject, token: &str) -> Result<(), String> {
        let url = self.object_url(&object.key)?;
        self.http
            .patch(url)
            .bearer_auth(token)
            .json(&json!({
                "contentType": object.content_type,
                "metadata": object.metadata,
            }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, object: BlobObject) -> Result<(), StorageError> {
        let token = self.tokens.token().await.map_err(|reason| StorageError::Write {
            key: object.key.clone(),
            reason,
        })?;

        self.write(&object, &token)
            .await
            .map_err(|reason| StorageError::Write {
                key: object.key.clone(),
                reason,
            })?;

        self.finalize(&object, &token)
            .await
            .map_err(|reason| StorageError::Finalize {
                key: object.key.clone(),
                reason,
            })?;

        debug!(bucket = %self.bucket, key = %object.key, bytes = object.bytes.len(), "Object stored");
        Ok(())
    }
}
