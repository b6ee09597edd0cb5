//! Read-only object store client.
//!
//! Slides live in a single bucket of an S3-compatible store (MinIO in most
//! deployments). The tile service only ever reads from it: either the whole
//! object into memory, or as a stream that is copied straight to disk.

use std::pin::Pin;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::error::StoreError;

/// Streaming body returned by [`ObjectStore::fetch_stream`].
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Read access to the objects of one bucket.
///
/// Paths are object keys; a leading `/` is ignored.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Read an object fully into memory.
    async fn fetch_all(&self, path: &str) -> Result<Bytes, StoreError>;

    /// Open a streaming read of an object.
    ///
    /// The body is not buffered; dropping the reader releases the connection.
    async fn fetch_stream(&self, path: &str) -> Result<ObjectReader, StoreError>;
}

/// S3-backed [`ObjectStore`] scoped to a single bucket.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

/// Outcome of the startup bucket probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Exists,
    Created,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Check that the bucket exists, creating it when `create` is set.
    pub async fn ensure_bucket(
        &self,
        region: &str,
        create: bool,
    ) -> Result<BucketStatus, StoreError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(BucketStatus::Exists),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                    || status_is_404(&e);
                if !missing {
                    return Err(StoreError::Transport(e.to_string()));
                }
                if !create {
                    return Err(StoreError::NotFound(format!("bucket {}", self.bucket)));
                }
            }
        }

        info!(bucket = %self.bucket, "Bucket does not exist, creating it");
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(BucketStatus::Created)
    }

    /// Look up an object and return its size in bytes.
    pub async fn head(&self, path: &str) -> Result<u64, StoreError> {
        let key = object_key(path);
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if is_not_found || status_is_404(&e) {
                    StoreError::NotFound(path.to_string())
                } else {
                    StoreError::Transport(e.to_string())
                }
            })?;

        Ok(head.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn get_object(
        &self,
        path: &str,
    ) -> Result<aws_sdk_s3::operation::get_object::GetObjectOutput, StoreError> {
        let key = object_key(path);
        debug!(bucket = %self.bucket, key = %key, "GET object");

        self.client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let is_no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if is_no_such_key || status_is_404(&e) {
                    return StoreError::NotFound(path.to_string());
                }

                // Some S3-compatible stores only report the code in the message
                let err_str = e.to_string();
                if err_str.contains("NoSuchKey") || err_str.contains("NotFound") {
                    return StoreError::NotFound(path.to_string());
                }

                StoreError::Transport(err_str)
            })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn fetch_all(&self, path: &str) -> Result<Bytes, StoreError> {
        let resp = self.get_object(path).await?;
        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?
            .into_bytes();
        Ok(data)
    }

    async fn fetch_stream(&self, path: &str) -> Result<ObjectReader, StoreError> {
        let resp = self.get_object(path).await?;
        Ok(Box::pin(resp.body.into_async_read()))
    }
}

fn status_is_404<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response()
        .map(|r| r.status().as_u16() == 404)
        .unwrap_or(false)
}

/// Object key for a slide path.
pub fn object_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Normalize an endpoint given as `host:port` or as a full URL.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

/// Create an S3 client for an S3-compatible endpoint with static credentials.
///
/// Path-style addressing is always used, which is what MinIO expects.
pub async fn create_s3_client(
    endpoint: &str,
    region: &str,
    access_key: &str,
    secret_key: &str,
) -> Client {
    let credentials =
        aws_sdk_s3::config::Credentials::new(access_key, secret_key, None, None, "static");

    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .endpoint_url(normalize_endpoint(endpoint))
        .credentials_provider(credentials)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();

    Client::from_conf(s3_config)
}
