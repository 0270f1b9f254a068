// letsee-backup/src/storage/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use std::collections::HashMap;
use tracing::{debug, error, info};

use super::{ObjectStore, ObjectSummary};
use crate::config::StorageConfig;
use crate::errors::{BackupError, Result};

/// S3-compatible object storage (MinIO in the reference deployment).
///
/// The SDK client is cheap to clone and safe to use from concurrent tasks.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: s3::Client,
}

impl S3ObjectStore {
    pub async fn connect(storage: &StorageConfig) -> Self {
        info!(endpoint = %storage.endpoint_url, region = %storage.region, "Configuring S3 client");

        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&storage.endpoint_url)
            .region(Region::new(storage.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &storage.access_key_id,
                &storage.secret_access_key,
                None, // session_token
                None, // expiry
                "Static",
            ))
            .load()
            .await;

        // MinIO does not serve virtual-hosted bucket names.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self::from_client(s3::Client::from_conf(s3_config))
    }

    pub fn from_client(client: s3::Client) -> Self {
        S3ObjectStore { client }
    }
}

fn sdk_message<E: std::error::Error>(err: E) -> String {
    DisplayErrorContext(err).to_string()
}

fn to_utc(ts: &s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos()).unwrap_or_default()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.client.head_bucket().bucket(bucket).send().await.is_ok() {
            debug!(bucket, "Bucket already exists");
            return Ok(());
        }

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!(bucket, "Created backup bucket");
                Ok(())
            }
            Err(e) => {
                // Another process may have created it between the two calls.
                if self.client.head_bucket().bucket(bucket).send().await.is_ok() {
                    return Ok(());
                }
                error!(bucket, error = %sdk_message(&e), "Failed to create backup bucket");
                Err(BackupError::BucketEnsureFailed {
                    bucket: bucket.to_string(),
                    message: sdk_message(e),
                })
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| BackupError::UploadFailed {
                key: key.to_string(),
                message: sdk_message(e),
            })?;

        debug!(bucket, key, bytes = size, "Uploaded object");
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BackupError::DownloadFailed {
                key: key.to_string(),
                message: sdk_message(e),
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| BackupError::DownloadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?
            .into_bytes()
            .to_vec();

        debug!(bucket, key, bytes = data.len(), "Downloaded object");
        Ok(data)
    }

    async fn list_objects(&self, bucket: &str, max_keys: Option<i32>) -> Result<Vec<ObjectSummary>> {
        let mut summaries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_max_keys(max_keys)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| BackupError::ListFailed {
                    bucket: bucket.to_string(),
                    message: sdk_message(e),
                })?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                summaries.push(ObjectSummary {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().map(to_utc).unwrap_or_default(),
                });
            }

            // A bounded listing is a single page, like MaxKeys on the wire.
            if max_keys.is_some() || !page.is_truncated().unwrap_or(false) {
                break;
            }
            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(summaries)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BackupError::DeleteFailed {
                key: key.to_string(),
                message: sdk_message(e),
            })?;
        Ok(())
    }
}
