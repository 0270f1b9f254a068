pub(crate) mod s3; // aws-sdk-s3 adapter (MinIO / Spaces / S3)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::errors::Result;

pub use s3::S3ObjectStore;

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// The bucket operations the backup manager needs. Implementations must be
/// safe to share between the scheduler and the control surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Succeeds whether or not the bucket already existed.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// `max_keys = None` lists the whole bucket.
    async fn list_objects(&self, bucket: &str, max_keys: Option<i32>) -> Result<Vec<ObjectSummary>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}
