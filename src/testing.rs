//! In-memory collaborators shared by the manager, scheduler and API tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::backup::credentials::DatabaseCredentials;
use crate::backup::executor::DatabaseExecutor;
use crate::errors::{BackupError, Result};
use crate::storage::{ObjectStore, ObjectSummary};

pub fn at_minute(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute as i64)
}

struct StoredObject {
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashSet<String>>,
    objects: Mutex<HashMap<String, StoredObject>>,
    pub gets: AtomicUsize,
    pub lists: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn insert(&self, key: &str, body: &[u8], last_modified: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                last_modified,
            },
        );
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().unwrap().contains(bucket)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets.lock().unwrap().insert(bucket.to_string());
        Ok(())
    }

    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.insert(key, &body, Utc::now());
        Ok(())
    }

    async fn get_object(&self, _bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| BackupError::DownloadFailed {
                key: key.to_string(),
                message: "NoSuchKey".into(),
            })
    }

    async fn list_objects(&self, _bucket: &str, max_keys: Option<i32>) -> Result<Vec<ObjectSummary>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        // S3 lists in key order.
        let objects = self.objects.lock().unwrap();
        let mut summaries: Vec<ObjectSummary> = objects
            .iter()
            .map(|(key, o)| ObjectSummary {
                key: key.clone(),
                size: o.body.len() as u64,
                last_modified: o.last_modified,
            })
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(max) = max_keys {
            summaries.truncate(max.max(0) as usize);
        }
        Ok(summaries)
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Executor that never spawns anything. Dumps optionally take `delay` of
/// (tokio) time so shutdown behaviour can be observed.
#[derive(Default)]
pub struct FakeExecutor {
    payload: Vec<u8>,
    delay: Duration,
    pub dumps_started: AtomicUsize,
    pub dumps_finished: AtomicUsize,
    pub restores: Mutex<Vec<Vec<u8>>>,
}

impl FakeExecutor {
    pub fn with_payload(payload: Vec<u8>) -> Self {
        FakeExecutor {
            payload,
            ..Default::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        FakeExecutor {
            payload: b"-- slow dump\n".to_vec(),
            delay,
            ..Default::default()
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn started(&self) -> usize {
        self.dumps_started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.dumps_finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseExecutor for FakeExecutor {
    async fn dump(&self, _credentials: &DatabaseCredentials) -> Result<Vec<u8>> {
        self.dumps_started.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.dumps_finished.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }

    async fn restore(&self, _credentials: &DatabaseCredentials, payload: Vec<u8>) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.restores.lock().unwrap().push(payload);
        Ok(())
    }
}
