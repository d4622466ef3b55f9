use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::errors::Status;

const KEY_LEN: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogRecord {
    pub author_id: String,
    pub title: String,
    pub content: String,
}

/// Opaque store-generated key: 12 bytes shown as 24 lower-case hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey([u8; KEY_LEN]);

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for RecordKey {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.len() != KEY_LEN * 2 || !value.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(StoreError::BadKey(value.to_string()));
        }

        let mut bytes = [0u8; KEY_LEN];
        for (index, byte) in bytes.iter_mut().enumerate() {
            let pair = &value[index * 2..index * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| StoreError::BadKey(value.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("cannot parse record key {0:?}")]
    BadKey(String),
    #[error("no record with key {0}")]
    NotFound(RecordKey),
    #[error("record store failure: {0}")]
    Backend(String),
}

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::BadKey(_) => Status::invalid_argument(err.to_string()),
            StoreError::NotFound(_) => Status::not_found(err.to_string()),
            StoreError::Backend(_) => Status::internal(err),
        }
    }
}

/// Snapshot of the store taken by [`RecordStore::list_all`]. Finite; a new
/// listing needs a new cursor.
#[derive(Debug, Default)]
pub struct RecordCursor {
    rows: VecDeque<(RecordKey, BlogRecord)>,
}

impl RecordCursor {
    pub fn new(rows: impl IntoIterator<Item = (RecordKey, BlogRecord)>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }
}

impl Iterator for RecordCursor {
    type Item = (RecordKey, BlogRecord);

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.pop_front()
    }
}

/// Keyed record storage used by the blog service. Implementations serialise
/// conflicting writes per key; a successful write is visible to the next read.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: BlogRecord) -> Result<RecordKey, StoreError>;
    async fn read(&self, key: &RecordKey) -> Result<BlogRecord, StoreError>;
    async fn update(&self, key: &RecordKey, record: BlogRecord) -> Result<BlogRecord, StoreError>;
    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError>;
    async fn list_all(&self) -> Result<RecordCursor, StoreError>;
}

#[derive(Debug)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<RecordKey, BlogRecord>>,
    counter: AtomicU64,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::from(elapsed.subsec_nanos()))
            .unwrap_or_default();
        Self {
            records: RwLock::new(BTreeMap::new()),
            counter: AtomicU64::new(seed << 16),
        }
    }

    fn next_key(&self) -> RecordKey {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or_default();
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; KEY_LEN];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..].copy_from_slice(&sequence.to_be_bytes());
        RecordKey(bytes)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, record: BlogRecord) -> Result<RecordKey, StoreError> {
        let mut records = self.records.write().await;
        let mut key = self.next_key();
        while records.contains_key(&key) {
            key = self.next_key();
        }
        records.insert(key, record);
        Ok(key)
    }

    async fn read(&self, key: &RecordKey) -> Result<BlogRecord, StoreError> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound(*key))
    }

    async fn update(&self, key: &RecordKey, record: BlogRecord) -> Result<BlogRecord, StoreError> {
        let mut records = self.records.write().await;
        let slot = records.get_mut(key).ok_or(StoreError::NotFound(*key))?;
        *slot = record.clone();
        Ok(record)
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound(*key))
    }

    async fn list_all(&self) -> Result<RecordCursor, StoreError> {
        let records = self.records.read().await;
        Ok(RecordCursor::new(
            records.iter().map(|(key, record)| (*key, record.clone())),
        ))
    }
}
