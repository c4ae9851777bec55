//! Judged submission records
//!
//! Records are stored in Redis with a 1-hour expiration and also published
//! to a channel for real-time subscribers.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::error::StoreError;

/// Redis key constants
pub mod keys {
    /// Submission id sequence
    pub const SUBMISSION_SEQ: &str = "judge:submission:seq";

    /// Submission record key prefix
    pub const SUBMISSION_PREFIX: &str = "judge:submission:";

    /// Submission channel (for pub/sub)
    pub const SUBMISSION_CHANNEL: &str = "judge:submissions";
}

const RECORD_EXPIRY_SECS: u64 = 3600; // 1 hour

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    #[serde(default)]
    pub id: Option<u64>,
    pub user_id: String,
    pub problem_id: String,
    /// Top-level judge status code
    pub status: i32,
    pub passed: usize,
    pub total: usize,
    pub code: String,
    pub language: String,
}

impl SubmissionRecord {
    pub fn accepted(&self) -> bool {
        self.status == 0 && self.total > 0 && self.passed == self.total
    }
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Persist a record and return its id
    async fn record(&self, record: SubmissionRecord) -> Result<u64, StoreError>;
}

/// Redis-backed store
pub struct RedisSubmissionStore {
    client: redis::Client,
    conn: AsyncMutex<MultiplexedConnection>,
}

impl RedisSubmissionStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis at {}", redis_url);
        Ok(Self {
            client,
            conn: AsyncMutex::new(conn),
        })
    }

    async fn store(
        conn: &mut MultiplexedConnection,
        record: &mut SubmissionRecord,
    ) -> Result<u64, StoreError> {
        let id: u64 = conn.incr(keys::SUBMISSION_SEQ, 1u64).await?;
        record.id = Some(id);
        let json = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(
            format!("{}{}", keys::SUBMISSION_PREFIX, id),
            &json,
            RECORD_EXPIRY_SECS,
        )
        .await?;

        // Publish to channel (ignore errors as there may be no subscribers)
        let _ = conn
            .publish::<_, _, ()>(keys::SUBMISSION_CHANNEL, &json)
            .await;
        Ok(id)
    }
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn record(&self, mut record: SubmissionRecord) -> Result<u64, StoreError> {
        let mut conn = self.conn.lock().await;

        // Try to store, reconnect once on failure
        match Self::store(&mut conn, &mut record).await {
            Ok(id) => Ok(id),
            Err(e) => {
                warn!("Failed to store submission: {}. Reconnecting...", e);
                *conn = self.client.get_multiplexed_async_connection().await?;
                Self::store(&mut conn, &mut record).await
            }
        }
    }
}

/// Records kept by the in-process store before the oldest are dropped
pub const DEFAULT_MEMORY_CAPACITY: usize = 1024;

/// In-process store used without Redis and in tests.
///
/// Holds at most `capacity` records, dropping the oldest first. Ids keep
/// counting across evictions.
#[derive(Debug)]
pub struct MemorySubmissionStore {
    inner: Mutex<MemoryRecords>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct MemoryRecords {
    records: VecDeque<SubmissionRecord>,
    last_id: u64,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryRecords::default()),
            capacity: capacity.max(1),
        }
    }

    /// Retained records, oldest first
    pub fn records(&self) -> Vec<SubmissionRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.iter().cloned().collect()
    }
}

impl Default for MemorySubmissionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn record(&self, mut record: SubmissionRecord) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_id += 1;
        let id = inner.last_id;
        record.id = Some(id);
        if inner.records.len() >= self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(passed: usize, total: usize) -> SubmissionRecord {
        SubmissionRecord {
            id: None,
            user_id: "alice".to_string(),
            problem_id: "1".to_string(),
            status: 0,
            passed,
            total,
            code: "int main() {}".to_string(),
            language: "C++".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_assigns_sequential_ids() {
        let store = MemorySubmissionStore::new();
        assert_eq!(store.record(record(2, 2)).await.unwrap(), 1);
        assert_eq!(store.record(record(0, 2)).await.unwrap(), 2);

        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, Some(2));
        assert!(records[0].accepted());
        assert!(!records[1].accepted());
    }

    #[test]
    fn test_memory_store_from_sync_context() {
        let store = MemorySubmissionStore::new();
        let id = tokio_test::block_on(store.record(record(1, 1)));
        assert_eq!(tokio_test::assert_ok!(id), 1);
    }

    #[tokio::test]
    async fn test_memory_store_drops_oldest_when_full() {
        let store = MemorySubmissionStore::with_capacity(3);
        for passed in 0..5 {
            store.record(record(passed, 5)).await.unwrap();
        }

        let records = store.records();
        assert_eq!(records.len(), 3);
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![Some(3), Some(4), Some(5)]);
        assert_eq!(records[0].passed, 2);

        assert_eq!(store.record(record(5, 5)).await.unwrap(), 6);
        assert_eq!(store.records().len(), 3);
    }

    #[test]
    fn test_record_json_shape() {
        let value = serde_json::to_value(record(1, 2)).unwrap();
        assert_eq!(value["user_id"], "alice");
        assert_eq!(value["passed"], 1);
        assert_eq!(value["total"], 2);
    }
}
