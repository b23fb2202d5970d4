use crate::error::AppError;
use crate::logs::persistence::{delete_log_buffer, load_log_buffer, save_log_buffer};
use crate::logs::types::{LogRecord, GUEST_USER_ID, LOG_BUFFER_CAPACITY};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedLogBuffer = Arc<Mutex<LogBuffer>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "lines", rename_all = "camelCase")]
pub enum BufferLoadSource {
    Backfill(usize),
    Persisted(usize),
    Empty,
}

/// Rolling window of formatted log lines, persisted after every mutation.
///
/// Holds at most `capacity` lines (oldest evicted first) and never stores the
/// same line twice in a row.
#[derive(Debug)]
pub struct LogBuffer {
    pool: SqlitePool,
    storage_key: String,
    capacity: usize,
    lines: VecDeque<String>,
}

impl LogBuffer {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_capacity(pool, LOG_BUFFER_CAPACITY)
    }

    pub fn with_capacity(pool: SqlitePool, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pool,
            storage_key: GUEST_USER_ID.to_string(),
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    pub fn into_shared(self) -> SharedLogBuffer {
        Arc::new(Mutex::new(self))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Returns `Ok(false)` when the record repeats the previous line.
    pub async fn append(&mut self, record: &LogRecord) -> Result<bool, AppError> {
        self.append_line(record.formatted()).await
    }

    pub async fn append_line(&mut self, line: String) -> Result<bool, AppError> {
        if self.last() == Some(line.as_str()) {
            return Ok(false);
        }

        self.lines.push_back(line);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }

        self.persist().await?;
        Ok(true)
    }

    /// Non-empty backfill replaces the buffer wholesale; otherwise the buffer
    /// persisted for `user_id` is restored unchanged.
    pub async fn load(
        &mut self,
        user_id: &str,
        backfill: &[LogRecord],
    ) -> Result<BufferLoadSource, AppError> {
        self.storage_key = user_id.to_string();

        if !backfill.is_empty() {
            let skip = backfill.len().saturating_sub(self.capacity);
            self.lines = backfill
                .iter()
                .skip(skip)
                .map(LogRecord::formatted)
                .collect();
            self.persist().await?;
            return Ok(BufferLoadSource::Backfill(self.lines.len()));
        }

        match load_log_buffer(&self.pool, &self.storage_key).await? {
            Some(mut persisted) => {
                let overflow = persisted.len().saturating_sub(self.capacity);
                persisted.drain(0..overflow);
                self.lines = persisted.into();
                Ok(BufferLoadSource::Persisted(self.lines.len()))
            }
            None => {
                self.lines.clear();
                Ok(BufferLoadSource::Empty)
            }
        }
    }

    pub async fn clear(&mut self) -> Result<usize, AppError> {
        let removed = self.lines.len();
        self.lines.clear();
        delete_log_buffer(&self.pool, &self.storage_key).await?;
        Ok(removed)
    }

    async fn persist(&self) -> Result<(), AppError> {
        let snapshot: Vec<String> = self.lines.iter().cloned().collect();
        save_log_buffer(&self.pool, &self.storage_key, &snapshot).await
    }
}
