use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::time::Instant;

use super::DutyError;

/// Opaque unit of work forwarded by the leader. The payload is never
/// inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub source: String,
    pub payload: Vec<u8>,
}

impl WorkItem {
    pub fn new(source: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            source: source.into(),
            payload: payload.into(),
        }
    }
}

/// Durable destination for work items.
#[async_trait]
pub trait WorkSink: Send + Sync {
    async fn deliver(&self, item: &WorkItem) -> Result<(), DutyError>;
}

/// Source polled by the periodic fetch duty.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<Option<WorkItem>, DutyError>;
}

#[derive(Default)]
struct QueueInner {
    items: Mutex<VecDeque<WorkItem>>,
    notify: Notify,
}

/// In-process FIFO of pending work items. Clones share the same queue.
#[derive(Clone, Default)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, VecDeque<WorkItem>> {
        self.inner.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: WorkItem) {
        self.items().push_back(item);
        self.inner.notify.notify_one();
    }

    /// Returns an item to the head of the queue.
    pub fn push_front(&self, item: WorkItem) {
        self.items().push_front(item);
        self.inner.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn try_pop(&self) -> Option<WorkItem> {
        self.items().pop_front()
    }

    /// Waits up to `wait` for an item.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<WorkItem> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, self.inner.notify.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }
}

/// Logs each item instead of storing it.
pub struct LogSink;

#[async_trait]
impl WorkSink for LogSink {
    async fn deliver(&self, item: &WorkItem) -> Result<(), DutyError> {
        log::info!(
            "Delivered {} bytes from {}: {}",
            item.payload.len(),
            item.source,
            String::from_utf8_lossy(&item.payload)
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct DeliveredRecord<'a> {
    source: &'a str,
    payload: String,
    delivered_at_ms: u64,
}

/// Appends one JSON object per item to a file.
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: TokioMutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: TokioMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl WorkSink for JsonLinesSink {
    async fn deliver(&self, item: &WorkItem) -> Result<(), DutyError> {
        let delivered_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let record = DeliveredRecord {
            source: &item.source,
            payload: String::from_utf8_lossy(&item.payload).into_owned(),
            delivered_at_ms,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Picks up a drop file, hands its contents over and removes it.
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self) -> Result<Option<WorkItem>, DutyError> {
        let payload = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        tokio::fs::remove_file(&self.path).await?;
        Ok(Some(WorkItem::new(
            format!("file:{}", self.path.display()),
            payload,
        )))
    }
}
