use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{Duty, DutyError, Fetcher, WorkItem, WorkQueue, WorkSink};

const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Drains the pending work queue into the sink while leading.
pub struct QueueDrain {
    queue: WorkQueue,
    sink: Arc<dyn WorkSink>,
    idle_wait: Duration,
}

impl QueueDrain {
    pub fn new(queue: WorkQueue, sink: Arc<dyn WorkSink>, idle_wait: Duration) -> Self {
        Self {
            queue,
            sink,
            idle_wait,
        }
    }

    // One retry, then the item is dropped.
    async fn deliver_with_retry(&self, item: &WorkItem) -> Result<(), DutyError> {
        match self.sink.deliver(item).await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("Delivery of item from {} failed, retrying: {}", item.source, e);
                sleep(RETRY_DELAY).await;
                self.sink.deliver(item).await
            }
        }
    }
}

#[async_trait]
impl Duty for QueueDrain {
    fn name(&self) -> &str {
        "queue-drain"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                item = self.queue.pop_timeout(self.idle_wait) => item,
            };
            let Some(item) = item else {
                log::debug!("No pending work items, queue idle");
                continue;
            };

            if cancel.is_cancelled() {
                // Never offered to the sink; whoever leads next picks it up.
                self.queue.push_front(item);
                return Ok(());
            }

            // Not raced against `cancel`: once the sink has the item, a
            // second copy must not go back on the queue.
            match self.deliver_with_retry(&item).await {
                Ok(()) => log::debug!("Forwarded item from {}", item.source),
                Err(e) => log::error!(
                    "Dropping item from {} after failed retry: {}",
                    item.source,
                    e
                ),
            }
        }
    }
}

/// Runs the external fetch on a fixed cadence while leading.
pub struct PeriodicFetch {
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn WorkSink>,
    interval: Duration,
}

impl PeriodicFetch {
    pub fn new(fetcher: Arc<dyn Fetcher>, sink: Arc<dyn WorkSink>, interval: Duration) -> Self {
        Self {
            fetcher,
            sink,
            interval,
        }
    }

    async fn fetch_once(&self) -> Result<bool, DutyError> {
        match self.fetcher.fetch().await? {
            Some(item) => {
                self.sink.deliver(&item).await?;
                log::info!("Fetched and forwarded {} bytes from {}", item.payload.len(), item.source);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Duty for PeriodicFetch {
    fn name(&self) -> &str {
        "periodic-fetch"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep(self.interval) => {}
            }
            match self.fetch_once().await {
                Ok(true) => {}
                Ok(false) => log::debug!("Nothing to fetch"),
                Err(e) => log::error!("Error in periodic fetch: {e}"),
            }
        }
    }
}
