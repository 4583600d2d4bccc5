mod ingest;
mod jobs;
mod work;

pub use self::ingest::LineIngest;
pub use self::jobs::{PeriodicFetch, QueueDrain};
pub use self::work::{FileFetcher, Fetcher, JsonLinesSink, LogSink, WorkItem, WorkQueue, WorkSink};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::raft::RoleObserver;

#[derive(Error, Debug)]
pub enum DutyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Work that only the leader may perform. `run` must return promptly once
/// `cancel` fires.
#[async_trait]
pub trait Duty: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyTransition {
    Started { term: u64 },
    Stopped,
    Unchanged,
}

struct RunningDuties {
    term: u64,
    cancel: CancellationToken,
    tasks: Vec<(Arc<dyn Duty>, JoinHandle<anyhow::Result<()>>)>,
}

/// Polls the role observer and starts or stops the exclusive duties on
/// leadership changes.
pub struct DutyScheduler {
    observer: RoleObserver,
    duties: Vec<Arc<dyn Duty>>,
    poll_interval: Duration,
    // Separate from the election lock; held across awaits.
    running: TokioMutex<Option<RunningDuties>>,
}

impl DutyScheduler {
    pub fn new(observer: RoleObserver, duties: Vec<Arc<dyn Duty>>, poll_interval: Duration) -> Self {
        Self {
            observer,
            duties,
            poll_interval,
            running: TokioMutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn poll_once(&self) -> DutyTransition {
        let snapshot = self.observer.snapshot();
        let mut running = self.running.lock().await;

        if !snapshot.is_leader() {
            return match running.take() {
                Some(current) => {
                    log::info!(
                        "No longer leader (now {} at term {}), stopping duties",
                        snapshot.role,
                        snapshot.term
                    );
                    stop_all(current).await;
                    DutyTransition::Stopped
                }
                None => DutyTransition::Unchanged,
            };
        }

        let same_term = matches!(running.as_ref(), Some(current) if current.term == snapshot.term);
        if same_term {
            if let Some(current) = running.as_mut() {
                respawn_finished(current).await;
            }
            return DutyTransition::Unchanged;
        }

        // Leadership was lost and regained between polls.
        if let Some(previous) = running.take() {
            stop_all(previous).await;
        }
        log::info!("Leader for term {}, starting duties", snapshot.term);
        *running = Some(self.start_all(snapshot.term));
        DutyTransition::Started {
            term: snapshot.term,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
        self.stop().await;
    }

    pub async fn stop(&self) {
        if let Some(current) = self.running.lock().await.take() {
            stop_all(current).await;
        }
    }

    fn start_all(&self, term: u64) -> RunningDuties {
        let cancel = CancellationToken::new();
        let tasks = self
            .duties
            .iter()
            .map(|duty| {
                let handle = spawn_duty(Arc::clone(duty), cancel.child_token());
                (Arc::clone(duty), handle)
            })
            .collect();
        RunningDuties {
            term,
            cancel,
            tasks,
        }
    }
}

fn spawn_duty(duty: Arc<dyn Duty>, cancel: CancellationToken) -> JoinHandle<anyhow::Result<()>> {
    log::info!("Starting duty {}", duty.name());
    tokio::spawn(async move { duty.run(cancel).await })
}

async fn report(name: &str, handle: JoinHandle<anyhow::Result<()>>) {
    match handle.await {
        Ok(Ok(())) => log::info!("Duty {name} stopped"),
        Ok(Err(e)) => log::warn!("Duty {name} exited with error: {e:#}"),
        Err(e) => log::error!("Duty {name} task failed: {e}"),
    }
}

async fn stop_all(current: RunningDuties) {
    current.cancel.cancel();
    for (duty, handle) in current.tasks {
        report(duty.name(), handle).await;
    }
}

async fn respawn_finished(current: &mut RunningDuties) {
    for (duty, handle) in current.tasks.iter_mut() {
        if handle.is_finished() {
            let replacement = spawn_duty(Arc::clone(duty), current.cancel.child_token());
            let finished = std::mem::replace(handle, replacement);
            report(duty.name(), finished).await;
            log::warn!("Restarted duty {}", duty.name());
        }
    }
}
