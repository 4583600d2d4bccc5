use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use super::{Dispatch, Event};

/// Generates a random election timeout within the configured range
pub fn random_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::rng();
    let timeout_ms = rng.random_range(min_ms..=max_ms);
    Duration::from_millis(timeout_ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Election,
    ElectionWindow,
    Heartbeat,
}

/// A timer firing on its way to the dispatch loop. `generation` identifies
/// the arm that produced it so superseded firings can be discarded.
#[derive(Debug, Clone, Copy)]
pub struct Fired {
    pub kind: TimerKind,
    pub generation: u64,
    pub event: Event,
}

/// Restartable single-shot timer. Arming cancels any pending firing.
pub struct OneShotTimer {
    kind: TimerKind,
    tx: mpsc::Sender<Dispatch>,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl OneShotTimer {
    pub fn new(kind: TimerKind, tx: mpsc::Sender<Dispatch>) -> Self {
        Self {
            kind,
            tx,
            generation: 0,
            pending: None,
        }
    }

    pub fn arm(&mut self, delay: Duration, event: Event) {
        self.disarm();
        let fired = Fired {
            kind: self.kind,
            generation: self.generation,
            event,
        };
        let tx = self.tx.clone();
        self.pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(Dispatch::Timer(fired)).await;
        }));
    }

    pub fn disarm(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Accepts a firing from the current arm exactly once.
    pub fn accept(&mut self, fired: &Fired) -> bool {
        if fired.kind != self.kind || fired.generation != self.generation {
            return false;
        }
        self.pending.take().is_some()
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Restartable fixed-cadence timer. The first tick comes one period after start.
pub struct PeriodicTimer {
    kind: TimerKind,
    tx: mpsc::Sender<Dispatch>,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    pub fn new(kind: TimerKind, tx: mpsc::Sender<Dispatch>) -> Self {
        Self {
            kind,
            tx,
            generation: 0,
            task: None,
        }
    }

    pub fn start(&mut self, period: Duration, event: Event) {
        self.stop();
        let fired = Fired {
            kind: self.kind,
            generation: self.generation,
            event,
        };
        let tx = self.tx.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(Dispatch::Timer(fired)).await.is_err() {
                    break;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn accept(&self, fired: &Fired) -> bool {
        fired.kind == self.kind && fired.generation == self.generation && self.task.is_some()
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
