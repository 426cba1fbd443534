//! Generic supervisor: run a task forever with exponential backoff + jitter, clean shutdown
//! Favors composition over inheritance: no `BaseRunner`/`BaseWorker`
//! inheritance, just a loop parameterized by an async `runOnce` closure returning a
//! `WorkerOutcome`, grounded in the teacher's `BackoffCalculator`
//! (`scrapers/binance_session.rs`) reshaped as a standalone, reusable driver.

use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    Worked,
    Idle,
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub growth: f64,
}

impl BackoffConfig {
    pub const WORKER: Self = Self {
        min_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        growth: 1.5,
    };

    pub const PLATFORM_SYNC: Self = Self {
        min_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(300),
        growth: 2.0,
    };

    pub const NEWS_INGESTION: Self = Self {
        min_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        growth: 2.0,
    };
}

/// Exponential backoff with uniform jitter, reset to `min_delay` on any successful iteration.
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: config.min_delay,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.config.min_delay;
    }

    /// `delay <- min(max(current * growth, min_delay), max_delay) + U(0, 0.1 * current)`.
    pub fn next_delay(&mut self) -> Duration {
        let grown = self.current.mul_f64(self.config.growth);
        let clamped = grown.clamp(self.config.min_delay, self.config.max_delay);
        self.current = clamped;
        let jitter_max_ms = (clamped.as_secs_f64() * 0.1 * 1000.0).max(0.0);
        let jitter_ms = if jitter_max_ms > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_max_ms)
        } else {
            0.0
        };
        clamped + Duration::from_millis(jitter_ms as u64)
    }
}

/// A runner that isn't running yet, or has already been stopped — informational only, never
/// propagated as a real failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopError {
    AlreadyRunning,
    AlreadyStopped,
}

impl std::fmt::Display for LoopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "loop runner already running"),
            Self::AlreadyStopped => write!(f, "loop runner already stopped"),
        }
    }
}

impl std::error::Error for LoopError {}

/// Drives `run_once` forever until `stop()`, with exponential backoff + jitter between
/// non-`Worked` iterations.
pub struct LoopRunner {
    name: String,
    backoff_config: BackoffConfig,
    running: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LoopRunner {
    pub fn new(name: impl Into<String>, backoff_config: BackoffConfig) -> Self {
        Self {
            name: name.into(),
            backoff_config,
            running: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Starts the loop, spawning a task that calls `run_once` until `stop()`. Idempotent: a
    /// second call while already running logs a warning and is a no-op.
    pub fn start<F, Fut>(&mut self, mut run_once: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = WorkerOutcome> + Send,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(runner = %self.name, "start() called while already running, ignoring");
            return;
        }
        self.stopping.store(false, Ordering::SeqCst);

        let name = self.name.clone();
        let running = self.running.clone();
        let stopping = self.stopping.clone();
        let backoff_config = self.backoff_config;

        let handle = tokio::spawn(async move {
            let mut backoff = Backoff::new(backoff_config);
            loop {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }

                let outcome = run_once().await;
                match &outcome {
                    WorkerOutcome::Worked => {
                        backoff.reset();
                    }
                    WorkerOutcome::Idle => {
                        let delay = backoff.next_delay();
                        tokio::time::sleep(delay).await;
                    }
                    WorkerOutcome::Failed(msg) => {
                        error!(runner = %name, error = %msg, "iteration failed, backing off");
                        let delay = backoff.next_delay();
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            info!(runner = %name, "loop stopped");
        });

        self.handle = Some(handle);
    }

    /// Signals cancellation and awaits the currently executing iteration. Calling `stop()` when
    /// not running is informational only (`LoopError::AlreadyStopped`).
    pub async fn stop(&mut self) -> Result<(), LoopError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(LoopError::AlreadyStopped);
        }
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = Backoff::new(BackoffConfig {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            growth: 2.0,
        });
        let d1 = b.next_delay();
        assert!(d1.as_millis() >= 200 && d1.as_millis() < 230);
        let d2 = b.next_delay();
        assert!(d2.as_millis() >= 400 && d2.as_millis() < 460);
        let d3 = b.next_delay();
        assert!(d3.as_millis() >= 500 && d3.as_millis() < 560);
    }

    #[test]
    fn reset_returns_to_min_delay() {
        let mut b = Backoff::new(BackoffConfig {
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1000),
            growth: 2.0,
        });
        b.next_delay();
        b.next_delay();
        b.reset();
        let d = b.next_delay();
        assert!(d.as_millis() >= 100 && d.as_millis() < 116);
    }

    #[tokio::test]
    async fn stop_then_start_resumes_at_min_delay() {
        let mut runner = LoopRunner::new(
            "test",
            BackoffConfig {
                min_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                growth: 2.0,
            },
        );
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        runner.start(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                WorkerOutcome::Idle
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.stop().await.unwrap();
        assert!(counter.load(Ordering::SeqCst) > 0);

        let counter2 = Arc::new(AtomicU32::new(0));
        let c2 = counter2.clone();
        runner.start(move || {
            let c2 = c2.clone();
            async move {
                c2.fetch_add(1, Ordering::SeqCst);
                WorkerOutcome::Idle
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        runner.stop().await.unwrap();
        assert!(counter2.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn double_stop_is_informational() {
        let mut runner = LoopRunner::new("test2", BackoffConfig::WORKER);
        runner.start(|| async { WorkerOutcome::Idle });
        runner.stop().await.unwrap();
        assert_eq!(runner.stop().await, Err(LoopError::AlreadyStopped));
    }
}
