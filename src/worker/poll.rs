//! Reusable poll-loop template.
//!
//! All queue-consumption and fault-tolerance behavior lives here; a
//! concrete worker only supplies how to fetch one job and how to process
//! one job. Two variants share the contract: [`PollWorker`] suspends
//! cooperatively on the async runtime, [`BlockingPollWorker`] blocks its
//! thread. Suspension happens only at the top-level poll point, never
//! inside job handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, warn};

use crate::error::Error;

/// Cooperative stop signal, checked at the top of every loop iteration.
/// In-flight job handling always finishes before the loop exits.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. The loop exits once the current iteration completes.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Poll-loop tuning shared by both worker variants.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Upper bound on the error backoff.
    pub max_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Double the delay up to `max`, with a little jitter so restarted fleets
/// don't poll in lockstep.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    let doubled = current.saturating_mul(2).min(max);
    let jitter = doubled.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
    doubled.saturating_add(jitter).min(max)
}

/// Cooperatively-suspending worker loop.
#[async_trait]
pub trait PollWorker: Send + Sync {
    type Job: Send;

    fn poll_config(&self) -> PollConfig {
        PollConfig::default()
    }

    /// Fetch one job, or `None` when the queue is empty.
    async fn fetch_job(&self) -> Result<Option<Self::Job>, Error>;

    /// Process one job.
    async fn handle_job(&self, job: Self::Job) -> Result<(), Error>;

    /// Run until `stop` is set: poll, sleep when empty, back off on errors,
    /// and never terminate on a failed iteration.
    async fn run(&self, stop: StopFlag) {
        let config = self.poll_config();
        let mut backoff = config.poll_interval;

        while !stop.is_stopped() {
            let outcome = match self.fetch_job().await {
                Ok(Some(job)) => self.handle_job(job).await.map(|()| true),
                Ok(None) => Ok(false),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(true) => {
                    backoff = config.poll_interval;
                }
                Ok(false) => {
                    backoff = config.poll_interval;
                    tokio::time::sleep(config.poll_interval).await;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "worker iteration failed");
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, config.max_backoff);
                }
            }
        }
        info!("worker loop stopped");
    }
}

/// Thread-blocking worker loop. Same contract as [`PollWorker`] with
/// synchronous hooks; suspension blocks the calling thread.
pub trait BlockingPollWorker {
    type Job;

    fn poll_config(&self) -> PollConfig {
        PollConfig::default()
    }

    fn fetch_job(&self) -> Result<Option<Self::Job>, Error>;

    fn handle_job(&self, job: Self::Job) -> Result<(), Error>;

    fn run(&self, stop: StopFlag) {
        let config = self.poll_config();
        let mut backoff = config.poll_interval;

        while !stop.is_stopped() {
            let outcome = match self.fetch_job() {
                Ok(Some(job)) => self.handle_job(job).map(|()| true),
                Ok(None) => Ok(false),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(true) => {
                    backoff = config.poll_interval;
                }
                Ok(false) => {
                    backoff = config.poll_interval;
                    std::thread::sleep(config.poll_interval);
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "worker iteration failed");
                    std::thread::sleep(backoff);
                    backoff = next_backoff(backoff, config.max_backoff);
                }
            }
        }
        info!("worker loop stopped");
    }
}
