use async_trait::async_trait;
use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};

use super::descriptor::ResourceDescriptor;
use super::probe::{ProbeState, Prober};
use crate::error::{ProvisionError, Result};

/// Fixed-interval polling bounds. Intervals are constant, there is no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    interval: Duration,
    max_elapsed: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_elapsed: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(ProvisionError::PollPolicy(
                "polling interval must be greater than zero".into(),
            ));
        }
        Ok(Self {
            interval,
            max_elapsed,
        })
    }

    pub fn from_secs(interval_secs: u64, max_elapsed_secs: u64) -> Result<Self> {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(max_elapsed_secs),
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_elapsed(&self) -> Duration {
        self.max_elapsed
    }
}

impl Default for PollPolicy {
    /// Every 5s for up to 30s.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

/// One observation of an asynchronous condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not ready yet; worth asking again.
    Pending(String),
    /// Will never become ready (e.g. an explicit `Failed` phase).
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Converged { attempts: u32 },
    TimedOut { attempts: u32, last_detail: String },
    Failed(String),
}

/// Call `predicate` every `policy.interval()` until it reports ready, reports
/// a terminal failure, or `policy.max_elapsed()` has passed.
///
/// Returns within `max_elapsed + interval`. A predicate call that is still
/// running at that point is abandoned and the poll reports `TimedOut`.
pub async fn poll_until<F, Fut>(mut predicate: F, policy: PollPolicy) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Readiness>,
{
    let start = Instant::now();
    let hard_deadline = start + policy.max_elapsed + policy.interval;
    let mut attempts = 0;
    let mut last_detail = String::from("not yet observed");

    loop {
        attempts += 1;
        match timeout_at(hard_deadline, predicate()).await {
            Ok(Readiness::Ready) => return PollOutcome::Converged { attempts },
            Ok(Readiness::Failed(reason)) => return PollOutcome::Failed(reason),
            Ok(Readiness::Pending(detail)) => {
                debug!("Not ready after attempt {attempts}: {detail}");
                last_detail = detail;
            }
            Err(_) => {
                return PollOutcome::TimedOut {
                    attempts,
                    last_detail: format!("readiness check still running: {last_detail}"),
                }
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.max_elapsed {
            return PollOutcome::TimedOut {
                attempts,
                last_detail,
            };
        }
        sleep(policy.interval.min(policy.max_elapsed - elapsed)).await;
    }
}

/// Narrower readiness condition than "the resource matches its spec", such as
/// a Deployment reporting available replicas.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn readiness(&self, descriptor: &ResourceDescriptor) -> Readiness;
}

/// Readiness derived from a prober: ready once the resource matches.
/// Unreachable platforms are treated as transient.
pub struct ProbeReadiness<'a>(pub &'a dyn Prober);

#[async_trait]
impl ReadinessCheck for ProbeReadiness<'_> {
    async fn readiness(&self, descriptor: &ResourceDescriptor) -> Readiness {
        match self.0.probe(descriptor).await {
            ProbeState::PresentMatching => Readiness::Ready,
            other => Readiness::Pending(other.to_string()),
        }
    }
}
