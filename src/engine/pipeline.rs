use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::converge::{converge, Applier, ConvergeOutcome};
use super::descriptor::ResourceDescriptor;
use super::poll::{poll_until, PollOutcome, PollPolicy, ProbeReadiness, Readiness, ReadinessCheck};
use super::probe::{ProbeState, Prober};
use super::report::{RunReport, StepResult, StepStatus};
use super::verify::{verify, Check};
use crate::credentials::CredentialSet;

/// Wait for a resource to become ready after it has been converged.
pub struct Wait {
    pub policy: PollPolicy,
    /// Defaults to "the prober reports the resource as matching".
    pub readiness: Option<Arc<dyn ReadinessCheck>>,
}

/// The resource a step converges, together with the clients used to read and
/// write it.
pub struct Target {
    pub descriptor: ResourceDescriptor,
    pub prober: Arc<dyn Prober>,
    pub applier: Arc<dyn Applier>,
    pub wait: Option<Wait>,
}

pub struct Step {
    pub name: String,
    pub best_effort: bool,
    /// Credential keys that must be resolved before the step may start.
    pub requires: Vec<String>,
    /// Steps without a target only run their checks.
    pub target: Option<Target>,
    pub checks: Vec<Check>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            best_effort: false,
            requires: Vec::new(),
            target: None,
            checks: Vec::new(),
        }
    }

    #[must_use]
    pub fn best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    #[must_use]
    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.requires.push(key.into());
        self
    }

    #[must_use]
    pub fn target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }
}

pub struct Pipeline {
    pub name: String,
    pub steps: Vec<Step>,
}

/// Cooperative cancellation. The runner observes it between steps; waits
/// outside the runner (operator prompts) can await it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.0.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Hooks for progress display. Both methods default to doing nothing.
pub trait RunObserver {
    fn step_started(&self, _index: usize, _total: usize, _name: &str) {}
    fn step_finished(&self, _result: &StepResult) {}
}

struct Silent;

impl RunObserver for Silent {}

/// Executes pipeline steps strictly in order.
pub struct Runner<'a> {
    credentials: &'a CredentialSet,
    cancel: CancelFlag,
    observer: Box<dyn RunObserver + 'a>,
    read_retry: PollPolicy,
}

impl<'a> Runner<'a> {
    pub fn new(credentials: &'a CredentialSet) -> Self {
        Self {
            credentials,
            cancel: CancelFlag::default(),
            observer: Box::new(Silent),
            read_retry: PollPolicy::default(),
        }
    }

    /// How long a resource whose state cannot be read is asked again before
    /// the step fails.
    #[must_use]
    pub fn with_read_retry(mut self, policy: PollPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn RunObserver + 'a>) -> Self {
        self.observer = observer;
        self
    }

    /// Run every step until one that is not best-effort fails.
    ///
    /// Nothing is rolled back on failure: the report lists what ran, and the
    /// pipeline can simply be run again once the cause is fixed.
    pub async fn run(&self, pipeline: &Pipeline) -> RunReport {
        let total = pipeline.steps.len();
        info!("Running pipeline {} ({total} steps)", pipeline.name);
        let mut report = RunReport::start(&pipeline.name);

        for (index, step) in pipeline.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Cancelled before step {}", step.name);
                report.cancel();
                break;
            }

            info!("STEP {}/{total}: {}", index + 1, step.name);
            self.observer.step_started(index, total, &step.name);

            let started = Instant::now();
            let (status, diagnostics) = self.execute(step).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let result = StepResult::new(
                step.name.clone(),
                status,
                step.best_effort,
                elapsed_ms,
                diagnostics,
            );
            self.observer.step_finished(&result);
            report.record(result);

            if status.is_failure() {
                if step.best_effort {
                    warn!("Best-effort step {} ended {status}; continuing", step.name);
                } else {
                    error!("Step {} ended {status}; stopping pipeline", step.name);
                    break;
                }
            } else {
                info!("Step {} {status}", step.name);
            }
        }

        let report = report.finalize();
        info!("Pipeline {} finished: {}", pipeline.name, report.status());
        report
    }

    async fn execute(&self, step: &Step) -> (StepStatus, Vec<String>) {
        let mut diagnostics = Vec::new();

        for key in &step.requires {
            if let Some(message) = self.credentials.unmet(key) {
                error!("{message}");
                diagnostics.push(message);
                return (StepStatus::HardFailure, diagnostics);
            }
        }

        let mut status = StepStatus::Skipped;
        if let Some(target) = &step.target {
            status = converge_target(target, self.read_retry, &mut diagnostics).await;
            if status.is_failure() {
                return (status, diagnostics);
            }
        }

        if !step.checks.is_empty() {
            let verification = verify(&step.checks).await;
            diagnostics.extend(verification.diagnostics());
            let gating = verification.gating_failures();
            if !gating.is_empty() {
                diagnostics.push(format!("gating checks failed: {}", gating.join(", ")));
                status = StepStatus::VerificationFailed;
            }
        }

        (status, diagnostics)
    }
}

/// Read the state of `descriptor`, asking again while it is `Unknown` until
/// `policy` runs out. Returns the last state seen.
async fn observe(
    prober: &dyn Prober,
    descriptor: &ResourceDescriptor,
    policy: PollPolicy,
) -> ProbeState {
    let last = Mutex::new(None);
    let slot = &last;
    let outcome = poll_until(
        move || async move {
            let state = prober.probe(descriptor).await;
            let readiness = match &state {
                ProbeState::Unknown(reason) => {
                    warn!("State of {descriptor} unknown ({reason}); asking again");
                    Readiness::Pending(reason.clone())
                }
                _ => Readiness::Ready,
            };
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
            readiness
        },
        policy,
    )
    .await;
    if let PollOutcome::TimedOut { attempts, .. } = outcome {
        debug!("State of {descriptor} still unknown after {attempts} attempt(s)");
    }
    last.into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .unwrap_or_else(|| ProbeState::Unknown("state was never read".into()))
}

async fn converge_target(
    target: &Target,
    read_retry: PollPolicy,
    diagnostics: &mut Vec<String>,
) -> StepStatus {
    let descriptor = &target.descriptor;
    if let Err(e) = descriptor.validate() {
        diagnostics.push(e.to_string());
        return StepStatus::HardFailure;
    }

    let state = observe(target.prober.as_ref(), descriptor, read_retry).await;
    diagnostics.push(format!("{descriptor}: {state}"));

    let mut status = match converge(target.applier.as_ref(), descriptor, &state).await {
        ConvergeOutcome::Skipped => StepStatus::Skipped,
        ConvergeOutcome::Applied(action) => {
            diagnostics.push(format!("{action} {descriptor}"));
            StepStatus::Applied
        }
        ConvergeOutcome::HardFailure(message) => {
            error!("{message}");
            diagnostics.push(message);
            return StepStatus::HardFailure;
        }
    };

    let Some(wait) = &target.wait else {
        return status;
    };

    let fallback = ProbeReadiness(target.prober.as_ref());
    let readiness: &dyn ReadinessCheck = match &wait.readiness {
        Some(check) => check.as_ref(),
        None => &fallback,
    };

    match poll_until(|| readiness.readiness(descriptor), wait.policy).await {
        PollOutcome::Converged { attempts } => {
            diagnostics.push(format!("ready after {attempts} check(s)"));
            if status == StepStatus::Applied {
                status = StepStatus::Converged;
            }
        }
        PollOutcome::TimedOut {
            attempts,
            last_detail,
        } => {
            warn!(
                "{descriptor} not ready after {}s; it may still converge later",
                wait.policy.max_elapsed().as_secs()
            );
            diagnostics.push(format!(
                "not ready after {}s and {attempts} check(s): {last_detail}",
                wait.policy.max_elapsed().as_secs()
            ));
            status = StepStatus::TimedOut;
        }
        PollOutcome::Failed(reason) => {
            diagnostics.push(format!("{descriptor} will not become ready: {reason}"));
            status = StepStatus::HardFailure;
        }
    }

    status
}
