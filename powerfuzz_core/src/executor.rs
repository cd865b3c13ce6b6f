use crate::observer::{CoverageObserver, Observer};
use crate::seed::PathFingerprint;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

/// Low-level status of one execution as seen by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    Crash(String),
    ObserverError(String),
}

impl ExecutionStatus {
    /// Classifies the status into the outcome the fuzz loop reasons about.
    pub fn outcome(&self) -> Outcome {
        match self {
            ExecutionStatus::Ok => Outcome::Pass,
            ExecutionStatus::Crash(_) => Outcome::Fail,
            ExecutionStatus::Timeout | ExecutionStatus::ObserverError(_) => Outcome::Unresolved,
        }
    }
}

/// Verdict of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Pass,
    Fail,
    Unresolved,
}

/// Everything a runner reports about one execution besides its coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub duration: Duration,
}

impl ExecutionResult {
    /// The failure signal used for crash deduplication, if the run failed.
    pub fn failure_signal(&self) -> Option<&str> {
        match &self.status {
            ExecutionStatus::Crash(msg) => Some(msg),
            _ => None,
        }
    }
}

/// The capability the fuzz loop needs from an instrumented target.
///
/// Runners own their timeouts: a hung or failing target surfaces as an
/// [`Outcome`], never as an error.
pub trait Runner {
    /// Runs the target once on `input`.
    fn execute(&mut self, input: &[u8]) -> (ExecutionResult, Outcome);

    /// The path fingerprint of the most recent `execute` call.
    fn coverage(&self) -> PathFingerprint;
}

/// Runs a Rust function in-process, catching panics as crashes.
///
/// The harness receives the input and a [`CoverageObserver`] to report the
/// locations it reaches.
pub struct InProcessRunner<F>
where
    F: FnMut(&[u8], &mut CoverageObserver),
{
    harness_fn: F,
    observer: CoverageObserver,
    timeout: Option<Duration>,
}

impl<F> InProcessRunner<F>
where
    F: FnMut(&[u8], &mut CoverageObserver),
{
    pub fn new(harness_fn: F) -> Self {
        Self {
            harness_fn,
            observer: CoverageObserver::new(),
            timeout: None,
        }
    }

    /// Classifies runs slower than `timeout` as [`ExecutionStatus::Timeout`].
    ///
    /// In-process targets cannot be interrupted, so the limit is applied once the
    /// harness returns.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<F> Runner for InProcessRunner<F>
where
    F: FnMut(&[u8], &mut CoverageObserver),
{
    fn execute(&mut self, input: &[u8]) -> (ExecutionResult, Outcome) {
        let started = Instant::now();
        if let Err(e) = self.observer.pre_exec() {
            let error_msg = format!("Observer '{}' pre_exec failed: {}", self.observer.name(), e);
            tracing::warn!("{error_msg}");
            self.observer.reset();
            let status = ExecutionStatus::ObserverError(error_msg);
            let outcome = status.outcome();
            return (
                ExecutionResult {
                    status,
                    duration: started.elapsed(),
                },
                outcome,
            );
        }

        let harness = &mut self.harness_fn;
        let observer = &mut self.observer;
        let result = catch_unwind(AssertUnwindSafe(|| harness(input, observer)));
        let duration = started.elapsed();

        let mut status = match result {
            Ok(()) => ExecutionStatus::Ok,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionStatus::Crash(msg)
            }
        };

        if status == ExecutionStatus::Ok && self.timeout.is_some_and(|limit| duration > limit) {
            status = ExecutionStatus::Timeout;
        }

        if let Err(e) = self.observer.post_exec(&status) {
            let error_msg = format!("Observer '{}' post_exec failed: {}", self.observer.name(), e);
            tracing::warn!("{error_msg}");
            if status == ExecutionStatus::Ok {
                status = ExecutionStatus::ObserverError(error_msg);
            }
        }

        let outcome = status.outcome();
        (ExecutionResult { status, duration }, outcome)
    }

    fn coverage(&self) -> PathFingerprint {
        self.observer.fingerprint().clone()
    }
}
