use crate::executor::ExecutionStatus;
use crate::seed::{Location, PathFingerprint};

/// An `Observer` monitors one execution of a target and collects data about it.
///
/// Runners invoke `pre_exec` immediately before the target runs and `post_exec`
/// immediately after. Data collected here is what the fuzz loop's feedback
/// consumes to decide whether an input is interesting.
pub trait Observer: Send + Sync {
    /// Static name identifying the observer in logs and error messages.
    fn name(&self) -> &'static str;

    /// Prepares for a new execution. Typically clears state left by the previous run.
    fn pre_exec(&mut self) -> Result<(), anyhow::Error>;

    /// Finalises data collection once the target has returned (or crashed).
    fn post_exec(&mut self, status: &ExecutionStatus) -> Result<(), anyhow::Error>;

    /// Drops all collected state.
    fn reset(&mut self);
}

/// Records the code locations a target reports while it runs.
///
/// Targets call [`CoverageObserver::hit`] from their instrumentation points. After
/// `post_exec`, [`CoverageObserver::fingerprint`] holds the path of the last run,
/// and stays stable until the next `pre_exec`.
#[derive(Debug, Default, Clone)]
pub struct CoverageObserver {
    current: PathFingerprint,
    last: PathFingerprint,
    in_flight: bool,
}

impl CoverageObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `function:line` executed during the current run.
    pub fn hit(&mut self, function: &str, line: u32) {
        self.current.insert(Location::new(function, line));
    }

    /// The fingerprint of the most recently completed execution.
    pub fn fingerprint(&self) -> &PathFingerprint {
        &self.last
    }
}

impl Observer for CoverageObserver {
    fn name(&self) -> &'static str {
        "CoverageObserver"
    }

    fn pre_exec(&mut self) -> Result<(), anyhow::Error> {
        if self.in_flight {
            return Err(anyhow::anyhow!(
                "pre_exec called twice without an intervening post_exec"
            ));
        }
        self.current = PathFingerprint::new();
        self.in_flight = true;
        Ok(())
    }

    // Crashing runs keep the locations reached before the failure.
    fn post_exec(&mut self, _status: &ExecutionStatus) -> Result<(), anyhow::Error> {
        if !self.in_flight {
            return Err(anyhow::anyhow!("post_exec called without pre_exec"));
        }
        self.last = std::mem::take(&mut self.current);
        self.in_flight = false;
        Ok(())
    }

    fn reset(&mut self) {
        self.current = PathFingerprint::new();
        self.last = PathFingerprint::new();
        self.in_flight = false;
    }
}
