use crate::corpus::{CorpusError, CorpusStore, Population};
use crate::executor::{ExecutionResult, Outcome, Runner};
use crate::feedback::{CoverageAccumulator, Feedback, PathNoveltyFeedback};
use crate::mutator::{HavocMutator, Mutator};
use crate::oracle::{CrashMap, CrashOracle, Oracle};
use crate::scheduler::{PowerSchedule, ScheduleFeedback, ScheduleKey, SchedulerError};
use crate::seed::{PathFingerprint, SeedId};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Error, Debug)]
pub enum FuzzError {
    #[error("Corpus operation failed during fuzzing: {0}")]
    Corpus(#[from] CorpusError),
    #[error("Scheduling failed during fuzzing: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// An input about to be executed and the seed it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub parent: SeedId,
    pub data: Vec<u8>,
    /// Set for the unmutated first run of an initial seed.
    pub calibration: bool,
}

/// What one iteration changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationOutcome {
    pub outcome: Outcome,
    /// Id of the seed added because the candidate took a new path.
    pub new_seed: Option<SeedId>,
    /// Locations covered for the first time by this execution.
    pub coverage_gain: usize,
    /// Signature of a crash seen for the first time.
    pub new_crash: Option<String>,
}

/// Snapshot of the campaign counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzStats {
    pub run_time: Duration,
    pub last_new_path: Option<Duration>,
    pub last_unique_crash: Option<Duration>,
    pub total_execs: u64,
    pub total_paths: usize,
    pub total_seeds: usize,
    pub unique_crashes: usize,
    pub covered_locations: usize,
}

fn format_hms(elapsed: Option<Duration>) -> String {
    match elapsed {
        Some(elapsed) => {
            let secs = elapsed.as_secs();
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
        None => "--:--:--".to_string(),
    }
}

impl fmt::Display for FuzzStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run time {} | last new path {} | last uniq crash {} | execs {} | paths {} | seeds {} | uniq crashes {} | covered {}",
            format_hms(Some(self.run_time)),
            format_hms(self.last_new_path),
            format_hms(self.last_unique_crash),
            self.total_execs,
            self.total_paths,
            self.total_seeds,
            self.unique_crashes,
            self.covered_locations
        )
    }
}

/// Drives the fuzz loop: choose a seed, mutate it, run it, learn from the result.
///
/// Seeds already in the corpus when the fuzzer is built are first executed
/// once unmutated so their paths enter the schedule and the novelty feedback.
pub struct Fuzzer<M = HavocMutator>
where
    M: Mutator<ChaCha8Rng>,
{
    corpus: CorpusStore,
    schedule: Box<dyn PowerSchedule>,
    mutator: M,
    feedback: PathNoveltyFeedback,
    coverage: CoverageAccumulator,
    oracle: Box<dyn Oracle>,
    crashes: CrashMap,
    rng: ChaCha8Rng,
    pending_calibration: VecDeque<SeedId>,
    started: Instant,
    total_execs: u64,
    last_new_path: Option<Duration>,
    last_unique_crash: Option<Duration>,
    stats_interval: Duration,
    last_stats_log: Instant,
}

impl<M> Fuzzer<M>
where
    M: Mutator<ChaCha8Rng>,
{
    pub fn new(
        corpus: CorpusStore,
        schedule: Box<dyn PowerSchedule>,
        mutator: M,
        rng: ChaCha8Rng,
    ) -> Self {
        let pending_calibration = corpus.energies().into_iter().map(|(id, _)| id).collect();
        let now = Instant::now();
        Self {
            corpus,
            schedule,
            mutator,
            feedback: PathNoveltyFeedback::new(),
            coverage: CoverageAccumulator::new(),
            oracle: Box::new(CrashOracle::new()),
            crashes: CrashMap::new(),
            rng,
            pending_calibration,
            started: now,
            total_execs: 0,
            last_new_path: None,
            last_unique_crash: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
            last_stats_log: now,
        }
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn with_oracle(mut self, oracle: Box<dyn Oracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn corpus(&self) -> &CorpusStore {
        &self.corpus
    }

    pub fn crashes(&self) -> &CrashMap {
        &self.crashes
    }

    pub fn coverage(&self) -> &CoverageAccumulator {
        &self.coverage
    }

    pub fn schedule_name(&self) -> &'static str {
        self.schedule.name()
    }

    pub fn stats(&self) -> FuzzStats {
        FuzzStats {
            run_time: self.started.elapsed(),
            last_new_path: self.last_new_path,
            last_unique_crash: self.last_unique_crash,
            total_execs: self.total_execs,
            total_paths: self.feedback.distinct_paths(),
            total_seeds: self.corpus.len(),
            unique_crashes: self.crashes.len(),
            covered_locations: self.coverage.len(),
        }
    }

    /// Picks the next input to execute: a pending initial seed as is, otherwise
    /// a mutation of a seed chosen by the power schedule.
    pub fn propose(&mut self) -> Result<Candidate, FuzzError> {
        while let Some(id) = self.pending_calibration.pop_front() {
            if !self.corpus.contains(id) {
                continue;
            }
            let seed = self.corpus.resident(id)?;
            return Ok(Candidate {
                parent: id,
                data: seed.data.clone(),
                calibration: true,
            });
        }

        let parent = self.schedule.choose(&mut self.corpus, &mut self.rng)?;
        let seed = self.corpus.resident(parent)?;
        let data = self.mutator.mutate(seed.as_bytes(), &mut self.rng);
        Ok(Candidate {
            parent,
            data,
            calibration: false,
        })
    }

    /// Folds one execution of `candidate` into coverage, schedule, corpus and crash state.
    pub fn report(
        &mut self,
        candidate: Candidate,
        result: &ExecutionResult,
        outcome: Outcome,
        fingerprint: PathFingerprint,
    ) -> Result<IterationOutcome, FuzzError> {
        self.total_execs += 1;
        let coverage_gain = self.coverage.merge(&fingerprint);

        let mut new_crash = None;
        if let Some(report) = self.oracle.examine(&candidate.data, result, outcome) {
            let signature = report.signature.clone();
            let description = report.description.clone();
            if self.crashes.insert(report) {
                self.last_unique_crash = Some(self.started.elapsed());
                tracing::info!(
                    signature = %signature,
                    "new unique crash: {}",
                    description
                );
                new_crash = Some(signature);
            }
        }

        let novel = self.feedback.report_interesting(&fingerprint);
        if novel {
            self.last_new_path = Some(self.started.elapsed());
        }

        if candidate.calibration {
            self.corpus
                .record_coverage(candidate.parent, fingerprint.clone())?;
        }

        let ephemeral_key = ScheduleKey::ephemeral(&candidate.data);
        let new_seed = if novel && !candidate.calibration {
            let id = self.corpus.add(candidate.data, fingerprint.clone())?;
            tracing::info!(
                seed = %id,
                parent = %candidate.parent,
                locations = fingerprint.len(),
                "new path"
            );
            Some(id)
        } else {
            None
        };

        let key = match new_seed {
            Some(id) => ScheduleKey::Seed(id),
            None if candidate.calibration => ScheduleKey::Seed(candidate.parent),
            None => ephemeral_key,
        };
        self.schedule.update(key, &ScheduleFeedback::Path(fingerprint));
        self.schedule
            .update(key, &ScheduleFeedback::CoverageGain(coverage_gain as f64));

        if self.last_stats_log.elapsed() >= self.stats_interval {
            tracing::info!("{}", self.stats());
            self.last_stats_log = Instant::now();
        }

        Ok(IterationOutcome {
            outcome,
            new_seed,
            coverage_gain,
            new_crash,
        })
    }

    pub fn fuzz_one(&mut self, runner: &mut dyn Runner) -> Result<IterationOutcome, FuzzError> {
        let candidate = self.propose()?;
        let (result, outcome) = runner.execute(&candidate.data);
        let fingerprint = runner.coverage();
        self.report(candidate, &result, outcome, fingerprint)
    }

    /// Fuzzes until `budget` wall-clock time has elapsed, checked between
    /// iterations, then flushes the corpus and returns the final statistics.
    pub fn run_for(
        &mut self,
        runner: &mut dyn Runner,
        budget: Duration,
    ) -> Result<FuzzStats, FuzzError> {
        let deadline_start = Instant::now();
        tracing::info!(
            schedule = self.schedule.name(),
            seeds = self.corpus.len(),
            "starting fuzz loop for {:?}",
            budget
        );
        while deadline_start.elapsed() < budget {
            self.fuzz_one(runner)?;
        }
        self.corpus.flush()?;
        let stats = self.stats();
        tracing::info!("fuzz loop finished: {}", stats);
        Ok(stats)
    }
}
