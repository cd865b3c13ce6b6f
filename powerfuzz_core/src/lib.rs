pub mod config;
pub mod corpus;
pub mod executor;
pub mod feedback;
pub mod fuzzer;
pub mod mutator;
pub mod observer;
pub mod oracle;
pub mod report;
pub mod scheduler;
pub mod seed;

pub use config::{FuzzConfig, Strategy};
pub use corpus::{CorpusError, CorpusStore, Population, dump_population, load_population};
pub use executor::{ExecutionResult, ExecutionStatus, InProcessRunner, Outcome, Runner};
pub use feedback::{CoverageAccumulator, Feedback, PathNoveltyFeedback};
pub use fuzzer::{Candidate, FuzzError, FuzzStats, Fuzzer, IterationOutcome};
pub use mutator::{HavocMutator, MutationOperator, Mutator};
pub use observer::{CoverageObserver, Observer};
pub use oracle::{CrashMap, CrashOracle, CrashReport, Oracle};
pub use report::{ReportError, RunSnapshot};
pub use scheduler::{
    PathFrequencySchedule, PowerSchedule, ScheduleFeedback, ScheduleKey, ScheduleKind,
    SchedulerError, SeedAgeSchedule,
};
pub use seed::{Location, PathFingerprint, Seed, SeedId};
