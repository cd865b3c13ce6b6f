use crate::seed::{Location, PathFingerprint};
use std::collections::{BTreeSet, HashSet};

/// Decides whether an execution's path makes its input worth keeping as a seed.
pub trait Feedback: Send + Sync {
    fn name(&self) -> &'static str;

    /// True if `path` has not been reported before.
    fn is_interesting(&self, path: &PathFingerprint) -> bool;

    /// Marks `path` as seen. Returns true if it was new.
    fn report_interesting(&mut self, path: &PathFingerprint) -> bool;
}

/// Treats every distinct path fingerprint as novel exactly once.
#[derive(Debug, Default, Clone)]
pub struct PathNoveltyFeedback {
    pub known_paths: HashSet<[u8; 16]>,
}

impl PathNoveltyFeedback {
    pub fn new() -> Self {
        Self {
            known_paths: HashSet::new(),
        }
    }

    pub fn distinct_paths(&self) -> usize {
        self.known_paths.len()
    }
}

impl Feedback for PathNoveltyFeedback {
    fn name(&self) -> &'static str {
        "PathNoveltyFeedback"
    }

    fn is_interesting(&self, path: &PathFingerprint) -> bool {
        !self.known_paths.contains(&path.digest())
    }

    fn report_interesting(&mut self, path: &PathFingerprint) -> bool {
        self.known_paths.insert(path.digest())
    }
}

/// Union of every location covered during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoverageAccumulator {
    covered: BTreeSet<Location>,
}

impl CoverageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `path` and returns how many of its locations were not covered before.
    pub fn merge(&mut self, path: &PathFingerprint) -> usize {
        path.iter()
            .filter(|location| self.covered.insert((*location).clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.covered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covered.is_empty()
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.covered.iter()
    }
}
