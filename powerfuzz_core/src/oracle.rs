use crate::executor::{ExecutionResult, Outcome};
use std::collections::BTreeMap;

/// A deduplicated failure together with a representative input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    /// MD5 hex digest of the failure signal; the deduplication key.
    pub signature: String,
    /// The first input that produced this failure.
    pub input: Vec<u8>,
    /// The failure signal, usually a panic message.
    pub description: String,
    pub outcome: Outcome,
}

/// An `Oracle` examines the result of an execution to determine if a bug has occurred.
pub trait Oracle: Send + Sync {
    /// Returns a report if the execution of `input` exposed a bug.
    fn examine(&self, input: &[u8], result: &ExecutionResult, outcome: Outcome)
    -> Option<CrashReport>;
}

/// Reports a bug whenever an execution fails with a failure signal.
#[derive(Debug, Default)]
pub struct CrashOracle;

impl CrashOracle {
    pub fn new() -> Self {
        CrashOracle
    }

    /// Signature of a failure signal: `md5(signal)` as lowercase hex.
    pub fn signature_of(signal: &str) -> String {
        format!("{:x}", md5::compute(signal.as_bytes()))
    }
}

impl Oracle for CrashOracle {
    fn examine(
        &self,
        input: &[u8],
        result: &ExecutionResult,
        outcome: Outcome,
    ) -> Option<CrashReport> {
        if outcome != Outcome::Fail {
            return None;
        }
        let description = result.failure_signal().unwrap_or("unknown failure");
        Some(CrashReport {
            signature: Self::signature_of(description),
            input: input.to_vec(),
            description: description.to_string(),
            outcome,
        })
    }
}

/// Keeps at most one representative crash per signature.
#[derive(Debug, Default, Clone)]
pub struct CrashMap {
    crashes: BTreeMap<String, CrashReport>,
}

impl CrashMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `report` unless its signature is already known. Returns true for
    /// a new unique crash.
    pub fn insert(&mut self, report: CrashReport) -> bool {
        if self.crashes.contains_key(&report.signature) {
            return false;
        }
        self.crashes.insert(report.signature.clone(), report);
        true
    }

    pub fn len(&self) -> usize {
        self.crashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crashes.is_empty()
    }

    pub fn get(&self, signature: &str) -> Option<&CrashReport> {
        self.crashes.get(signature)
    }

    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.crashes.keys().map(String::as_str)
    }

    pub fn reports(&self) -> impl Iterator<Item = &CrashReport> {
        self.crashes.values()
    }
}
