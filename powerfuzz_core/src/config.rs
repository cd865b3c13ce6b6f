use crate::corpus::DEFAULT_MAX_RESIDENT;
use crate::mutator::MutationOperator;
use crate::scheduler::ScheduleKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_run_time_secs")]
    pub run_time_secs: u64,
    /// Fixed RNG seed; a random one is drawn when absent.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

pub fn default_run_time_secs() -> u64 {
    60
}
pub fn default_stats_interval_ms() -> u64 {
    1000
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            run_time_secs: default_run_time_secs(),
            rng_seed: None,
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusConfig {
    #[serde(default)]
    pub seed_paths: Vec<PathBuf>,
    #[serde(default = "default_population_file")]
    pub population_file: PathBuf,
    #[serde(default = "default_on_disk_path")]
    pub on_disk_path: PathBuf,
    #[serde(default = "default_max_resident")]
    pub max_resident: usize,
}

pub fn default_population_file() -> PathBuf {
    PathBuf::from("corpus/corpus_1")
}

pub fn default_on_disk_path() -> PathBuf {
    PathBuf::from("./.powerfuzz_corpus")
}

fn default_max_resident() -> usize {
    DEFAULT_MAX_RESIDENT
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            seed_paths: Vec::new(),
            population_file: default_population_file(),
            on_disk_path: default_on_disk_path(),
            max_resident: default_max_resident(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub kind: ScheduleKind,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MutatorConfig {
    #[serde(default = "default_operators")]
    pub operators: Vec<MutationOperator>,
}

fn default_operators() -> Vec<MutationOperator> {
    MutationOperator::DEFAULT_SET.to_vec()
}

impl Default for MutatorConfig {
    fn default() -> Self {
        Self {
            operators: default_operators(),
        }
    }
}

/// Per-sample override of the schedule and mutation operators.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub sample: u32,
    #[serde(default)]
    pub schedule: Option<ScheduleKind>,
    #[serde(default)]
    pub operators: Option<Vec<MutationOperator>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub schedule: ScheduleKind,
    pub operators: Vec<MutationOperator>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub mutator: MutatorConfig,
    #[serde(default, rename = "profile")]
    pub profiles: Vec<ProfileConfig>,
}

impl FuzzConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The schedule and operators to use for `sample`. The first matching
    /// profile overrides the global sections field by field.
    pub fn strategy_for(&self, sample: u32) -> Strategy {
        let profile = self.profiles.iter().find(|p| p.sample == sample);
        Strategy {
            schedule: profile
                .and_then(|p| p.schedule)
                .unwrap_or(self.schedule.kind),
            operators: profile
                .and_then(|p| p.operators.clone())
                .unwrap_or_else(|| self.mutator.operators.clone()),
        }
    }
}
