use crate::corpus::Population;
use crate::seed::{PathFingerprint, SeedId};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Numerator of both energy formulas.
const BASE_ENERGY: f64 = 10.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Errors that can occur during scheduler operations.
#[derive(Error, Debug, PartialEq)]
pub enum SchedulerError {
    /// The population is empty, so no seed can be chosen.
    #[error("Population is empty, cannot choose next seed")]
    PopulationEmpty,
    /// The energy vector could not be turned into a sampling distribution.
    #[error("Invalid selection weights: {0}")]
    InvalidWeights(String),
}

/// Identifies what a piece of schedule feedback is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleKey {
    /// A seed in the population.
    Seed(SeedId),
    /// A candidate input that did not become a seed, keyed by the MD5 of its bytes.
    Ephemeral([u8; 16]),
}

impl ScheduleKey {
    pub fn ephemeral(input: &[u8]) -> Self {
        ScheduleKey::Ephemeral(md5::compute(input).0)
    }
}

/// Strategy-specific feedback reported once per completed execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleFeedback {
    /// The path the execution took.
    Path(PathFingerprint),
    /// Number of locations the execution covered for the first time.
    CoverageGain(f64),
}

/// Names the available power schedules in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleKind {
    #[default]
    PathFrequency,
    SeedAge,
}

impl ScheduleKind {
    pub fn build(self) -> Box<dyn PowerSchedule> {
        match self {
            ScheduleKind::PathFrequency => Box::new(PathFrequencySchedule::new()),
            ScheduleKind::SeedAge => Box::new(SeedAgeSchedule::new()),
        }
    }
}

/// A `PowerSchedule` decides how much fuzzing effort each seed receives and
/// samples the next seed accordingly.
///
/// Strategies differ only in how they turn their bookkeeping into energy;
/// sampling is shared through the provided [`PowerSchedule::choose`].
pub trait PowerSchedule: Send {
    fn name(&self) -> &'static str;

    /// Recomputes the energy of every seed in `population`.
    ///
    /// Leaves an empty population untouched. For a non-empty population the
    /// total energy afterwards is strictly positive.
    fn assign_energy(&mut self, population: &mut dyn Population);

    /// Assigns energy, then draws one seed with probability proportional to it.
    fn choose(
        &mut self,
        population: &mut dyn Population,
        rng: &mut dyn RngCore,
    ) -> Result<SeedId, SchedulerError> {
        if population.is_empty() {
            return Err(SchedulerError::PopulationEmpty);
        }
        self.assign_energy(population);
        weighted_choice(&population.energies(), rng)
    }

    /// Folds the feedback of one execution into the strategy's bookkeeping.
    ///
    /// Feedback of a kind the strategy does not use is ignored.
    fn update(&mut self, key: ScheduleKey, feedback: &ScheduleFeedback);
}

/// Samples an id with probability `energy / total`, uniformly if every energy is zero.
pub fn weighted_choice(
    energies: &[(SeedId, u64)],
    rng: &mut dyn RngCore,
) -> Result<SeedId, SchedulerError> {
    if energies.is_empty() {
        return Err(SchedulerError::PopulationEmpty);
    }
    let total: u64 = energies.iter().map(|(_, energy)| *energy).sum();
    let weights: Vec<f64> = if total == 0 {
        vec![1.0 / energies.len() as f64; energies.len()]
    } else {
        energies
            .iter()
            .map(|(_, energy)| *energy as f64 / total as f64)
            .collect()
    };
    let dist =
        WeightedIndex::new(&weights).map_err(|e| SchedulerError::InvalidWeights(e.to_string()))?;
    Ok(energies[dist.sample(rng)].0)
}

/// Replaces an all-zero energy vector with uniform energy 1.
fn ensure_positive_total(population: &mut dyn Population) {
    let all_zero = population.energies().iter().all(|(_, energy)| *energy == 0);
    if all_zero {
        population.visit_energy_mut(&mut |_, energy| *energy = 1);
    }
}

/// Favours seeds whose last observed path is rare.
///
/// `energy = max(1, floor(10 / freq))`, where `freq` counts how often the
/// seed's last path has been executed. Seeds or paths never seen count as 1.
#[derive(Debug, Default, Clone)]
pub struct PathFrequencySchedule {
    path_frequency: HashMap<PathFingerprint, u64>,
    seed_paths: HashMap<SeedId, PathFingerprint>,
}

impl PathFrequencySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many executions took `path`, zero if it was never observed.
    pub fn frequency(&self, path: &PathFingerprint) -> u64 {
        self.path_frequency.get(path).copied().unwrap_or(0)
    }

    /// Number of distinct paths observed so far.
    pub fn distinct_paths(&self) -> usize {
        self.path_frequency.len()
    }

    pub fn energy_of(&self, id: SeedId) -> u64 {
        let freq = self
            .seed_paths
            .get(&id)
            .and_then(|path| self.path_frequency.get(path))
            .copied()
            .unwrap_or(1)
            .max(1);
        ((BASE_ENERGY / freq as f64).floor() as u64).max(1)
    }
}

impl PowerSchedule for PathFrequencySchedule {
    fn name(&self) -> &'static str {
        "path-frequency"
    }

    fn assign_energy(&mut self, population: &mut dyn Population) {
        population.visit_energy_mut(&mut |id, energy| *energy = self.energy_of(id));
        ensure_positive_total(population);
    }

    fn update(&mut self, key: ScheduleKey, feedback: &ScheduleFeedback) {
        let ScheduleFeedback::Path(path) = feedback else {
            return;
        };
        *self.path_frequency.entry(path.clone()).or_insert(0) += 1;
        if let ScheduleKey::Seed(id) = key {
            self.seed_paths.insert(id, path.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SeedMetadata {
    /// Unix seconds at which the seed was first reported.
    created: f64,
    coverage_gain: f64,
}

/// Favours young seeds that recently grew coverage.
///
/// `energy = max(1, floor(10 * (gain + 0.1) / age_hours))` with
/// `age_hours = max(1, (now - created) / 3600)`.
#[derive(Debug, Default, Clone)]
pub struct SeedAgeSchedule {
    metadata: HashMap<SeedId, SeedMetadata>,
}

impl SeedAgeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// [`PowerSchedule::assign_energy`] against an explicit clock.
    pub fn assign_energy_at(&self, population: &mut dyn Population, now: f64) {
        population.visit_energy_mut(&mut |id, energy| *energy = self.energy_at(id, now));
        ensure_positive_total(population);
    }

    /// Records `coverage_gain` for `key`, keeping the first-seen time of known seeds.
    pub fn update_at(&mut self, key: ScheduleKey, coverage_gain: f64, now: f64) {
        let ScheduleKey::Seed(id) = key else {
            return;
        };
        let entry = self.metadata.entry(id).or_insert(SeedMetadata {
            created: now,
            coverage_gain: 0.0,
        });
        entry.coverage_gain = coverage_gain;
    }

    pub fn energy_at(&self, id: SeedId, now: f64) -> u64 {
        let meta = self.metadata.get(&id).copied().unwrap_or(SeedMetadata {
            created: now,
            coverage_gain: 0.0,
        });
        let age_hours = ((now - meta.created) / SECONDS_PER_HOUR).max(1.0);
        let energy = (BASE_ENERGY * (meta.coverage_gain + 0.1) / age_hours).floor();
        if energy.is_finite() && energy >= 1.0 {
            energy as u64
        } else {
            1
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl PowerSchedule for SeedAgeSchedule {
    fn name(&self) -> &'static str {
        "seed-age"
    }

    fn assign_energy(&mut self, population: &mut dyn Population) {
        self.assign_energy_at(population, unix_now());
    }

    fn update(&mut self, key: ScheduleKey, feedback: &ScheduleFeedback) {
        if let ScheduleFeedback::CoverageGain(gain) = feedback {
            self.update_at(key, *gain, unix_now());
        }
    }
}
