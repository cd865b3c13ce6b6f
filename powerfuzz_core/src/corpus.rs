use crate::seed::{PathFingerprint, Seed, SeedId, SeedIdAllocator};
use bincode::{
    self,
    config::{Configuration, Fixint, LittleEndian, NoLimit},
    error::{DecodeError, EncodeError},
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Resident-population cap used when the configuration does not set one.
pub const DEFAULT_MAX_RESIDENT: usize = 500;

/// Defines errors that can arise during corpus operations.
///
/// These cover I/O problems with the on-disk registry and seed files, encoding
/// failures, and lookups of ids the corpus has never seen.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The requested seed id is neither resident nor recorded in the registry.
    #[error("Seed {0} not found in memory or registry")]
    InputNotFound(SeedId),

    /// An I/O error occurred while reading or writing corpus files.
    #[error("Corpus I/O error: {0}")]
    Io(String),

    /// A seed, population or registry could not be encoded.
    #[error("Corpus serialization error: {0}")]
    Serialization(String),

    /// A seed, population or registry could not be decoded. For the registry
    /// this means the on-disk state is corrupted.
    #[error("Corpus deserialization error: {0}")]
    Deserialization(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}
impl From<serde_json::Error> for CorpusError {
    fn from(err: serde_json::Error) -> Self {
        CorpusError::Deserialization(format!("JSON operation error: {}", err))
    }
}
impl From<EncodeError> for CorpusError {
    fn from(err: EncodeError) -> Self {
        CorpusError::Serialization(format!("Bincode encoding error: {}", err))
    }
}
impl From<DecodeError> for CorpusError {
    fn from(err: DecodeError) -> Self {
        CorpusError::Deserialization(format!("Bincode decoding error: {}", err))
    }
}

/// The seed collection a power schedule assigns energy to and samples from.
///
/// Implemented by [`CorpusStore`], where paged seeds participate through their
/// registry metadata, and by plain `Vec<Seed>` populations.
pub trait Population {
    /// Number of live seeds, resident or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current `(id, energy)` pairs in a stable order.
    fn energies(&self) -> Vec<(SeedId, u64)>;

    /// Calls `visit` with mutable access to the energy of every live seed.
    fn visit_energy_mut(&mut self, visit: &mut dyn FnMut(SeedId, &mut u64));
}

impl Population for Vec<Seed> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn energies(&self) -> Vec<(SeedId, u64)> {
        self.iter().map(|seed| (seed.id, seed.energy)).collect()
    }

    fn visit_energy_mut(&mut self, visit: &mut dyn FnMut(SeedId, &mut u64)) {
        for seed in self.iter_mut() {
            visit(seed.id, &mut seed.energy);
        }
    }
}

/// Registry record of a seed that has been paged out to disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub id: SeedId,
    /// Location of the bincode-encoded seed data.
    pub path: PathBuf,
    /// Energy the seed had when it was last scheduled.
    pub energy: u64,
    pub coverage: PathFingerprint,
}

/// On-disk shape of `seed_registry.json`.
#[derive(Serialize, Deserialize, Debug, Default)]
struct RegistryFile {
    next_id: u64,
    entries: Vec<RegistryEntry>,
}

fn data_digest(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

fn current_bincode_config() -> Configuration<LittleEndian, Fixint, NoLimit> {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// Reads a population previously written by [`dump_population`].
///
/// A missing file is an empty population, not an error.
pub fn load_population(path: &Path) -> Result<Vec<Seed>, CorpusError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(CorpusError::Io(format!(
                "Failed to read population file {:?}: {}",
                path, e
            )));
        }
    };
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let (seeds, _length): (Vec<Seed>, usize) =
        bincode::decode_from_slice(&bytes, current_bincode_config()).map_err(|e| {
            CorpusError::Deserialization(format!(
                "Bincode deserialization failed for population file {:?}: {}",
                path, e
            ))
        })?;
    Ok(seeds)
}

/// Writes `seeds` so that [`load_population`] returns an identical collection.
pub fn dump_population(path: &Path, seeds: &[Seed]) -> Result<(), CorpusError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let bytes = bincode::encode_to_vec(seeds, current_bincode_config())?;
    fs::write(path, bytes).map_err(|e| {
        CorpusError::Io(format!(
            "Failed to write population file {:?}: {}",
            path, e
        ))
    })?;
    Ok(())
}

/// Owns the live seed population: a bounded in-memory cache of resident seeds
/// plus an on-disk registry of seeds paged out under memory pressure.
///
/// A seed id is either resident or in the registry, never both. Whenever the
/// resident count exceeds `max_resident`, minimum-energy residents (ties broken
/// uniformly at random) are persisted until the cap holds again. Paged seeds
/// remain part of the [`Population`] and are rehydrated by [`CorpusStore::resident`].
pub struct CorpusStore {
    /// Directory holding paged seed files and the registry.
    corpus_dir_path: PathBuf,
    /// Path to `seed_registry.json` within `corpus_dir_path`.
    registry_file_path: PathBuf,
    resident: BTreeMap<SeedId, Seed>,
    registry: BTreeMap<SeedId, RegistryEntry>,
    /// md5 of the data of every live seed, resident or paged.
    data_digests: HashSet<[u8; 16]>,
    ids: SeedIdAllocator,
    max_resident: usize,
    /// Breaks ties between equally low-energy eviction candidates.
    eviction_rng: ChaCha8Rng,
    bincode_config: Configuration<LittleEndian, Fixint, NoLimit>,
}

impl CorpusStore {
    /// Default filename for the seed registry.
    pub const REGISTRY_FILENAME: &'static str = "seed_registry.json";
    /// File extension for paged seed data.
    const SEED_FILE_EXTENSION: &'static str = "fuzzinput";

    /// Opens the corpus rooted at `corpus_dir_path`, creating it if needed.
    ///
    /// If a registry already exists its paged seeds become part of the live
    /// population and id allocation resumes after the highest recorded id.
    /// A `max_resident` of zero is raised to one.
    pub fn open(
        corpus_dir_path: impl Into<PathBuf>,
        max_resident: usize,
    ) -> Result<Self, CorpusError> {
        let corpus_dir_path = corpus_dir_path.into();
        if !corpus_dir_path.exists() {
            fs::create_dir_all(&corpus_dir_path).map_err(|e| {
                CorpusError::Io(format!(
                    "Failed to create corpus directory at {:?}: {}",
                    corpus_dir_path, e
                ))
            })?;
        } else if !corpus_dir_path.is_dir() {
            return Err(CorpusError::Io(format!(
                "Corpus path {:?} exists but is not a directory",
                corpus_dir_path
            )));
        }

        let registry_file_path = corpus_dir_path.join(Self::REGISTRY_FILENAME);
        let mut store = Self {
            corpus_dir_path,
            registry_file_path,
            resident: BTreeMap::new(),
            registry: BTreeMap::new(),
            data_digests: HashSet::new(),
            ids: SeedIdAllocator::default(),
            max_resident: max_resident.max(1),
            eviction_rng: ChaCha8Rng::from_rng(&mut rand::rng()),
            bincode_config: current_bincode_config(),
        };

        store.load_registry_from_disk()?;
        if !store.registry_file_path.exists() {
            store.save_registry_to_disk()?;
        }
        Ok(store)
    }

    /// Makes eviction tie-breaking reproducible.
    pub fn with_eviction_seed(mut self, seed: u64) -> Self {
        self.eviction_rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir_path
    }

    pub fn max_resident(&self) -> usize {
        self.max_resident
    }

    /// Number of seeds currently held in memory.
    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }

    /// Number of seeds currently paged to disk.
    pub fn paged_len(&self) -> usize {
        self.registry.len()
    }

    pub fn contains(&self, id: SeedId) -> bool {
        self.resident.contains_key(&id) || self.registry.contains_key(&id)
    }

    pub fn is_resident(&self, id: SeedId) -> bool {
        self.resident.contains_key(&id)
    }

    /// Whether some live seed already holds exactly `data`.
    pub fn contains_data(&self, data: &[u8]) -> bool {
        self.data_digests.contains(&data_digest(data))
    }

    pub fn registry_entry(&self, id: SeedId) -> Option<&RegistryEntry> {
        self.registry.get(&id)
    }

    pub fn resident_seeds(&self) -> impl Iterator<Item = &Seed> {
        self.resident.values()
    }

    /// Adds a new resident seed and enforces the capacity bound.
    ///
    /// New seeds start at energy 1 until the next scheduling round.
    pub fn add(&mut self, data: Vec<u8>, coverage: PathFingerprint) -> Result<SeedId, CorpusError> {
        let id = self.ids.allocate();
        self.data_digests.insert(data_digest(&data));
        let mut seed = Seed::new(id, data, coverage);
        seed.energy = 1;
        self.resident.insert(id, seed);
        self.enforce_capacity(None)?;
        Ok(id)
    }

    /// Returns the seed with `id`, rehydrating it from disk if it was paged out.
    ///
    /// Rehydration moves the seed from the registry back into the cache, which
    /// may in turn page out another resident seed.
    pub fn resident(&mut self, id: SeedId) -> Result<&Seed, CorpusError> {
        if !self.resident.contains_key(&id) {
            let entry = self
                .registry
                .get(&id)
                .cloned()
                .ok_or(CorpusError::InputNotFound(id))?;
            let data = self.load_seed_data(&entry.path)?;
            let mut seed = Seed::new(id, data, entry.coverage);
            seed.energy = entry.energy;

            self.registry.remove(&id);
            self.resident.insert(id, seed);
            self.save_registry_to_disk()?;
            tracing::debug!(seed = %id, "rehydrated seed from {:?}", entry.path);
            self.enforce_capacity(Some(id))?;
        }
        self.resident.get(&id).ok_or(CorpusError::InputNotFound(id))
    }

    /// Replaces the coverage snapshot of a live seed. For a paged seed the
    /// registry is rewritten.
    pub fn record_coverage(
        &mut self,
        id: SeedId,
        coverage: PathFingerprint,
    ) -> Result<(), CorpusError> {
        if let Some(seed) = self.resident.get_mut(&id) {
            seed.coverage = coverage;
            return Ok(());
        }
        let entry = self
            .registry
            .get_mut(&id)
            .ok_or(CorpusError::InputNotFound(id))?;
        entry.coverage = coverage;
        self.save_registry_to_disk()
    }

    /// Writes a resident seed to disk, records it in the registry and drops it
    /// from the in-memory cache. Persisting an already paged seed is a no-op.
    pub fn persist(&mut self, id: SeedId) -> Result<(), CorpusError> {
        if self.registry.contains_key(&id) {
            return Ok(());
        }
        let seed = self.resident.get(&id).ok_or(CorpusError::InputNotFound(id))?;
        let file_path = self.seed_file_path(id);
        let bytes_to_write = bincode::encode_to_vec(&seed.data, self.bincode_config)?;
        fs::write(&file_path, bytes_to_write).map_err(|e| {
            CorpusError::Io(format!(
                "Failed to write seed file {:?}: {}",
                file_path, e
            ))
        })?;

        let entry = RegistryEntry {
            id,
            path: file_path,
            energy: seed.energy,
            coverage: seed.coverage.clone(),
        };
        self.registry.insert(id, entry);
        self.resident.remove(&id);
        self.save_registry_to_disk()
    }

    /// Pages out minimum-energy residents until at most `max_resident` remain.
    ///
    /// `keep` is never chosen. Returns the number of seeds evicted.
    pub fn enforce_capacity(&mut self, keep: Option<SeedId>) -> Result<usize, CorpusError> {
        let mut evicted = 0;
        while self.resident.len() > self.max_resident {
            let eligible: Vec<(SeedId, u64)> = self
                .resident
                .values()
                .filter(|s| Some(s.id) != keep)
                .map(|s| (s.id, s.energy))
                .collect();
            let Some(min_energy) = eligible.iter().map(|(_, energy)| *energy).min() else {
                break;
            };
            let candidates: Vec<SeedId> = eligible
                .iter()
                .filter(|(_, energy)| *energy == min_energy)
                .map(|(id, _)| *id)
                .collect();
            let victim = candidates[self.eviction_rng.random_range(0..candidates.len())];
            self.persist(victim)?;
            tracing::debug!(seed = %victim, energy = min_energy, "paged out seed");
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Writes the registry, including energies updated since the last structural change.
    ///
    /// Energies of paged seeds are updated in memory by every scheduling round
    /// but the energies in `seed_registry.json` stay stale until the next
    /// registry write: a page-out, a rehydration, a coverage update or this call.
    pub fn flush(&self) -> Result<(), CorpusError> {
        self.save_registry_to_disk()
    }

    /// Adds each seed of a loaded population under a fresh id, keeping its
    /// coverage and energy. Seeds whose data is already live, for example
    /// paged seeds reloaded from the registry, are skipped.
    pub fn import_population(&mut self, seeds: Vec<Seed>) -> Result<Vec<SeedId>, CorpusError> {
        let mut imported = Vec::with_capacity(seeds.len());
        for seed in seeds {
            if !self.data_digests.insert(data_digest(&seed.data)) {
                tracing::debug!(seed = %seed.id, "population seed already live, skipping");
                continue;
            }
            let id = self.ids.allocate();
            let energy = seed.energy.max(1);
            self.resident.insert(
                id,
                Seed {
                    id,
                    energy,
                    ..seed
                },
            );
            self.enforce_capacity(None)?;
            imported.push(id);
        }
        Ok(imported)
    }

    /// Collects every live seed, reading paged data from disk without
    /// rehydrating it.
    pub fn export_population(&self) -> Result<Vec<Seed>, CorpusError> {
        let mut seeds: Vec<Seed> = self.resident.values().cloned().collect();
        for entry in self.registry.values() {
            let mut seed = Seed::new(
                entry.id,
                self.load_seed_data(&entry.path)?,
                entry.coverage.clone(),
            );
            seed.energy = entry.energy;
            seeds.push(seed);
        }
        seeds.sort_by_key(|seed| seed.id);
        Ok(seeds)
    }

    /// Loads raw seed files from a collection of paths.
    ///
    /// Each path can be a seed file or a directory whose files (not
    /// subdirectories) are seeds. Hidden files and the registry are skipped.
    /// Every file becomes one seed with empty coverage unless a live seed
    /// already holds the same data. Returns the number of seeds added.
    pub fn load_initial_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, CorpusError> {
        let mut loaded_count = 0;
        for path_buf in seed_paths {
            let path_ref = path_buf.as_path();
            if path_ref.is_file() {
                let data_bytes = fs::read(path_ref).map_err(|e| {
                    CorpusError::Io(format!("Failed to read seed file {:?}: {}", path_ref, e))
                })?;
                if !self.contains_data(&data_bytes) {
                    self.add(data_bytes, PathFingerprint::new())?;
                    loaded_count += 1;
                }
            } else if path_ref.is_dir() {
                let mut files = Vec::new();
                for entry_result in fs::read_dir(path_ref).map_err(|e| {
                    CorpusError::Io(format!(
                        "Failed to read seed directory {:?}: {}",
                        path_ref, e
                    ))
                })? {
                    let entry = entry_result.map_err(|e| {
                        CorpusError::Io(format!(
                            "Error reading entry in seed directory {:?}: {}",
                            path_ref, e
                        ))
                    })?;
                    let file_path_in_dir = entry.path();
                    let skip = file_path_in_dir
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| {
                            name == Self::REGISTRY_FILENAME || name.starts_with('.')
                        });
                    if file_path_in_dir.is_file() && !skip {
                        files.push(file_path_in_dir);
                    }
                }
                files.sort();
                for file_path in files {
                    let data_bytes = fs::read(&file_path).map_err(|e| {
                        CorpusError::Io(format!(
                            "Failed to read seed file {:?}: {}",
                            file_path, e
                        ))
                    })?;
                    if !self.contains_data(&data_bytes) {
                        self.add(data_bytes, PathFingerprint::new())?;
                        loaded_count += 1;
                    }
                }
            } else {
                tracing::warn!("seed path {:?} does not exist, skipping", path_ref);
            }
        }
        Ok(loaded_count)
    }

    /// Example: `#7` -> `/path/to/corpus/seed_00000007.fuzzinput`.
    fn seed_file_path(&self, id: SeedId) -> PathBuf {
        self.corpus_dir_path
            .join(format!("seed_{:08}", id.0))
            .with_extension(Self::SEED_FILE_EXTENSION)
    }

    fn load_seed_data(&self, file_path: &Path) -> Result<Vec<u8>, CorpusError> {
        let file_content = fs::read(file_path).map_err(|e| {
            CorpusError::Io(format!("Failed to read seed file {:?}: {}", file_path, e))
        })?;
        let (data, _length): (Vec<u8>, usize) =
            bincode::decode_from_slice(&file_content, self.bincode_config).map_err(|e| {
                CorpusError::Deserialization(format!(
                    "Bincode deserialization failed for seed file {:?}: {}",
                    file_path, e
                ))
            })?;
        Ok(data)
    }

    fn save_registry_to_disk(&self) -> Result<(), CorpusError> {
        let file = File::create(&self.registry_file_path).map_err(|e| {
            CorpusError::Io(format!(
                "Failed to create or truncate registry file {:?}: {}",
                self.registry_file_path, e
            ))
        })?;
        let writer = BufWriter::new(file);
        let registry_file = RegistryFile {
            next_id: self.ids.peek(),
            entries: self.registry.values().cloned().collect(),
        };
        serde_json::to_writer_pretty(writer, &registry_file).map_err(|e| {
            CorpusError::Serialization(format!(
                "Failed to serialize seed registry to JSON for {:?}: {}",
                self.registry_file_path, e
            ))
        })?;
        Ok(())
    }

    /// An absent or empty registry file is an empty registry; anything that
    /// fails to parse is reported as corruption.
    fn load_registry_from_disk(&mut self) -> Result<(), CorpusError> {
        if !self.registry_file_path.is_file() {
            return Ok(());
        }
        let file = File::open(&self.registry_file_path).map_err(|e| {
            CorpusError::Io(format!(
                "Failed to open registry file {:?}: {}",
                self.registry_file_path, e
            ))
        })?;
        if file.metadata()?.len() == 0 {
            return Ok(());
        }

        let registry_file: RegistryFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| {
                CorpusError::Deserialization(format!(
                    "Failed to parse JSON from registry file {:?}: {}. The file might be corrupted.",
                    self.registry_file_path, e
                ))
            })?;

        let highest_seen = registry_file
            .entries
            .iter()
            .map(|entry| entry.id.0 + 1)
            .max()
            .unwrap_or(0);
        self.ids = SeedIdAllocator::starting_at(registry_file.next_id.max(highest_seen));
        self.registry = registry_file
            .entries
            .into_iter()
            .map(|entry| (entry.id, entry))
            .collect();
        for entry in self.registry.values() {
            let data = self.load_seed_data(&entry.path)?;
            self.data_digests.insert(data_digest(&data));
        }
        Ok(())
    }
}

impl Population for CorpusStore {
    fn len(&self) -> usize {
        self.resident.len() + self.registry.len()
    }

    fn energies(&self) -> Vec<(SeedId, u64)> {
        let mut pairs: Vec<(SeedId, u64)> = self
            .resident
            .values()
            .map(|seed| (seed.id, seed.energy))
            .chain(self.registry.values().map(|entry| (entry.id, entry.energy)))
            .collect();
        pairs.sort_by_key(|(id, _)| *id);
        pairs
    }

    fn visit_energy_mut(&mut self, visit: &mut dyn FnMut(SeedId, &mut u64)) {
        for seed in self.resident.values_mut() {
            visit(seed.id, &mut seed.energy);
        }
        for entry in self.registry.values_mut() {
            visit(entry.id, &mut entry.energy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::Location;
    use tempfile::tempdir;

    fn fingerprint(lines: &[u32]) -> PathFingerprint {
        lines.iter().map(|&l| Location::new("target", l)).collect()
    }

    #[test]
    fn corpus_store_open_creates_dir_and_empty_registry() -> Result<(), CorpusError> {
        let base_dir = tempdir().unwrap();
        let corpus_p = base_dir.path().join("new_corpus");
        assert!(!corpus_p.exists());
        let store = CorpusStore::open(corpus_p.clone(), 4)?;
        assert!(corpus_p.is_dir());
        assert!(corpus_p.join(CorpusStore::REGISTRY_FILENAME).exists());
        assert_eq!(store.len(), 0);

        let reopened = CorpusStore::open(corpus_p, 4)?;
        assert_eq!(reopened.len(), 0);
        Ok(())
    }

    #[test]
    fn corpus_store_open_rejects_file_path() {
        let dir = tempdir().unwrap();
        let f_path = dir.path().join("file.txt");
        File::create(&f_path).unwrap();
        match CorpusStore::open(f_path, 4) {
            Err(CorpusError::Io(msg)) => assert!(msg.contains("not a directory")),
            other => panic!("expected Io error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn corpus_store_open_reports_corrupted_registry() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CorpusStore::REGISTRY_FILENAME), "{ not json").unwrap();
        assert!(matches!(
            CorpusStore::open(dir.path(), 4),
            Err(CorpusError::Deserialization(_))
        ));
    }

    #[test]
    fn persist_then_resident_round_trips_through_disk() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path(), 8)?;
        let id = store.add(b"hello".to_vec(), fingerprint(&[1, 2]))?;
        store.visit_energy_mut(&mut |_, energy| *energy = 6);

        store.persist(id)?;
        assert!(!store.is_resident(id));
        let entry = store.registry_entry(id).expect("registry entry").clone();
        assert_eq!(entry.energy, 6);
        assert_eq!(entry.coverage, fingerprint(&[1, 2]));
        assert!(entry.path.exists());
        assert_eq!(store.len(), 1, "paged seeds stay in the population");

        let seed = store.resident(id)?.clone();
        assert_eq!(seed.data, b"hello".to_vec());
        assert_eq!(seed.energy, 6);
        assert!(store.is_resident(id));
        assert!(
            store.registry_entry(id).is_none(),
            "a seed is never both resident and paged"
        );
        Ok(())
    }

    #[test]
    fn resident_reports_unknown_ids() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path(), 8)?;
        assert!(matches!(
            store.resident(SeedId(42)),
            Err(CorpusError::InputNotFound(SeedId(42)))
        ));
        Ok(())
    }

    #[test]
    fn capacity_is_never_exceeded_and_evictees_stay_retrievable() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path(), 3)?.with_eviction_seed(9);
        let mut ids = Vec::new();
        for i in 0..10u8 {
            ids.push(store.add(vec![i; usize::from(i) + 1], fingerprint(&[u32::from(i)]))?);
            assert!(store.resident_len() <= 3);
        }
        assert_eq!(store.len(), 10);
        assert_eq!(store.paged_len(), 7);

        for (i, id) in ids.iter().enumerate() {
            let seed = store.resident(*id)?;
            assert_eq!(seed.data, vec![i as u8; i + 1]);
            assert!(store.resident_len() <= 3);
            assert_eq!(store.len(), 10);
        }
        Ok(())
    }

    #[test]
    fn eviction_picks_a_minimum_energy_resident() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path(), 2)?.with_eviction_seed(1);
        let a = store.add(b"a".to_vec(), fingerprint(&[1]))?;
        let b = store.add(b"b".to_vec(), fingerprint(&[2]))?;
        store.visit_energy_mut(&mut |id, energy| *energy = if id == a { 5 } else { 7 });

        let c = store.add(b"c".to_vec(), fingerprint(&[3]))?;
        assert!(store.is_resident(a));
        assert!(store.is_resident(b));
        assert!(!store.is_resident(c));
        assert_eq!(store.registry_entry(c).map(|e| e.energy), Some(1));
        Ok(())
    }

    #[test]
    fn rehydrated_seed_is_not_immediately_evicted_again() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path(), 1)?;
        let a = store.add(b"a".to_vec(), PathFingerprint::new())?;
        let b = store.add(b"b".to_vec(), PathFingerprint::new())?;
        let paged = if store.is_resident(a) { b } else { a };

        assert_eq!(store.resident(paged)?.id, paged);
        assert!(store.is_resident(paged));
        assert_eq!(store.resident_len(), 1);
        Ok(())
    }

    #[test]
    fn reopened_store_keeps_paged_seeds_and_fresh_ids() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let paged_id;
        {
            let mut store = CorpusStore::open(dir.path(), 4)?;
            paged_id = store.add(b"keep me".to_vec(), fingerprint(&[3]))?;
            store.add(b"volatile".to_vec(), fingerprint(&[4]))?;
            store.persist(paged_id)?;
        }
        let mut store = CorpusStore::open(dir.path(), 4)?;
        assert_eq!(store.len(), 1, "only paged seeds survive a restart");
        assert_eq!(store.resident(paged_id)?.data, b"keep me".to_vec());

        let fresh = store.add(b"new".to_vec(), PathFingerprint::new())?;
        assert!(fresh.0 >= 2, "ids are never reused across restarts");
        Ok(())
    }

    #[test]
    fn population_round_trips_through_dump_and_load() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("corpus_1");
        let mut seeds = vec![
            Seed::new(SeedId(0), b"a".to_vec(), PathFingerprint::new()),
            Seed::new(SeedId(1), b"bb".to_vec(), fingerprint(&[1, 5, 9])),
            Seed::new(SeedId(7), vec![0, 255, 10], fingerprint(&[2])),
        ];
        seeds[1].energy = 10;

        dump_population(&path, &seeds)?;
        assert_eq!(load_population(&path)?, seeds);
        Ok(())
    }

    #[test]
    fn missing_population_file_is_empty() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        assert!(load_population(&dir.path().join("absent"))?.is_empty());
        Ok(())
    }

    #[test]
    fn import_and_export_population_preserve_contents() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path().join("c"), 1)?;
        let imported = store.import_population(vec![
            Seed::new(SeedId(40), b"x".to_vec(), fingerprint(&[1])),
            Seed::new(SeedId(41), b"yy".to_vec(), fingerprint(&[2])),
        ])?;
        assert_eq!(imported, vec![SeedId(0), SeedId(1)]);
        assert_eq!(store.paged_len(), 1);

        let exported = store.export_population()?;
        let data: Vec<&[u8]> = exported.iter().map(|s| s.as_bytes()).collect();
        assert_eq!(data, vec![b"x".as_slice(), b"yy".as_slice()]);
        Ok(())
    }

    #[test]
    fn reopened_store_skips_population_seeds_it_already_pages() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let corpus_p = dir.path().join("corpus");
        let population = {
            let mut store = CorpusStore::open(&corpus_p, 1)?.with_eviction_seed(3);
            store.add(b"one".to_vec(), fingerprint(&[1]))?;
            store.add(b"two".to_vec(), fingerprint(&[2]))?;
            store.add(b"three".to_vec(), fingerprint(&[3]))?;
            assert_eq!(store.paged_len(), 2);
            store.export_population()?
        };

        let mut store = CorpusStore::open(&corpus_p, 1)?;
        assert_eq!(store.len(), 2);
        let live = [&b"one"[..], &b"two"[..], &b"three"[..]]
            .into_iter()
            .filter(|data| store.contains_data(data))
            .count();
        assert_eq!(live, 2, "paged seeds are known after a restart");
        let imported = store.import_population(population)?;
        assert_eq!(imported.len(), 1, "only the seed that was resident is new");
        assert_eq!(store.len(), 3);

        let mut data: Vec<Vec<u8>> = store
            .export_population()?
            .into_iter()
            .map(|seed| seed.data)
            .collect();
        data.sort();
        assert_eq!(data, vec![b"one".to_vec(), b"three".to_vec(), b"two".to_vec()]);
        Ok(())
    }

    #[test]
    fn paged_energies_reach_the_registry_file_on_flush() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path(), 4)?;
        let id = store.add(b"p".to_vec(), PathFingerprint::new())?;
        store.persist(id)?;
        store.visit_energy_mut(&mut |_, energy| *energy = 9);

        let on_disk = CorpusStore::open(dir.path(), 4)?;
        assert_eq!(on_disk.registry_entry(id).map(|e| e.energy), Some(1));

        store.flush()?;
        let on_disk = CorpusStore::open(dir.path(), 4)?;
        assert_eq!(on_disk.registry_entry(id).map(|e| e.energy), Some(9));
        Ok(())
    }

    #[test]
    fn record_coverage_updates_resident_and_paged_seeds() -> Result<(), CorpusError> {
        let dir = tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path(), 4)?;
        let resident = store.add(b"r".to_vec(), PathFingerprint::new())?;
        let paged = store.add(b"p".to_vec(), PathFingerprint::new())?;
        store.persist(paged)?;

        store.record_coverage(resident, fingerprint(&[1]))?;
        store.record_coverage(paged, fingerprint(&[2, 3]))?;
        assert_eq!(store.resident(resident)?.coverage, fingerprint(&[1]));
        assert_eq!(
            store.registry_entry(paged).map(|e| e.coverage.clone()),
            Some(fingerprint(&[2, 3]))
        );

        let reopened = CorpusStore::open(dir.path(), 4)?;
        assert_eq!(
            reopened.registry_entry(paged).map(|e| e.coverage.clone()),
            Some(fingerprint(&[2, 3])),
            "paged coverage reaches the registry file"
        );
        assert!(matches!(
            store.record_coverage(SeedId(99), PathFingerprint::new()),
            Err(CorpusError::InputNotFound(SeedId(99)))
        ));
        Ok(())
    }

    #[test]
    fn load_initial_seeds_reads_files_and_directories() -> Result<(), CorpusError> {
        let temp_dir = tempdir().unwrap();
        let seed1_p = temp_dir.path().join("s1.bin");
        fs::write(&seed1_p, [1, 2]).unwrap();
        let seed_d = temp_dir.path().join("s_dir");
        fs::create_dir(&seed_d).unwrap();
        fs::write(seed_d.join("s2.dat"), [6]).unwrap();
        fs::write(seed_d.join("s3.dat"), [7, 8, 9]).unwrap();
        fs::write(seed_d.join(".hidden"), "data").unwrap();

        let mut store = CorpusStore::open(temp_dir.path().join("corpus"), 16)?;
        let count = store.load_initial_seeds(&[seed1_p, seed_d, temp_dir.path().join("nope")])?;
        assert_eq!(count, 3);
        assert_eq!(store.len(), 3);

        let again = store.load_initial_seeds(&[temp_dir.path().join("s1.bin")])?;
        assert_eq!(again, 0, "identical seed files are not added twice");
        assert_eq!(store.len(), 3);
        Ok(())
    }

    #[test]
    fn vec_population_exposes_energies() {
        let mut seeds = vec![
            Seed::new(SeedId(3), b"a".to_vec(), PathFingerprint::new()),
            Seed::new(SeedId(4), b"b".to_vec(), PathFingerprint::new()),
        ];
        seeds.visit_energy_mut(&mut |id, energy| *energy = id.0 * 2);
        assert_eq!(Population::len(&seeds), 2);
        assert_eq!(seeds.energies(), vec![(SeedId(3), 6), (SeedId(4), 8)]);
    }
}
