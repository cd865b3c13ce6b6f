use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Stable identifier of a seed, unique across the lifetime of a corpus.
///
/// Ids are handed out by the corpus' [`SeedIdAllocator`] and are never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
#[serde(transparent)]
pub struct SeedId(pub u64);

impl fmt::Display for SeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id source owned by a corpus.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedIdAllocator {
    next: u64,
}

impl SeedIdAllocator {
    /// Starts allocating at `next`. Used when reopening a persisted corpus.
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    pub fn allocate(&mut self) -> SeedId {
        let id = SeedId(self.next);
        self.next += 1;
        id
    }

    /// The id the next call to `allocate` will return.
    pub fn peek(&self) -> u64 {
        self.next
    }
}

/// A single code location reported by an instrumented target.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct Location {
    pub function: String,
    pub line: u32,
}

impl Location {
    pub fn new(function: impl Into<String>, line: u32) -> Self {
        Self {
            function: function.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.function, self.line)
    }
}

/// The set of locations exercised by one execution.
///
/// Two executions with equal fingerprints took "the same path". Ordering is
/// by set contents, so the fingerprint can key both hash and tree maps.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Encode,
    Decode,
)]
#[serde(transparent)]
pub struct PathFingerprint(BTreeSet<Location>);

impl PathFingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: Location) -> bool {
        self.0.insert(location)
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.0.contains(location)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.0.iter()
    }

    /// MD5 digest over the ordered location list. Equal fingerprints have equal digests.
    pub fn digest(&self) -> [u8; 16] {
        let mut ctx = md5::Context::new();
        for location in &self.0 {
            ctx.consume(location.function.as_bytes());
            ctx.consume([0u8]);
            ctx.consume(location.line.to_le_bytes());
        }
        ctx.compute().0
    }
}

impl FromIterator<Location> for PathFingerprint {
    fn from_iter<T: IntoIterator<Item = Location>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PathFingerprint {
    type Item = Location;
    type IntoIter = std::collections::btree_set::IntoIter<Location>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An input under test together with its observed coverage and scheduling energy.
///
/// Only `energy` changes after construction; it is recomputed by the active
/// power schedule every round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Seed {
    pub id: SeedId,
    pub data: Vec<u8>,
    pub coverage: PathFingerprint,
    pub energy: u64,
}

impl Seed {
    pub fn new(id: SeedId, data: Vec<u8>, coverage: PathFingerprint) -> Self {
        Self {
            id,
            data,
            coverage,
            energy: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_never_repeats_ids() {
        let mut ids = SeedIdAllocator::default();
        let a = ids.allocate();
        let b = ids.allocate();
        assert_ne!(a, b);
        assert_eq!(ids.peek(), 2);

        let mut resumed = SeedIdAllocator::starting_at(ids.peek());
        assert_eq!(resumed.allocate(), SeedId(2));
    }

    #[test]
    fn fingerprint_equality_is_by_contents() {
        let a: PathFingerprint = [Location::new("f", 1), Location::new("g", 2)]
            .into_iter()
            .collect();
        let b: PathFingerprint = [Location::new("g", 2), Location::new("f", 1)]
            .into_iter()
            .collect();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());

        let c: PathFingerprint = [Location::new("f", 1)].into_iter().collect();
        assert_ne!(a, c);
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn digest_separates_function_and_line() {
        let a: PathFingerprint = [Location::new("f1", 2)].into_iter().collect();
        let b: PathFingerprint = [Location::new("f", 12)].into_iter().collect();
        assert_ne!(a.digest(), b.digest());
    }
}
