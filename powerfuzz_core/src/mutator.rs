use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Run lengths (in bits for `flip_bits`, in bytes elsewhere) an operator picks from.
const RUN_WIDTHS: [usize; 3] = [1, 2, 4];
/// Magnitude bound for `arithmetic_mutate` deltas.
const ARITH_MAX_DELTA: i16 = 35;
/// Upper bound on the number of bytes a havoc operator inserts or replaces.
const HAVOC_MAX_CHUNK: usize = 8;
/// Probability that havoc operators reuse a slice of the input instead of random bytes.
const HAVOC_SPLICE_PROBABILITY: f64 = 0.75;

const INTERESTING_8: [u8; 4] = [0x00, 0x7F, 0x80, 0xFF];
const INTERESTING_16: [u16; 4] = [0x0000, 0x7FFF, 0x8000, 0xFFFF];
const INTERESTING_32: [u32; 4] = [0x0000_0000, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFF];

/// A `Mutator` transforms a byte buffer into a new, potentially modified byte buffer.
///
/// Mutators are the engine for generating new test cases from existing seeds in the
/// fuzzing loop. Implementations must never index outside the input and must never
/// fail: when no valid mutation position exists they return the input unchanged.
///
/// # Type Parameters
/// * `R`: The type of random number generator used for mutation decisions.
pub trait Mutator<R: Rng + ?Sized> {
    /// Produces a new buffer derived from `input`.
    fn mutate(&mut self, input: &[u8], rng: &mut R) -> Vec<u8>;
}

/// The byte-level mutation operators known to the engine.
///
/// Each variant corresponds to a free function of the same name in this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationOperator {
    InsertRandomByte,
    FlipBits,
    ArithmeticMutate,
    InterestingValueSubstitute,
    HavocInsert,
    HavocReplace,
    DeleteRandomBytes,
}

impl MutationOperator {
    /// Operators enabled when the configuration does not name any.
    pub const DEFAULT_SET: [MutationOperator; 6] = [
        MutationOperator::InsertRandomByte,
        MutationOperator::FlipBits,
        MutationOperator::ArithmeticMutate,
        MutationOperator::InterestingValueSubstitute,
        MutationOperator::HavocInsert,
        MutationOperator::HavocReplace,
    ];

    pub fn apply<R: Rng + ?Sized>(self, input: &[u8], rng: &mut R) -> Vec<u8> {
        match self {
            MutationOperator::InsertRandomByte => insert_random_byte(input, rng),
            MutationOperator::FlipBits => flip_bits(input, rng),
            MutationOperator::ArithmeticMutate => arithmetic_mutate(input, rng),
            MutationOperator::InterestingValueSubstitute => {
                interesting_value_substitute(input, rng)
            }
            MutationOperator::HavocInsert => havoc_insert(input, rng),
            MutationOperator::HavocReplace => havoc_replace(input, rng),
            MutationOperator::DeleteRandomBytes => delete_random_bytes(input, rng),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MutationOperator::InsertRandomByte => "insert-random-byte",
            MutationOperator::FlipBits => "flip-bits",
            MutationOperator::ArithmeticMutate => "arithmetic-mutate",
            MutationOperator::InterestingValueSubstitute => "interesting-value-substitute",
            MutationOperator::HavocInsert => "havoc-insert",
            MutationOperator::HavocReplace => "havoc-replace",
            MutationOperator::DeleteRandomBytes => "delete-random-bytes",
        }
    }
}

impl fmt::Display for MutationOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn pick_width<R: Rng + ?Sized>(rng: &mut R) -> usize {
    RUN_WIDTHS[rng.random_range(0..RUN_WIDTHS.len())]
}

fn random_bytes<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<u8> {
    (0..len).map(|_| rng.random::<u8>()).collect()
}

/// Inserts one printable byte (`32..127`) at a uniformly chosen offset in `[0, len]`.
pub fn insert_random_byte<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let mut out = input.to_vec();
    let offset = rng.random_range(0..=out.len());
    out.insert(offset, rng.random_range(32u8..127u8));
    out
}

/// Inverts 1, 2 or 4 consecutive bits, most significant bit first within a byte.
///
/// The run may straddle a byte boundary. Buffers with fewer bits than the run
/// length come back unchanged.
pub fn flip_bits<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let mut out = input.to_vec();
    let run = pick_width(rng);
    let total_bits = out.len() * 8;
    if total_bits < run {
        return out;
    }
    let start = rng.random_range(0..=total_bits - run);
    for bit in start..start + run {
        out[bit / 8] ^= 0x80 >> (bit % 8);
    }
    out
}

/// Adds an independent delta in `[-35, 35]` to each byte of a 1, 2 or 4 byte run, modulo 256.
pub fn arithmetic_mutate<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let mut out = input.to_vec();
    if out.is_empty() {
        return out;
    }
    let run = pick_width(rng).min(out.len());
    let start = rng.random_range(0..=out.len() - run);
    for byte in &mut out[start..start + run] {
        let delta = rng.random_range(-ARITH_MAX_DELTA..=ARITH_MAX_DELTA);
        *byte = (i16::from(*byte) + delta).rem_euclid(256) as u8;
    }
    out
}

/// Overwrites a 1, 2 or 4 byte window with a boundary value, little-endian.
///
/// When the buffer is shorter than the chosen width the width is clamped to the
/// buffer; a clamped width of 3 falls back to the 16-bit table.
pub fn interesting_value_substitute<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let mut out = input.to_vec();
    if out.is_empty() {
        return out;
    }
    let value: Vec<u8> = match pick_width(rng).min(out.len()) {
        1 => vec![INTERESTING_8[rng.random_range(0..INTERESTING_8.len())]],
        2 | 3 => INTERESTING_16[rng.random_range(0..INTERESTING_16.len())]
            .to_le_bytes()
            .to_vec(),
        _ => INTERESTING_32[rng.random_range(0..INTERESTING_32.len())]
            .to_le_bytes()
            .to_vec(),
    };
    let start = rng.random_range(0..=out.len() - value.len());
    out[start..start + value.len()].copy_from_slice(&value);
    out
}

/// Inserts a chunk of up to 8 bytes at a uniformly chosen offset.
///
/// Three times out of four the chunk is copied from the input itself,
/// otherwise it is freshly generated.
pub fn havoc_insert<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let len = input.len();
    let offset = rng.random_range(0..=len);
    let chunk = if len > 0 && rng.random_bool(HAVOC_SPLICE_PROBABILITY) {
        let size = rng.random_range(1..=len.min(HAVOC_MAX_CHUNK));
        let from = rng.random_range(0..=len - size);
        input[from..from + size].to_vec()
    } else {
        let size = rng.random_range(1..=HAVOC_MAX_CHUNK);
        random_bytes(size, rng)
    };

    let mut out = Vec::with_capacity(len + chunk.len());
    out.extend_from_slice(&input[..offset]);
    out.extend_from_slice(&chunk);
    out.extend_from_slice(&input[offset..]);
    out
}

/// Replaces a run of up to 8 bytes with a chunk copied from the input or random bytes.
pub fn havoc_replace<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let len = input.len();
    if len < 2 {
        return input.to_vec();
    }
    let offset = rng.random_range(0..len);
    let size = rng.random_range(1..=(len - offset).min(HAVOC_MAX_CHUNK));
    let chunk = if rng.random_bool(HAVOC_SPLICE_PROBABILITY) && len > size {
        let from = splice_source(len, offset, size, rng);
        input[from..from + size].to_vec()
    } else {
        random_bytes(size, rng)
    };

    let mut out = input.to_vec();
    out.splice(offset..offset + size, chunk);
    out
}

/// Start of a `size`-byte window in a `len`-byte buffer that is not `offset`.
/// Requires `len > size` and `offset <= len - size`.
fn splice_source<R: Rng + ?Sized>(len: usize, offset: usize, size: usize, rng: &mut R) -> usize {
    let from = rng.random_range(0..len - size);
    if from >= offset { from + 1 } else { from }
}

/// Removes a run of up to 8 bytes, always leaving at least one byte behind.
pub fn delete_random_bytes<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let len = input.len();
    if len < 2 {
        return input.to_vec();
    }
    let size = rng.random_range(1..=(len - 1).min(HAVOC_MAX_CHUNK));
    let start = rng.random_range(0..=len - size);
    let mut out = input.to_vec();
    out.drain(start..start + size);
    out
}

/// Picks one enabled [`MutationOperator`] uniformly at random per call.
#[derive(Debug, Clone)]
pub struct HavocMutator {
    operators: Vec<MutationOperator>,
}

impl HavocMutator {
    /// Builds a mutator over `operators`. An empty list enables [`MutationOperator::DEFAULT_SET`].
    pub fn new(operators: Vec<MutationOperator>) -> Self {
        if operators.is_empty() {
            return Self::default();
        }
        Self { operators }
    }

    pub fn operators(&self) -> &[MutationOperator] {
        &self.operators
    }
}

impl Default for HavocMutator {
    fn default() -> Self {
        Self {
            operators: MutationOperator::DEFAULT_SET.to_vec(),
        }
    }
}

impl<R: Rng + ?Sized> Mutator<R> for HavocMutator {
    fn mutate(&mut self, input: &[u8], rng: &mut R) -> Vec<u8> {
        let operator = self.operators[rng.random_range(0..self.operators.len())];
        operator.apply(input, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    const ALL_OPERATORS: [MutationOperator; 7] = [
        MutationOperator::InsertRandomByte,
        MutationOperator::FlipBits,
        MutationOperator::ArithmeticMutate,
        MutationOperator::InterestingValueSubstitute,
        MutationOperator::HavocInsert,
        MutationOperator::HavocReplace,
        MutationOperator::DeleteRandomBytes,
    ];

    fn sample_buffer(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 % 256) as u8).collect()
    }

    #[test]
    fn every_operator_stays_in_bounds_for_small_and_empty_buffers() {
        let mut rng = ChaCha8Rng::from_seed([7u8; 32]);
        for operator in ALL_OPERATORS {
            for len in 0..=64 {
                let input = sample_buffer(len);
                for _ in 0..20 {
                    let out = operator.apply(&input, &mut rng);
                    assert!(
                        out.len() <= len + HAVOC_MAX_CHUNK,
                        "{operator} grew a {len}-byte buffer to {}",
                        out.len()
                    );
                }
            }
        }
    }

    #[test]
    fn empty_input_is_returned_unchanged_where_no_position_exists() {
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        for operator in [
            MutationOperator::FlipBits,
            MutationOperator::ArithmeticMutate,
            MutationOperator::InterestingValueSubstitute,
            MutationOperator::HavocReplace,
            MutationOperator::DeleteRandomBytes,
        ] {
            assert!(operator.apply(&[], &mut rng).is_empty(), "{operator}");
        }
        assert_eq!(insert_random_byte(&[], &mut rng).len(), 1);
    }

    #[test]
    fn insert_random_byte_adds_one_printable_byte() {
        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        let input = b"hello".to_vec();
        for _ in 0..100 {
            let out = insert_random_byte(&input, &mut rng);
            assert_eq!(out.len(), input.len() + 1);
            assert!(out.iter().all(|b| (32..127).contains(b)));
        }
    }

    #[test]
    fn flip_bits_inverts_one_two_or_four_bits() {
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        let input = sample_buffer(6);
        for _ in 0..200 {
            let out = flip_bits(&input, &mut rng);
            assert_eq!(out.len(), input.len());
            let flipped: u32 = input
                .iter()
                .zip(&out)
                .map(|(a, b)| (a ^ b).count_ones())
                .sum();
            assert!([1, 2, 4].contains(&flipped), "flipped {flipped} bits");
        }
    }

    #[test]
    fn flip_bits_carries_across_byte_boundary() {
        let mut rng = ChaCha8Rng::from_seed([4u8; 32]);
        let mut crossed = false;
        for _ in 0..500 {
            let out = flip_bits(&[0u8, 0u8], &mut rng);
            if out[0] != 0 && out[1] != 0 {
                assert_eq!(out[0] & 0x01, 0x01);
                assert_eq!(out[1] & 0x80, 0x80);
                crossed = true;
            }
        }
        assert!(crossed, "a run should eventually straddle the byte boundary");
    }

    #[test]
    fn flip_bits_on_single_byte_never_panics() {
        let mut rng = ChaCha8Rng::from_seed([5u8; 32]);
        for _ in 0..200 {
            assert_eq!(flip_bits(&[0xAA], &mut rng).len(), 1);
        }
    }

    #[test]
    fn arithmetic_mutate_keeps_length_and_bounds_each_delta() {
        let mut rng = ChaCha8Rng::from_seed([6u8; 32]);
        let input: Vec<u8> = vec![0, 1, 128, 254, 255, 17];
        for _ in 0..500 {
            let out = arithmetic_mutate(&input, &mut rng);
            assert_eq!(out.len(), input.len());
            let changed: Vec<usize> = (0..input.len()).filter(|&i| out[i] != input[i]).collect();
            assert!(changed.len() <= 4);
            for i in changed {
                let forward = out[i].wrapping_sub(input[i]);
                let backward = input[i].wrapping_sub(out[i]);
                assert!(i16::from(forward.min(backward)) <= ARITH_MAX_DELTA);
            }
        }
    }

    #[test]
    fn interesting_value_substitute_writes_a_table_value() {
        let mut rng = ChaCha8Rng::from_seed([8u8; 32]);
        let input = vec![0x41u8; 8];
        let mut changed_runs = 0;
        for _ in 0..300 {
            let out = interesting_value_substitute(&input, &mut rng);
            assert_eq!(out.len(), input.len());
            let changed: Vec<u8> = out.iter().copied().filter(|&b| b != 0x41).collect();
            // Every table value is made of 0x00, 0x7F, 0x80 and 0xFF bytes.
            assert!(changed.iter().all(|b| [0x00, 0x7F, 0x80, 0xFF].contains(b)));
            if !changed.is_empty() {
                changed_runs += 1;
            }
        }
        assert_eq!(changed_runs, 300, "0x41 is not an interesting byte, so every call writes");
    }

    #[test]
    fn interesting_value_substitute_clamps_width_to_short_buffers() {
        let mut rng = ChaCha8Rng::from_seed([9u8; 32]);
        for len in 1..=3 {
            for _ in 0..100 {
                assert_eq!(
                    interesting_value_substitute(&sample_buffer(len), &mut rng).len(),
                    len
                );
            }
        }
    }

    #[test]
    fn havoc_insert_grows_by_one_to_eight_bytes() {
        let mut rng = ChaCha8Rng::from_seed([10u8; 32]);
        let input = b"abcdef".to_vec();
        for _ in 0..300 {
            let grown = havoc_insert(&input, &mut rng).len() - input.len();
            assert!((1..=HAVOC_MAX_CHUNK).contains(&grown));
        }
    }

    #[test]
    fn havoc_replace_leaves_tiny_buffers_alone() {
        let mut rng = ChaCha8Rng::from_seed([11u8; 32]);
        assert_eq!(havoc_replace(b"x", &mut rng), b"x".to_vec());
        let input = b"abcdefghij".to_vec();
        for _ in 0..300 {
            assert_eq!(havoc_replace(&input, &mut rng).len(), input.len());
        }
    }

    #[test]
    fn havoc_replace_splices_from_another_offset() {
        let mut rng = ChaCha8Rng::from_seed([14u8; 32]);
        for len in 2..12usize {
            for size in 1..len {
                for offset in 0..=len - size {
                    for _ in 0..8 {
                        let from = splice_source(len, offset, size, &mut rng);
                        assert_ne!(from, offset);
                        assert!(from + size <= len);
                    }
                }
            }
        }
    }

    #[test]
    fn delete_random_bytes_shrinks_but_never_empties() {
        let mut rng = ChaCha8Rng::from_seed([12u8; 32]);
        assert_eq!(delete_random_bytes(b"", &mut rng), Vec::<u8>::new());
        assert_eq!(delete_random_bytes(b"a", &mut rng), b"a".to_vec());
        for _ in 0..200 {
            let out = delete_random_bytes(b"abcdef", &mut rng);
            assert!(!out.is_empty() && out.len() < 6);
        }
    }

    #[test]
    fn havoc_mutator_uses_only_enabled_operators() {
        let mut rng = ChaCha8Rng::from_seed([13u8; 32]);
        let mut mutator = HavocMutator::new(vec![MutationOperator::InsertRandomByte]);
        for _ in 0..50 {
            assert_eq!(mutator.mutate(b"abc", &mut rng).len(), 4);
        }
    }

    #[test]
    fn havoc_mutator_with_no_operators_falls_back_to_defaults() {
        let mutator = HavocMutator::new(Vec::new());
        assert_eq!(mutator.operators(), &MutationOperator::DEFAULT_SET);
    }
}
