//! Entropy-pool seed expansion.
//!
//! `SeedSequence` turns a small amount of entropy (for example a single
//! 64-bit seed) into an arbitrary number of well-mixed 32-bit words. Inputs
//! that differ in a single bit yield unrelated outputs, so consecutive seeds
//! such as `base + worker_id` can safely seed independent generators.
//!
//! The mixing follows the hash-mix construction used by NumPy's
//! `SeedSequence` with a 4-word pool, so 128 bits of state feed every
//! generated word.

const POOL_SIZE: usize = 4;
const INIT_A: u32 = 0x43b0_d7e5;
const MULT_A: u32 = 0x931e_8875;
const INIT_B: u32 = 0x8b51_f9dd;
const MULT_B: u32 = 0x58f3_8ded;
const MIX_MULT_L: u32 = 0xca01_f9dd;
const MIX_MULT_R: u32 = 0x4973_f715;
const XSHIFT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSequence {
    pool: [u32; POOL_SIZE],
}

#[inline]
fn hashmix(value: u32, hash_const: &mut u32) -> u32 {
    let mut value = value ^ *hash_const;
    *hash_const = hash_const.wrapping_mul(MULT_A);
    value = value.wrapping_mul(*hash_const);
    value ^ (value >> XSHIFT)
}

#[inline]
fn mix(x: u32, y: u32) -> u32 {
    let result = MIX_MULT_L.wrapping_mul(x).wrapping_sub(MIX_MULT_R.wrapping_mul(y));
    result ^ (result >> XSHIFT)
}

/// Splits integers into little-endian 32-bit words; zero contributes one word.
fn entropy_words(entropy: &[u64]) -> Vec<u32> {
    let mut words = Vec::with_capacity(entropy.len() * 2);
    for &value in entropy {
        if value == 0 {
            words.push(0);
            continue;
        }
        let mut rest = value;
        while rest > 0 {
            words.push(rest as u32);
            rest >>= 32;
        }
    }
    words
}

impl SeedSequence {
    /// Mixes `entropy` into the pool.
    pub fn new(entropy: &[u64]) -> Self {
        let words = entropy_words(entropy);
        let mut pool = [0u32; POOL_SIZE];
        let mut hash_const = INIT_A;

        for (i, slot) in pool.iter_mut().enumerate() {
            let word = words.get(i).copied().unwrap_or(0);
            *slot = hashmix(word, &mut hash_const);
        }
        for i_src in 0..POOL_SIZE {
            for i_dst in 0..POOL_SIZE {
                if i_src != i_dst {
                    let hashed = hashmix(pool[i_src], &mut hash_const);
                    pool[i_dst] = mix(pool[i_dst], hashed);
                }
            }
        }
        for &word in words.iter().skip(POOL_SIZE) {
            for slot in pool.iter_mut() {
                let hashed = hashmix(word, &mut hash_const);
                *slot = mix(*slot, hashed);
            }
        }
        Self { pool }
    }

    /// Generates `n_words` 32-bit words of state.
    pub fn generate_state(&self, n_words: usize) -> Vec<u32> {
        let mut hash_const = INIT_B;
        self.pool
            .iter()
            .cycle()
            .take(n_words)
            .map(|&word| {
                let mut value = word ^ hash_const;
                hash_const = hash_const.wrapping_mul(MULT_B);
                value = value.wrapping_mul(hash_const);
                value ^ (value >> XSHIFT)
            })
            .collect()
    }

    /// Fills a byte seed (e.g. for `SeedableRng::from_seed`) with generated state.
    pub fn fill_bytes(&self, dest: &mut [u8]) {
        let words = self.generate_state(dest.len().div_ceil(4));
        for (chunk, word) in dest.chunks_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes()[..chunk.len()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_same_entropy_same_state() {
        let a = SeedSequence::new(&[42]).generate_state(8);
        let b = SeedSequence::new(&[42]).generate_state(8);
        assert_eq!(a, b);
    }

    #[test]
    fn test_adjacent_seeds_diverge() {
        let states: HashSet<Vec<u32>> = (0..64u64)
            .map(|s| SeedSequence::new(&[s]).generate_state(4))
            .collect();
        assert_eq!(states.len(), 64);

        // Neighbouring seeds should differ in roughly half of the bits.
        let a = SeedSequence::new(&[1000]).generate_state(4);
        let b = SeedSequence::new(&[1001]).generate_state(4);
        let differing: u32 = a.iter().zip(&b).map(|(x, y)| (x ^ y).count_ones()).sum();
        assert!(differing > 32, "only {} of 128 bits differ", differing);
    }

    #[test]
    fn test_high_word_of_u64_seed_matters() {
        let low = SeedSequence::new(&[7]).generate_state(4);
        let high = SeedSequence::new(&[7 | (1 << 40)]).generate_state(4);
        assert_ne!(low, high);
    }

    #[test]
    fn test_longer_state_extends_shorter_prefix() {
        let seq = SeedSequence::new(&[3]);
        let short = seq.generate_state(4);
        let long = seq.generate_state(8);
        assert_eq!(&long[..4], short.as_slice());
    }

    #[test]
    fn test_fill_bytes_matches_state_words() {
        let seq = SeedSequence::new(&[99]);
        let mut bytes = [0u8; 32];
        seq.fill_bytes(&mut bytes);
        let words = seq.generate_state(8);
        assert_eq!(&bytes[..4], &words[0].to_le_bytes());
        assert_eq!(&bytes[28..], &words[7].to_le_bytes());
    }

    #[test]
    fn test_zero_and_empty_entropy_agree() {
        // Zero is encoded as a single zero word, and missing pool words are zero too.
        assert_eq!(SeedSequence::new(&[0]), SeedSequence::new(&[]));
    }
}
