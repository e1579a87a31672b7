/*++

Licensed under the Apache-2.0 license.

File Name:

    entropy.rs

Abstract:

    File contains the entropy endpoint consumed by devices that need
    fresh random material (OTP key nonces).

--*/

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Provider of 32-bit entropy words.
pub trait EntropySource {
    /// Returns the next entropy word and whether it is FIPS compliant.
    fn get_random(&mut self) -> (u32, bool);

    fn fill_bytes(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(4) {
            let (word, _) = self.get_random();
            chunk.copy_from_slice(&word.to_le_bytes()[..chunk.len()]);
        }
    }
}

/// Entropy backed by a seedable PRNG.
pub struct RandomEntropy {
    rng: StdRng,
    fips: bool,
}

impl RandomEntropy {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            fips: true,
        }
    }

    /// Deterministic source, for reproducible runs.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            fips: true,
        }
    }
}

impl Default for RandomEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for RandomEntropy {
    fn get_random(&mut self) -> (u32, bool) {
        (self.rng.next_u32(), self.fips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_source_is_reproducible() {
        let mut a = RandomEntropy::from_seed(7);
        let mut b = RandomEntropy::from_seed(7);
        let mut buf_a = [0u8; 10];
        let mut buf_b = [0u8; 10];
        a.fill_bytes(&mut buf_a);
        b.fill_bytes(&mut buf_b);
        assert_eq!(buf_a, buf_b);
        assert_eq!(a.get_random(), b.get_random());
        assert!(a.get_random().1);
    }
}
