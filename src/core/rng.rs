//! Seeded random streams.
//!
//! Every draw in a run comes from a `Pcg64Mcg` seeded by
//! `(run seed, stream, path index)`. Streams never share state, so turning
//! mortality on or off leaves the return draws of every path unchanged, and
//! the result of a run does not depend on how paths are scheduled.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// Stable stream identifiers. Values must never be reassigned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stream {
    Returns = 1,
    Mortality = 2,
    StressRegime = 3,
}

pub fn path_rng(seed: u64, stream: Stream, index: usize) -> Pcg64Mcg {
    Pcg64Mcg::seed_from_u64(derive_seed(seed, stream as u64, index as u64))
}

pub fn derive_seed(base_seed: u64, stream: u64, index: u64) -> u64 {
    let mixed = splitmix64(base_seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    splitmix64(mixed ^ index)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn streams_and_indices_give_distinct_seeds() {
        let a = derive_seed(42, Stream::Returns as u64, 0);
        let b = derive_seed(42, Stream::Mortality as u64, 0);
        let c = derive_seed(42, Stream::Returns as u64, 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn same_inputs_replay_the_same_draws() {
        let mut first = path_rng(7, Stream::Returns, 3);
        let mut second = path_rng(7, Stream::Returns, 3);
        for _ in 0..16 {
            assert_eq!(first.r#gen::<u64>(), second.r#gen::<u64>());
        }
    }
}
