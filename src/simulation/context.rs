//! Explicit simulation context: clock and seeded randomness.
//!
//! Every component that needs the current time or random numbers receives a
//! `&mut SimContext`; there is no process-wide clock or RNG.

use rand::SeedableRng;
use rand::distributions::uniform::SampleUniform;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::types::SimTime;

/// Clock and random number generator of one run.
///
/// Two contexts built from the same seed produce the same sequence of samples,
/// which together with the deterministic layout makes a whole run reproducible.
pub struct SimContext {
    now: SimTime,
    rng: ChaCha8Rng,
}

impl SimContext {
    /// Context at time zero with a ChaCha8 generator seeded from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            now: SimTime::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Move the clock forward. The clock never goes backwards.
    pub fn advance_to(&mut self, time: SimTime) {
        debug_assert!(time >= self.now, "clock moved backwards: {:?} -> {:?}", self.now, time);
        if time > self.now {
            self.now = time;
        }
    }

    /// Uniform sample in `[low, high)`; returns `low` for an empty range.
    pub fn random_range<T>(&mut self, low: T, high: T) -> T
    where
        T: SampleUniform + PartialOrd + Copy,
    {
        if low >= high {
            return low;
        }
        self.rng.gen_range(low..high)
    }
}
