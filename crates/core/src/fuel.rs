//! Fuel sources for the injection edge
//!
//! Each step the engine asks its fuel source for one value per simulation row.
//! The default draws uniform integers in `[FUEL_MIN, FUEL_MAX]` from a generator
//! seeded once per engine; the deterministic sources exist for reproducible
//! runs and tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Smallest heat value injected by [`RandomFuel`]
pub const FUEL_MIN: u32 = 64;

/// Largest heat value injected by [`RandomFuel`]
pub const FUEL_MAX: u32 = 128;

/// Supplies the heat injected at column 0 each step
pub trait FuelSource: Send {
    /// Overwrite every entry of `row` with fresh fuel
    fn fill(&mut self, row: &mut [f32]);
}

/// Uniform random integers in `[FUEL_MIN, FUEL_MAX]`
#[derive(Debug, Clone)]
pub struct RandomFuel {
    rng: StdRng,
}

impl RandomFuel {
    /// Seeded from the operating system
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Seeded with a fixed value for reproducible runs
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomFuel {
    fn default() -> Self {
        Self::new()
    }
}

impl FuelSource for RandomFuel {
    fn fill(&mut self, row: &mut [f32]) {
        for value in row {
            *value = self.rng.random_range(FUEL_MIN..=FUEL_MAX) as f32;
        }
    }
}

/// The same value on every row, every step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantFuel(pub f32);

impl FuelSource for ConstantFuel {
    fn fill(&mut self, row: &mut [f32]) {
        row.fill(self.0);
    }
}

/// A fixed sequence of values, cycled across rows and steps
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceFuel {
    values: Vec<f32>,
    cursor: usize,
}

impl SequenceFuel {
    /// Cycle through `values`; an empty sequence injects zeros
    #[must_use]
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, cursor: 0 }
    }
}

impl FuelSource for SequenceFuel {
    fn fill(&mut self, row: &mut [f32]) {
        if self.values.is_empty() {
            row.fill(0.0);
            return;
        }
        for value in row {
            *value = self.values[self.cursor];
            self.cursor = (self.cursor + 1) % self.values.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_fuel_range() {
        let mut fuel = RandomFuel::seeded(7);
        let mut row = vec![0.0; 4096];
        fuel.fill(&mut row);
        assert!(row
            .iter()
            .all(|&v| (FUEL_MIN as f32..=FUEL_MAX as f32).contains(&v)));
        assert!(row.iter().all(|&v| v.fract() == 0.0), "fuel must be integral");
        // Both ends of the closed range are reachable
        assert!(row.contains(&(FUEL_MIN as f32)));
        assert!(row.contains(&(FUEL_MAX as f32)));
    }

    #[test]
    fn test_random_fuel_redraws() {
        let mut fuel = RandomFuel::seeded(1);
        let mut a = vec![0.0; 64];
        let mut b = vec![0.0; 64];
        fuel.fill(&mut a);
        fuel.fill(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_seeded_fuel_is_reproducible() {
        let mut a = vec![0.0; 32];
        let mut b = vec![0.0; 32];
        RandomFuel::seeded(42).fill(&mut a);
        RandomFuel::seeded(42).fill(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_fuel() {
        let mut row = vec![0.0; 4];
        ConstantFuel(100.0).fill(&mut row);
        assert_eq!(row, vec![100.0; 4]);
    }

    #[test]
    fn test_sequence_fuel_cycles() {
        let mut fuel = SequenceFuel::new(vec![1.0, 2.0, 3.0]);
        let mut row = vec![0.0; 4];
        fuel.fill(&mut row);
        assert_eq!(row, vec![1.0, 2.0, 3.0, 1.0]);
        fuel.fill(&mut row);
        assert_eq!(row, vec![2.0, 3.0, 1.0, 2.0]);

        let mut empty = SequenceFuel::new(Vec::new());
        empty.fill(&mut row);
        assert_eq!(row, vec![0.0; 4]);
    }
}
