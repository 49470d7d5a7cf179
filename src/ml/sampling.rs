//! Random draws used to synthesize incidents.
//!
//! Every function takes the generator explicitly so callers decide between
//! an entropy-seeded source in production and a fixed seed in tests.

use crate::error::{AppError, Result};
use crate::ml::models::FrequencyTable;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;

/// Weighted-random draw over the values of a frequency table
#[derive(Debug, Clone)]
pub struct WeightedSampler {
    values: Vec<String>,
    index: WeightedIndex<u64>,
}

impl WeightedSampler {
    /// `None` when the table is empty or every weight is zero
    pub fn from_table(table: &FrequencyTable) -> Option<Self> {
        if table.is_degenerate() {
            return None;
        }
        let index = WeightedIndex::new(table.entries().iter().map(|(_, c)| *c)).ok()?;
        let values = table.values().map(str::to_string).collect();
        Some(Self { values, index })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.values[self.index.sample(rng)]
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Hour-of-day distribution
#[derive(Debug, Clone)]
pub struct HourProfile {
    index: WeightedIndex<u32>,
}

impl HourProfile {
    pub fn new(weights: &[u32]) -> Result<Self> {
        if weights.len() != 24 {
            return Err(AppError::Configuration(format!(
                "Hour profile needs 24 weights, got {}",
                weights.len()
            )));
        }
        let index = WeightedIndex::new(weights)
            .map_err(|e| AppError::Configuration(format!("Invalid hour profile: {}", e)))?;
        Ok(Self { index })
    }

    /// Hour in `0..24`
    pub fn sample_hour<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        self.index.sample(rng) as u32
    }
}

/// Minute in `0..60`
pub fn sample_minute<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.gen_range(0..60)
}

/// Uniform pick from a slice
pub fn uniform_choice<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    items.choose(rng)
}

/// Number of incidents for one day, inclusive on both ends
pub fn draw_count<R: Rng + ?Sized>(range: (u32, u32), rng: &mut R) -> u32 {
    let (min, max) = range;
    if min >= max {
        return min;
    }
    rng.gen_range(min..=max)
}

/// Synthetic identifier: prefix followed by five random digits
pub fn synthetic_id<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    format!("{}{}", prefix, rng.gen_range(10000..=99999))
}
