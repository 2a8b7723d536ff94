//! Randomized transform parameter generation.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vmorph_models::TransformConfig;

use crate::config::ParameterRanges;

/// Draw one config, each field independently and uniformly from its range.
///
/// `index` is the 1-based variation number; it does not influence the draw.
pub fn generate<R: Rng + ?Sized>(
    ranges: &ParameterRanges,
    rng: &mut R,
    _index: u32,
) -> TransformConfig {
    TransformConfig {
        speed: rng.random_range(ranges.speed.clone()),
        brightness: rng.random_range(ranges.brightness.clone()),
        contrast: rng.random_range(ranges.contrast.clone()),
        saturation: rng.random_range(ranges.saturation.clone()),
        scale: rng.random_range(ranges.scale.clone()),
        flip: rng.random_bool(ranges.flip_probability),
    }
}

/// Shared generator owning its randomness source.
///
/// Ranges must have passed [`ParameterRanges::validate`].
#[derive(Debug)]
pub struct ParameterGenerator {
    ranges: ParameterRanges,
    rng: Mutex<StdRng>,
}

impl ParameterGenerator {
    /// Generator seeded from the operating system.
    pub fn new(ranges: ParameterRanges) -> Self {
        Self::with_rng(ranges, StdRng::from_os_rng())
    }

    /// Generator producing a reproducible sequence.
    pub fn seeded(ranges: ParameterRanges, seed: u64) -> Self {
        Self::with_rng(ranges, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(ranges: ParameterRanges, rng: StdRng) -> Self {
        Self {
            ranges,
            rng: Mutex::new(rng),
        }
    }

    pub fn generate(&self, index: u32) -> TransformConfig {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        generate(&self.ranges, &mut *rng, index)
    }
}
