//! Synthetic similarity estimate.
//!
//! The score is a bounded heuristic derived from the transform parameters,
//! not a measurement of the produced video. It always lands in
//! [`MIN_SCORE`, `MAX_SCORE`].

use vmorph_models::TransformConfig;

pub const MIN_SCORE: u8 = 50;
pub const MAX_SCORE: u8 = 70;

const SPEED_THRESHOLD: f64 = 0.02;
const BRIGHTNESS_THRESHOLD: f64 = 0.02;
const CONTRAST_THRESHOLD: f64 = 0.02;
const SCALE_THRESHOLD: f64 = 0.01;

const SPEED_PENALTY: u8 = 8;
const BRIGHTNESS_PENALTY: u8 = 5;
const CONTRAST_PENALTY: u8 = 5;
const FLIP_PENALTY: u8 = 10;
const SCALE_PENALTY: u8 = 4;

/// Score before clamping: 100 minus the penalty of every noticeable change.
pub fn raw_score(config: &TransformConfig) -> u8 {
    let penalties = [
        ((config.speed - 1.0).abs() > SPEED_THRESHOLD, SPEED_PENALTY),
        (config.brightness.abs() > BRIGHTNESS_THRESHOLD, BRIGHTNESS_PENALTY),
        ((config.contrast - 1.0).abs() > CONTRAST_THRESHOLD, CONTRAST_PENALTY),
        (config.flip, FLIP_PENALTY),
        ((config.scale - 1.0).abs() > SCALE_THRESHOLD, SCALE_PENALTY),
    ];

    penalties
        .iter()
        .filter(|(applies, _)| *applies)
        .fold(100u8, |score, (_, penalty)| score.saturating_sub(*penalty))
}

/// Similarity of a variation to its source, clamped to [50, 70].
pub fn estimate(config: &TransformConfig) -> u8 {
    raw_score(config).clamp(MIN_SCORE, MAX_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParameterRanges;
    use crate::generator::generate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_identity_is_clamped_to_max() {
        assert_eq!(raw_score(&TransformConfig::IDENTITY), 100);
        assert_eq!(estimate(&TransformConfig::IDENTITY), 70);
    }

    #[test]
    fn test_maximal_deviation() {
        let config = TransformConfig {
            speed: 1.05,
            brightness: -0.05,
            contrast: 0.95,
            saturation: 1.1,
            scale: 1.02,
            flip: true,
        };
        assert_eq!(raw_score(&config), 68);
        assert_eq!(estimate(&config), 68);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let config = TransformConfig {
            speed: 1.01,
            brightness: 0.015,
            contrast: 0.99,
            scale: 1.005,
            ..TransformConfig::IDENTITY
        };
        assert_eq!(raw_score(&config), 100);

        let flipped = TransformConfig {
            flip: true,
            ..TransformConfig::IDENTITY
        };
        assert_eq!(raw_score(&flipped), 90);
        assert_eq!(estimate(&flipped), 70);
    }

    #[test]
    fn test_saturation_carries_no_penalty() {
        let config = TransformConfig {
            saturation: 0.9,
            ..TransformConfig::IDENTITY
        };
        assert_eq!(raw_score(&config), 100);
    }

    #[test]
    fn test_generated_configs_stay_in_bounds() {
        let ranges = ParameterRanges::default();
        let mut rng = StdRng::seed_from_u64(2024);

        for index in 1..=500 {
            let score = estimate(&generate(&ranges, &mut rng, index));
            assert!((MIN_SCORE..=MAX_SCORE).contains(&score));
        }
    }

    #[test]
    fn test_wide_ranges_still_clamped() {
        let config = TransformConfig {
            speed: 3.0,
            brightness: 1.0,
            contrast: 5.0,
            saturation: 0.0,
            scale: 0.1,
            flip: true,
        };
        assert_eq!(estimate(&config), 68);
    }
}
