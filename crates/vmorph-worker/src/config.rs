//! Worker configuration.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Bounds the transform parameters are drawn from.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRanges {
    pub speed: RangeInclusive<f64>,
    pub brightness: RangeInclusive<f64>,
    pub contrast: RangeInclusive<f64>,
    pub saturation: RangeInclusive<f64>,
    pub scale: RangeInclusive<f64>,
    /// Probability that a variation is mirrored
    pub flip_probability: f64,
}

impl Default for ParameterRanges {
    fn default() -> Self {
        Self {
            speed: 0.95..=1.05,
            brightness: -0.05..=0.05,
            contrast: 0.95..=1.05,
            saturation: 0.9..=1.1,
            scale: 0.98..=1.02,
            flip_probability: 0.3,
        }
    }
}

impl ParameterRanges {
    /// Read overrides from `VARIATION_{FIELD}_MIN` / `VARIATION_{FIELD}_MAX`
    /// and `VARIATION_FLIP_PROBABILITY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            speed: env_range("SPEED", defaults.speed),
            brightness: env_range("BRIGHTNESS", defaults.brightness),
            contrast: env_range("CONTRAST", defaults.contrast),
            saturation: env_range("SATURATION", defaults.saturation),
            scale: env_range("SCALE", defaults.scale),
            flip_probability: env_parse("VARIATION_FLIP_PROBABILITY")
                .unwrap_or(defaults.flip_probability),
        }
    }

    /// Reject ranges that cannot be sampled.
    pub fn validate(&self) -> WorkerResult<()> {
        let ranges = [
            ("speed", &self.speed),
            ("brightness", &self.brightness),
            ("contrast", &self.contrast),
            ("saturation", &self.saturation),
            ("scale", &self.scale),
        ];

        for (name, range) in ranges {
            if !range.start().is_finite() || !range.end().is_finite() {
                return Err(WorkerError::config_error(format!("{} range must be finite", name)));
            }
            if range.start() > range.end() {
                return Err(WorkerError::config_error(format!(
                    "{} range is inverted: {} > {}",
                    name,
                    range.start(),
                    range.end()
                )));
            }
        }

        // atempo and setpts need a positive speed
        if *self.speed.start() <= 0.0 {
            return Err(WorkerError::config_error("speed must be positive"));
        }
        if *self.scale.start() <= 0.0 {
            return Err(WorkerError::config_error("scale must be positive"));
        }
        if !(0.0..=1.0).contains(&self.flip_probability) {
            return Err(WorkerError::config_error(format!(
                "flip probability {} is outside [0, 1]",
                self.flip_probability
            )));
        }

        Ok(())
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum jobs producing variations at once (0 = unbounded)
    pub max_concurrent_jobs: usize,
    /// How long finished jobs stay pollable
    pub job_retention: Duration,
    /// How often finished jobs are swept
    pub sweep_interval: Duration,
    /// FFmpeg binary, looked up on PATH when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Per-variation FFmpeg timeout (none by default)
    pub ffmpeg_timeout: Option<Duration>,
    /// Fixed seed for parameter generation (random by default)
    pub rng_seed: Option<u64>,
    /// Parameter bounds
    pub ranges: ParameterRanges,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 0,
            job_retention: Duration::from_secs(3600), // 1 hour
            sweep_interval: Duration::from_secs(60),
            ffmpeg_path: None,
            ffmpeg_timeout: None,
            rng_seed: None,
            ranges: ParameterRanges::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS").unwrap_or(0),
            job_retention: Duration::from_secs(env_parse("JOB_RETENTION_SECS").unwrap_or(3600)),
            sweep_interval: Duration::from_secs(env_parse("JOB_SWEEP_INTERVAL_SECS").unwrap_or(60)),
            ffmpeg_path: std::env::var_os("FFMPEG_PATH").map(PathBuf::from),
            ffmpeg_timeout: env_parse("FFMPEG_TIMEOUT_SECS").map(Duration::from_secs),
            rng_seed: env_parse("WORKER_RNG_SEED"),
            ranges: ParameterRanges::from_env(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_range(field: &str, default: RangeInclusive<f64>) -> RangeInclusive<f64> {
    let min = env_parse(&format!("VARIATION_{}_MIN", field)).unwrap_or(*default.start());
    let max = env_parse(&format!("VARIATION_{}_MAX", field)).unwrap_or(*default.end());
    min..=max
}
