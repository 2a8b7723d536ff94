//! Per-variation transform parameters.

use serde::{Deserialize, Serialize};

/// Parameters governing one variation's transformation.
///
/// Generated fresh for every variation and never modified afterwards. The
/// same value drives both the FFmpeg filter graph and the similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfig {
    /// Playback speed multiplier (1.0 = unchanged)
    pub speed: f64,
    /// Additive brightness offset (0.0 = unchanged)
    pub brightness: f64,
    /// Contrast multiplier (1.0 = unchanged)
    pub contrast: f64,
    /// Saturation multiplier (1.0 = unchanged)
    pub saturation: f64,
    /// Uniform resize multiplier (1.0 = unchanged)
    pub scale: f64,
    /// Mirror horizontally
    pub flip: bool,
}

impl TransformConfig {
    /// The config that leaves the input untouched.
    pub const IDENTITY: TransformConfig = TransformConfig {
        speed: 1.0,
        brightness: 0.0,
        contrast: 1.0,
        saturation: 1.0,
        scale: 1.0,
        flip: false,
    };

    pub fn changes_speed(&self) -> bool {
        differs(self.speed, 1.0)
    }

    pub fn changes_brightness(&self) -> bool {
        differs(self.brightness, 0.0)
    }

    pub fn changes_contrast(&self) -> bool {
        differs(self.contrast, 1.0)
    }

    pub fn changes_saturation(&self) -> bool {
        differs(self.saturation, 1.0)
    }

    pub fn changes_scale(&self) -> bool {
        differs(self.scale, 1.0)
    }

    /// Whether any of the color equalization terms is non-default.
    pub fn changes_color(&self) -> bool {
        self.changes_brightness() || self.changes_contrast() || self.changes_saturation()
    }

    /// Whether applying this config would leave the input unchanged.
    pub fn is_identity(&self) -> bool {
        !self.changes_speed() && !self.changes_color() && !self.changes_scale() && !self.flip
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn differs(value: f64, identity: f64) -> bool {
    (value - identity).abs() > f64::EPSILON
}
