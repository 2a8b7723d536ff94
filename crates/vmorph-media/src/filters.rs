//! Mapping from transform parameters to FFmpeg filter stages.
//!
//! The plan is built without touching FFmpeg so it can be asserted on
//! directly. Video stages are applied in a fixed order: speed, color, scale,
//! flip.

use std::fmt;
use std::path::Path;

use vmorph_models::{EncodingConfig, TransformConfig};

use crate::command::FfmpegCommand;

/// One stage of a filter chain.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStage {
    /// Rescale video timestamps by `factor` (`setpts`)
    SetPts { factor: f64 },
    /// Color equalization holding only the non-default terms (`eq`)
    Equalize {
        brightness: Option<f64>,
        contrast: Option<f64>,
        saturation: Option<f64>,
    },
    /// Uniform resize of both dimensions (`scale`)
    Scale { factor: f64 },
    /// Horizontal mirror (`hflip`)
    HFlip,
    /// Audio tempo change without pitch shift (`atempo`)
    ATempo { factor: f64 },
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStage::SetPts { factor } => write!(f, "setpts={:.4}*PTS", factor),
            FilterStage::Equalize {
                brightness,
                contrast,
                saturation,
            } => {
                let terms: Vec<String> = [
                    ("brightness", brightness),
                    ("contrast", contrast),
                    ("saturation", saturation),
                ]
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| format!("{}={:.4}", name, v)))
                .collect();
                write!(f, "eq={}", terms.join(":"))
            }
            // libx264 rejects odd frame dimensions
            FilterStage::Scale { factor } => write!(
                f,
                "scale=trunc(iw*{0:.4}/2)*2:trunc(ih*{0:.4}/2)*2",
                factor
            ),
            FilterStage::HFlip => write!(f, "hflip"),
            FilterStage::ATempo { factor } => write!(f, "atempo={:.4}", factor),
        }
    }
}

/// Everything FFmpeg needs to produce one variation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodePlan {
    pub video_filters: Vec<FilterStage>,
    pub audio_filters: Vec<FilterStage>,
    pub encoding: EncodingConfig,
}

impl TranscodePlan {
    /// Derive the filter stages for `config`.
    pub fn from_config(config: &TransformConfig, encoding: EncodingConfig) -> Self {
        let mut video_filters = Vec::new();
        let mut audio_filters = Vec::new();

        if config.changes_speed() {
            audio_filters.push(FilterStage::ATempo {
                factor: config.speed,
            });
            // Keeps video in sync with the retimed audio
            video_filters.push(FilterStage::SetPts {
                factor: 1.0 / config.speed,
            });
        }

        if config.changes_color() {
            video_filters.push(FilterStage::Equalize {
                brightness: config.changes_brightness().then_some(config.brightness),
                contrast: config.changes_contrast().then_some(config.contrast),
                saturation: config.changes_saturation().then_some(config.saturation),
            });
        }

        if config.changes_scale() {
            video_filters.push(FilterStage::Scale {
                factor: config.scale,
            });
        }

        if config.flip {
            video_filters.push(FilterStage::HFlip);
        }

        Self {
            video_filters,
            audio_filters,
            encoding,
        }
    }

    /// The `-vf` argument, if any video stage is needed.
    pub fn video_filter_chain(&self) -> Option<String> {
        join_stages(&self.video_filters)
    }

    /// The `-af` argument, if any audio stage is needed.
    pub fn audio_filter_chain(&self) -> Option<String> {
        join_stages(&self.audio_filters)
    }

    /// Build the FFmpeg command for `input` → `output`.
    pub fn to_command(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(input, output);

        if let Some(vf) = self.video_filter_chain() {
            cmd = cmd.video_filter(vf);
        }
        if let Some(af) = self.audio_filter_chain() {
            cmd = cmd.audio_filter(af);
        }

        cmd.output_args(self.encoding.to_ffmpeg_args())
    }
}

fn join_stages(stages: &[FilterStage]) -> Option<String> {
    if stages.is_empty() {
        return None;
    }
    Some(
        stages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
    )
}
