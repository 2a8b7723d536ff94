//! FFmpeg CLI wrapper for producing video variations.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Deterministic mapping from a `TransformConfig` to filter stages
//! - The `Transcoder` seam used by the batch orchestrator

pub mod command;
pub mod error;
pub mod filters;
pub mod progress;
pub mod transcode;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use filters::{FilterStage, TranscodePlan};
pub use progress::FfmpegProgress;
pub use transcode::{FfmpegTranscoder, Transcoder};
