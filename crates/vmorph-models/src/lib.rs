//! Shared data models for the vmorph backend.
//!
//! This crate provides Serde-serializable types for:
//! - Uploaded assets and their identifiers
//! - Batch jobs and their state machine
//! - Per-variation transform parameters and results
//! - Encoding configuration

pub mod asset;
pub mod encoding;
pub mod job;
pub mod transform;
pub mod variation;

// Re-export common types
pub use asset::{is_id_char, AssetId, AssetIdError};
pub use encoding::EncodingConfig;
pub use job::{progress_percent, Job, JobId, JobStatus};
pub use transform::TransformConfig;
pub use variation::{variation_id, VariationResult};
