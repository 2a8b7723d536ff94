//! Batch variation worker.
//!
//! This crate provides:
//! - Randomized transform parameter generation
//! - The synthetic similarity estimate
//! - The in-memory job registry and its retention sweeper
//! - The sequential batch orchestrator driving the transcoder

pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod similarity;
pub mod sweeper;

pub use config::{ParameterRanges, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use generator::ParameterGenerator;
pub use logging::JobLogger;
pub use orchestrator::BatchOrchestrator;
pub use registry::{JobHandle, JobRegistry};
pub use sweeper::RetentionSweeper;
