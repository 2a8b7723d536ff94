//! Local filesystem storage.
//!
//! This crate provides:
//! - Streaming upload of input videos under generated asset ids
//! - Exact asset id → file resolution
//! - Output paths and readers for produced variations

pub mod client;
pub mod config;
pub mod error;

pub use client::{LocalStorage, StoredAsset, UploadWriter};
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
