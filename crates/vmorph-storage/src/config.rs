//! Storage configuration.

use std::path::PathBuf;

/// Directory layout for uploaded assets and produced variations.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Where uploaded input videos are written
    pub uploads_dir: PathBuf,
    /// Where produced variations are written and served from
    pub outputs_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            outputs_dir: PathBuf::from("processed"),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            uploads_dir: std::env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            outputs_dir: std::env::var("OUTPUTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.outputs_dir),
        }
    }

    /// Both directories under a common root (used by tests).
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            uploads_dir: root.join("uploads"),
            outputs_dir: root.join("processed"),
        }
    }
}
