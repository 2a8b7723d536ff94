//! Application state.

use std::sync::Arc;

use tracing::warn;

use vmorph_media::{check_ffmpeg, FfmpegTranscoder, Transcoder};
use vmorph_storage::{LocalStorage, StorageConfig};
use vmorph_worker::{BatchOrchestrator, JobRegistry, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub storage: LocalStorage,
    pub registry: Arc<JobRegistry>,
    pub orchestrator: Arc<BatchOrchestrator>,
}

impl AppState {
    /// Create state backed by the `ffmpeg` binary.
    pub async fn new(
        config: ApiConfig,
        storage_config: StorageConfig,
        worker_config: WorkerConfig,
    ) -> anyhow::Result<Self> {
        // Jobs fail individually without ffmpeg; the server still starts
        if let Err(e) = check_ffmpeg(worker_config.ffmpeg_path.as_deref()) {
            warn!("{}; every job will fail until it is installed", e);
        }

        let mut transcoder = FfmpegTranscoder::default();
        if let Some(binary) = &worker_config.ffmpeg_path {
            transcoder = transcoder.with_binary(binary.clone());
        }
        if let Some(timeout) = worker_config.ffmpeg_timeout {
            transcoder = transcoder.with_timeout(timeout);
        }

        let storage = LocalStorage::init(storage_config).await?;
        Self::with_transcoder(config, storage, &worker_config, Arc::new(transcoder))
    }

    /// Create state around an existing storage and transcoder.
    pub fn with_transcoder(
        config: ApiConfig,
        storage: LocalStorage,
        worker_config: &WorkerConfig,
        transcoder: Arc<dyn Transcoder>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(JobRegistry::new(worker_config.job_retention));
        let orchestrator = BatchOrchestrator::new(
            worker_config,
            Arc::clone(&registry),
            storage.clone(),
            transcoder,
        )?;

        Ok(Self {
            config,
            storage,
            registry,
            orchestrator: Arc::new(orchestrator),
        })
    }
}
