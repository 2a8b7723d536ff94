//! Batch orchestrator.
//!
//! Drives one job's variations strictly in sequence: generate parameters,
//! transcode, score, record progress. The first failure stops the batch and
//! fails the job; the job record is the only channel back to the client.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::Semaphore;
use tracing::Instrument;

use vmorph_media::Transcoder;
use vmorph_models::{progress_percent, variation_id, AssetId, JobId, VariationResult};
use vmorph_storage::LocalStorage;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::generator::ParameterGenerator;
use crate::logging::JobLogger;
use crate::registry::{JobHandle, JobRegistry};
use crate::similarity;

/// Metric names emitted by the orchestrator.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "vmorph_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vmorph_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vmorph_jobs_failed_total";
    pub const VARIATIONS_PRODUCED_TOTAL: &str = "vmorph_variations_produced_total";
}

const OPERATION: &str = "batch_variations";

/// Runs variation batches on background tasks.
pub struct BatchOrchestrator {
    registry: Arc<JobRegistry>,
    storage: LocalStorage,
    transcoder: Arc<dyn Transcoder>,
    generator: ParameterGenerator,
    /// Bounds concurrently running jobs; `None` means unbounded
    permits: Option<Arc<Semaphore>>,
}

impl BatchOrchestrator {
    pub fn new(
        config: &WorkerConfig,
        registry: Arc<JobRegistry>,
        storage: LocalStorage,
        transcoder: Arc<dyn Transcoder>,
    ) -> WorkerResult<Self> {
        config.ranges.validate()?;

        let generator = match config.rng_seed {
            Some(seed) => ParameterGenerator::seeded(config.ranges.clone(), seed),
            None => ParameterGenerator::new(config.ranges.clone()),
        };
        let permits = (config.max_concurrent_jobs > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_jobs)));

        Ok(Self {
            registry,
            storage,
            transcoder,
            generator,
            permits,
        })
    }

    /// Replace the parameter generator.
    pub fn with_generator(mut self, generator: ParameterGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Register a job and run it in the background, returning its id
    /// before any variation has been produced.
    pub async fn start(self: &Arc<Self>, video_id: AssetId, count: u32) -> JobId {
        let handle = self.registry.create(video_id.clone(), count).await;
        let job_id = handle.id();
        counter!(names::JOBS_STARTED_TOTAL).increment(1);

        let span = JobLogger::new(job_id, OPERATION).span();
        let this = Arc::clone(self);
        let task_handle = handle.clone();
        let task = tokio::spawn(
            async move { this.run(task_handle, video_id, count).await }.instrument(span),
        );
        handle.attach_task(task);

        job_id
    }

    /// Produce `count` variations of `asset_id`, recording the outcome on `job`.
    pub async fn run(&self, job: JobHandle, asset_id: AssetId, count: u32) {
        let logger = JobLogger::new(job.id(), OPERATION);
        logger.log_start(&format!("{} variations of {}", count, asset_id));

        let cancel = job.cancel_token();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            result = self.produce_variations(&job, &asset_id, count, &logger) => result,
        };

        match result {
            Ok(results) => {
                let produced = results.len();
                job.complete(results).await;
                counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
                logger.log_completion(&format!("{} variations produced", produced));
            }
            Err(e) => {
                let message = e.to_string();
                job.fail(message.clone()).await;
                counter!(names::JOBS_FAILED_TOTAL).increment(1);
                logger.log_error(&message);
            }
        }
    }

    async fn produce_variations(
        &self,
        job: &JobHandle,
        asset_id: &AssetId,
        count: u32,
        logger: &JobLogger,
    ) -> WorkerResult<Vec<VariationResult>> {
        let _permit = match &self.permits {
            Some(permits) => Some(
                Arc::clone(permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| WorkerError::Cancelled)?,
            ),
            None => None,
        };

        let input = self.storage.resolve_asset(asset_id).await?;
        let mut results = Vec::with_capacity(count as usize);

        for index in 1..=count {
            let config = self.generator.generate(index);
            let output = self.storage.output_path(&variation_id(asset_id, index));

            logger.log_progress(&format!("transcoding variation {}/{}", index, count));
            self.transcoder.transcode(&input, &output, &config).await?;

            let score = similarity::estimate(&config);
            results.push(VariationResult::new(asset_id, index, score, config));
            counter!(names::VARIATIONS_PRODUCED_TOTAL).increment(1);

            job.set_progress(progress_percent(index, count)).await;
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use vmorph_media::{MediaError, MediaResult};
    use vmorph_models::{JobStatus, TransformConfig};
    use vmorph_storage::StorageConfig;

    use crate::registry::CANCELLED_MESSAGE;

    /// Writes a placeholder output per call and fails on one chosen call.
    #[derive(Default)]
    struct MockTranscoder {
        fail_on: Option<usize>,
        calls: Mutex<Vec<(PathBuf, PathBuf, TransformConfig)>>,
        progress_seen: Mutex<Vec<u8>>,
        registry: Option<(Arc<JobRegistry>, JobId)>,
    }

    impl MockTranscoder {
        fn failing_on(call: usize) -> Self {
            Self {
                fail_on: Some(call),
                ..Default::default()
            }
        }

        fn outputs(&self) -> Vec<PathBuf> {
            self.calls.lock().unwrap().iter().map(|(_, o, _)| o.clone()).collect()
        }
    }

    #[async_trait]
    impl Transcoder for MockTranscoder {
        async fn transcode(
            &self,
            input: &Path,
            output: &Path,
            config: &TransformConfig,
        ) -> MediaResult<()> {
            if let Some((registry, id)) = &self.registry {
                let job = registry.get(*id).await.unwrap();
                self.progress_seen.lock().unwrap().push(job.progress);
            }

            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((input.to_path_buf(), output.to_path_buf(), *config));
                calls.len()
            };

            if self.fail_on == Some(call) {
                return Err(MediaError::ffmpeg_failed("Invalid data found", None, Some(1)));
            }

            tokio::fs::write(output, b"variation").await?;
            Ok(())
        }
    }

    /// Blocks until released, to hold a job mid-batch.
    struct BlockingTranscoder {
        started: Notify,
    }

    #[async_trait]
    impl Transcoder for BlockingTranscoder {
        async fn transcode(&self, _: &Path, _: &Path, _: &TransformConfig) -> MediaResult<()> {
            self.started.notify_one();
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: LocalStorage,
        registry: Arc<JobRegistry>,
        asset: AssetId,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::init(StorageConfig::under(dir.path())).await.unwrap();
        let asset = AssetId::parse("1700000000000-123456789").unwrap();
        std::fs::write(storage.uploads_dir().join(format!("{}.mp4", asset)), b"input").unwrap();

        Fixture {
            _dir: dir,
            storage,
            registry: Arc::new(JobRegistry::new(Duration::from_secs(60))),
            asset,
        }
    }

    fn orchestrator(fx: &Fixture, transcoder: Arc<dyn Transcoder>) -> BatchOrchestrator {
        let config = WorkerConfig {
            rng_seed: Some(11),
            ..Default::default()
        };
        BatchOrchestrator::new(&config, Arc::clone(&fx.registry), fx.storage.clone(), transcoder)
            .unwrap()
    }

    #[tokio::test]
    async fn test_all_variations_succeed() {
        let fx = fixture().await;
        let handle = fx.registry.create(fx.asset.clone(), 5).await;
        let transcoder = Arc::new(MockTranscoder {
            registry: Some((Arc::clone(&fx.registry), handle.id())),
            ..Default::default()
        });
        let orchestrator = orchestrator(&fx, transcoder.clone());

        orchestrator.run(handle.clone(), fx.asset.clone(), 5).await;

        let job = fx.registry.get(handle.id()).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());

        let results = job.results.unwrap();
        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            let expected = format!("{}_variation_{}", fx.asset, i + 1);
            assert_eq!(result.id, expected);
            assert_eq!(result.download_url, format!("/api/video/download/{}", expected));
            assert!((50..=70).contains(&result.similarity));
            assert_eq!(result.similarity, similarity::estimate(&result.transform));
        }

        // Progress observed before each transcode
        assert_eq!(*transcoder.progress_seen.lock().unwrap(), vec![0, 20, 40, 60, 80]);

        let outputs = transcoder.outputs();
        assert_eq!(outputs[2], fx.storage.output_path(&format!("{}_variation_3", fx.asset)));
        assert!(outputs.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn test_third_transcode_fails() {
        let fx = fixture().await;
        let transcoder = Arc::new(MockTranscoder::failing_on(3));
        let orchestrator = orchestrator(&fx, transcoder.clone());
        let handle = fx.registry.create(fx.asset.clone(), 5).await;

        orchestrator.run(handle.clone(), fx.asset.clone(), 5).await;

        let job = fx.registry.get(handle.id()).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 40);
        assert!(job.results.is_none());
        assert_eq!(
            job.error.as_deref(),
            Some("FFmpeg command failed: Invalid data found")
        );

        // Variations 4 and 5 were never attempted
        assert_eq!(transcoder.outputs().len(), 3);
        for index in 3..=5 {
            let path = fx.storage.output_path(&format!("{}_variation_{}", fx.asset, index));
            assert!(!path.exists());
        }
    }

    #[tokio::test]
    async fn test_missing_asset_fails_job() {
        let fx = fixture().await;
        let transcoder = Arc::new(MockTranscoder::default());
        let orchestrator = orchestrator(&fx, transcoder.clone());
        let missing = AssetId::parse("404-000000000").unwrap();
        let handle = fx.registry.create(missing.clone(), 5).await;

        orchestrator.run(handle.clone(), missing, 5).await;

        let job = fx.registry.get(handle.id()).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 0);
        assert_eq!(job.error.as_deref(), Some("Video not found: 404-000000000"));
        assert!(transcoder.outputs().is_empty());
    }

    #[tokio::test]
    async fn test_start_returns_before_processing() {
        let fx = fixture().await;
        let transcoder = Arc::new(BlockingTranscoder {
            started: Notify::new(),
        });
        let orchestrator = Arc::new(orchestrator(&fx, transcoder.clone()));

        let job_id = orchestrator.start(fx.asset.clone(), 5).await;

        let job = fx.registry.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.progress, 0);

        transcoder.started.notified().await;
        fx.registry.cancel(job_id).await.unwrap();
        assert!(fx.registry.join(job_id).await);

        let job = fx.registry.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(CANCELLED_MESSAGE));
    }

    #[tokio::test]
    async fn test_start_runs_to_completion() {
        let fx = fixture().await;
        let orchestrator = Arc::new(orchestrator(&fx, Arc::new(MockTranscoder::default())));

        let job_id = orchestrator.start(fx.asset.clone(), 2).await;
        assert!(fx.registry.join(job_id).await);

        let job = fx.registry.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.results.map(|r| r.len()), Some(2));
    }

    #[tokio::test]
    async fn test_seeded_runs_are_reproducible() {
        let fx = fixture().await;
        let first = Arc::new(MockTranscoder::default());
        let second = Arc::new(MockTranscoder::default());

        for transcoder in [&first, &second] {
            let orchestrator = orchestrator(&fx, transcoder.clone())
                .with_generator(ParameterGenerator::seeded(Default::default(), 5));
            let handle = fx.registry.create(fx.asset.clone(), 3).await;
            orchestrator.run(handle, fx.asset.clone(), 3).await;
        }

        let configs = |t: &MockTranscoder| -> Vec<TransformConfig> {
            t.calls.lock().unwrap().iter().map(|(_, _, c)| *c).collect()
        };
        assert_eq!(configs(&*first), configs(&*second));
    }

    #[tokio::test]
    async fn test_concurrency_limit_queues_jobs() {
        let fx = fixture().await;
        let transcoder = Arc::new(BlockingTranscoder {
            started: Notify::new(),
        });
        let config = WorkerConfig {
            max_concurrent_jobs: 1,
            ..Default::default()
        };
        let orchestrator = Arc::new(
            BatchOrchestrator::new(
                &config,
                Arc::clone(&fx.registry),
                fx.storage.clone(),
                transcoder.clone(),
            )
            .unwrap(),
        );

        let first = orchestrator.start(fx.asset.clone(), 1).await;
        transcoder.started.notified().await;
        let second = orchestrator.start(fx.asset.clone(), 1).await;

        // The second job waits for a permit while staying pollable
        tokio::task::yield_now().await;
        let job = fx.registry.get(second).await.unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.progress, 0);

        fx.registry.shutdown().await;
        for id in [first, second] {
            let job = fx.registry.get(id).await.unwrap();
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.error.as_deref(), Some("Job cancelled"));
        }
    }

    #[tokio::test]
    async fn test_invalid_ranges_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            ranges: crate::config::ParameterRanges {
                scale: 1.1..=0.9,
                ..Default::default()
            },
            ..Default::default()
        };
        let storage = LocalStorage::init(StorageConfig::under(dir.path())).await.unwrap();

        let result = BatchOrchestrator::new(
            &config,
            Arc::new(JobRegistry::new(Duration::from_secs(1))),
            storage,
            Arc::new(MockTranscoder::default()),
        );
        assert!(matches!(result, Err(WorkerError::ConfigError(_))));
    }
}
