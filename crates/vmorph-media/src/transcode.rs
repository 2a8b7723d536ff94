//! Transcoding of a single variation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use tracing::{debug, info, warn};

use vmorph_models::{EncodingConfig, TransformConfig};

use crate::command::FfmpegRunner;
use crate::error::{MediaError, MediaResult};
use crate::filters::TranscodePlan;

/// Histogram of FFmpeg wall time per variation.
pub const FFMPEG_DURATION_SECONDS: &str = "vmorph_ffmpeg_duration_seconds";

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Produces one output file from one input under a transform config.
///
/// Resolves once the output is fully written or the tool has failed.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        config: &TransformConfig,
    ) -> MediaResult<()>;
}

/// [`Transcoder`] backed by the `ffmpeg` binary.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    encoding: EncodingConfig,
    runner: FfmpegRunner,
}

impl FfmpegTranscoder {
    pub fn new(encoding: EncodingConfig) -> Self {
        Self {
            encoding,
            runner: FfmpegRunner::new(),
        }
    }

    /// Run `binary` instead of `ffmpeg` from PATH.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.runner = self.runner.with_binary(binary);
        self
    }

    /// Kill FFmpeg runs that exceed `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.runner = self.runner.with_timeout(timeout);
        self
    }

    pub fn plan(&self, config: &TransformConfig) -> TranscodePlan {
        TranscodePlan::from_config(config, self.encoding.clone())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        config: &TransformConfig,
    ) -> MediaResult<()> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }

        // FFmpeg writes a run-private file that is renamed into place on success
        let mut partial = PartialOutput::for_output(output);
        let cmd = self.plan(config).to_command(input, &partial.path);
        let started = Instant::now();

        let mut result = self
            .runner
            .run_with_progress(&cmd, |progress| {
                debug!(
                    frame = progress.frame,
                    out_time_ms = progress.out_time_ms,
                    speed = progress.speed,
                    "FFmpeg progress"
                );
            })
            .await;
        if result.is_ok() {
            result = partial.publish(output).await;
        }

        let elapsed = started.elapsed();
        let outcome = if result.is_ok() { "success" } else { "failure" };
        histogram!(FFMPEG_DURATION_SECONDS, "result" => outcome).record(elapsed.as_secs_f64());

        match &result {
            Ok(()) => info!(
                "Transcoded {} -> {} in {:.2}s",
                input.display(),
                output.display(),
                elapsed.as_secs_f64()
            ),
            Err(e) => warn!("Transcode of {} failed: {}", input.display(), e),
        }

        result
    }
}

/// Output file owned by one transcode run, removed on drop unless published.
///
/// Dropping covers failures as well as runs abandoned by cancellation.
struct PartialOutput {
    path: PathBuf,
    published: bool,
}

impl PartialOutput {
    /// `out.mp4` becomes `out.<pid>-<seq>.part.mp4`, keeping the container extension.
    fn for_output(output: &Path) -> Self {
        let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
        let stem = output.file_stem().unwrap_or_default().to_string_lossy();
        let tag = format!("{}-{}.part", std::process::id(), seq);

        let name = match output.extension() {
            Some(ext) => format!("{}.{}.{}", stem, tag, ext.to_string_lossy()),
            None => format!("{}.{}", stem, tag),
        };

        Self {
            path: output.with_file_name(name),
            published: false,
        }
    }

    async fn publish(&mut self, output: &Path) -> MediaResult<()> {
        tokio::fs::rename(&self.path, output).await?;
        self.published = true;
        Ok(())
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial output {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.mp4");
        let output = dir.path().join("out.mp4");

        let err = FfmpegTranscoder::default()
            .transcode(&input, &output, &TransformConfig::IDENTITY)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::FileNotFound(p) if p == input));
    }

    #[test]
    fn test_plan_uses_configured_encoding() {
        let transcoder = FfmpegTranscoder::new(EncodingConfig::default().with_crf(28));
        let plan = transcoder.plan(&TransformConfig::IDENTITY);
        assert_eq!(plan.encoding.crf, 28);
    }

    #[test]
    fn test_partial_paths_are_unique_siblings() {
        let output = Path::new("/out/abc_variation_1.mp4");
        let first = PartialOutput::for_output(output).path.clone();
        let second = PartialOutput::for_output(output).path.clone();

        assert_ne!(first, second);
        assert_eq!(first.parent(), output.parent());
        assert_eq!(first.extension().unwrap(), "mp4");
        assert!(first
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("abc_variation_1."));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_publishes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("in_variation_1.mp4");
        std::fs::write(&input, b"source").unwrap();
        // The output path is the last argument
        let ffmpeg = fake_ffmpeg(dir.path(), "for a; do last=$a; done\nprintf done > \"$last\"\n");

        FfmpegTranscoder::default()
            .with_binary(ffmpeg)
            .transcode(&input, &output, &TransformConfig::IDENTITY)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"done");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".part."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_keeps_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("in_variation_1.mp4");
        std::fs::write(&input, b"source").unwrap();
        std::fs::write(&output, b"published by another job").unwrap();
        let ffmpeg = fake_ffmpeg(
            dir.path(),
            "for a; do last=$a; done\nprintf partial > \"$last\"\necho 'encoder error' >&2\nexit 1\n",
        );

        let err = FfmpegTranscoder::default()
            .with_binary(ffmpeg)
            .transcode(&input, &output, &TransformConfig::IDENTITY)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "FFmpeg command failed: encoder error");
        assert_eq!(std::fs::read(&output).unwrap(), b"published by another job");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_run_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("in_variation_1.mp4");
        std::fs::write(&input, b"source").unwrap();
        let ffmpeg = fake_ffmpeg(
            dir.path(),
            "for a; do last=$a; done\nprintf partial > \"$last\"\nexec sleep 30\n",
        );

        let transcoder = FfmpegTranscoder::default().with_binary(ffmpeg);
        let run = transcoder.transcode(&input, &output, &TransformConfig::IDENTITY);
        assert!(tokio::time::timeout(Duration::from_millis(300), run).await.is_err());

        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
