//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_stderr_line, FfmpegProgress, StderrLine};

/// Number of diagnostic stderr lines kept for error reporting.
const MAX_DIAGNOSTIC_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed after -i
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the video filter chain.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set the audio filter chain.
    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.output_args.len() + 8);

        // Overwrite, and only report errors besides progress
        args.push("-y".to_string());
        args.push("-v".to_string());
        args.push("error".to_string());

        // Progress goes to stderr next to the diagnostics
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress tracking.
///
/// The child process is killed when the returned future is dropped, so
/// callers can abandon a run by racing it against a cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    /// Explicit binary, otherwise `ffmpeg` is looked up on PATH
    binary: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the process if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use `binary` instead of looking `ffmpeg` up on PATH.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let ffmpeg = check_ffmpeg(self.binary.as_deref())?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let mut reader = BufReader::new(stderr);

        // Progress blocks go to the callback, everything else is kept as diagnostics
        let stderr_task = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            let mut diagnostics = VecDeque::with_capacity(MAX_DIAGNOSTIC_LINES);

            let mut buf = Vec::new();

            // Lossy decoding so one bad byte does not end the capture
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Failed to read FFmpeg stderr: {}", e);
                        break;
                    }
                }

                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                match parse_stderr_line(line, &mut current) {
                    StderrLine::Block(progress) => progress_callback(progress),
                    StderrLine::Field => {}
                    StderrLine::Diagnostic(text) if text.is_empty() => {}
                    StderrLine::Diagnostic(text) => {
                        if diagnostics.len() == MAX_DIAGNOSTIC_LINES {
                            diagnostics.pop_front();
                        }
                        diagnostics.push_back(text);
                    }
                }
            }

            Vec::from(diagnostics)
        });

        let status = self.wait_for_completion(&mut child).await;
        let diagnostics = stderr_task.await.unwrap_or_default();

        let status = status?;
        if status.success() {
            Ok(())
        } else {
            Err(failure_from_diagnostics(status, diagnostics))
        }
    }

    /// Wait for the child process, enforcing the timeout if one is set.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait().await?);
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("FFmpeg timed out after {:?}, killing process", timeout);
                let _ = child.kill().await;
                Err(MediaError::Timeout(timeout.as_secs()))
            }
        }
    }
}

/// Build the error for a non-zero exit, preferring FFmpeg's last diagnostic.
fn failure_from_diagnostics(status: ExitStatus, diagnostics: Vec<String>) -> MediaError {
    let message = diagnostics
        .last()
        .cloned()
        .unwrap_or_else(|| match status.code() {
            Some(code) => format!("FFmpeg exited with status {}", code),
            None => "FFmpeg was terminated by a signal".to_string(),
        });
    let stderr = (!diagnostics.is_empty()).then(|| diagnostics.join("\n"));

    MediaError::ffmpeg_failed(message, stderr, status.code())
}

/// Resolve the FFmpeg binary, either `binary` or `ffmpeg` on PATH.
pub fn check_ffmpeg(binary: Option<&Path>) -> MediaResult<PathBuf> {
    let binary = binary.unwrap_or_else(|| Path::new("ffmpeg"));
    which::which(binary).map_err(|_| MediaError::FfmpegNotFound(binary.to_path_buf()))
}
