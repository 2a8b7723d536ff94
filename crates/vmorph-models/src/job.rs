//! Batch job model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use crate::{AssetId, VariationResult};

/// Numeric job identifier, assigned from a process-wide counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Variations are being produced (or waiting for a worker slot)
    #[default]
    Active,
    /// Every variation was produced
    Completed,
    /// A step failed or the job was cancelled
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A batch of variations produced from one uploaded asset.
///
/// Progress only moves forward and reaches 100 exactly when the job
/// completes. Once terminal, a job ignores further transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub video_id: AssetId,
    pub variation_count: u32,
    pub status: JobStatus,
    /// Percent complete (0-100)
    pub progress: u8,
    /// Present only once the job has completed
    pub results: Option<Vec<VariationResult>>,
    /// Present only once the job has failed
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a fresh active job with no progress.
    pub fn new(id: JobId, video_id: AssetId, variation_count: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            video_id,
            variation_count,
            status: JobStatus::Active,
            progress: 0,
            results: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record progress. Values below the current progress are ignored and an
    /// active job is held at 99 until [`Job::complete`] is called.
    pub fn set_progress(&mut self, progress: u8) {
        if self.is_terminal() {
            return;
        }
        let capped = progress.min(99);
        if capped > self.progress {
            self.progress = capped;
            self.updated_at = Utc::now();
        }
    }

    /// Mark the job as completed with its results.
    pub fn complete(&mut self, results: Vec<VariationResult>) {
        if self.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.results = Some(results);
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    /// Mark the job as failed, freezing progress where it is.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now;
        self.finished_at = Some(now);
    }
}

/// Percent complete after `done` of `total` variations, rounded to nearest.
pub fn progress_percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    ((f64::from(done) / f64::from(total)) * 100.0).round().min(100.0) as u8
}
