//! Harvest job rows: one execution record per run.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status of a harvest job.
///
/// `Pending -> Running -> {Completed, Partial, Failed}`; the last three
/// are terminal and a job row is never mutated once it reaches one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not yet started.
    Pending,
    /// Currently harvesting.
    Running,
    /// Every processed record succeeded.
    Completed,
    /// Some records failed, some succeeded.
    Partial,
    /// The fetch failed, or every record failed.
    Failed,
}

impl JobStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    /// Returns true if this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid job status: {s}")),
        }
    }
}

/// A bounded diagnostic sample of harvested records kept on the job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SampleRecord {
    /// Record title.
    pub title: String,
    /// Record URL.
    pub url: String,
}

/// One harvest execution record.
///
/// The counter identity `found == created + updated + skipped + failed` is
/// advisory only: adapters drop some records before normalization, so
/// `skipped` may under-report.
#[derive(Debug, Clone, FromRow)]
pub struct HarvestJob {
    /// Unique identifier.
    pub id: i64,
    /// Source this job harvested.
    pub source_id: i64,
    /// Current status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// When the run started.
    pub started_at: Option<String>,
    /// When the run reached a terminal state.
    pub completed_at: Option<String>,
    /// Records seen after the cap was applied.
    pub resources_found: i64,
    /// Resources newly created.
    pub resources_created: i64,
    /// Existing resources updated.
    pub resources_updated: i64,
    /// Records rejected by the adapter (advisory, may under-report).
    pub resources_skipped: i64,
    /// Records whose upsert failed.
    pub resources_failed: i64,
    /// Pages / resumption-token requests processed.
    pub pages_processed: i64,
    /// Error message when the job failed.
    pub error_message: Option<String>,
    /// JSON diagnostic details (status code, content-type, URL).
    pub error_details: Option<String>,
    /// JSON array of sample records (title + URL).
    pub sample_records: Option<String>,
}

impl HarvestJob {
    /// Returns the parsed status enum, falling back to `Pending`.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status_str.parse().unwrap_or(JobStatus::Pending)
    }

    /// Deserializes the sample records, empty on missing/invalid JSON.
    #[must_use]
    pub fn samples(&self) -> Vec<SampleRecord> {
        self.sample_records
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for HarvestJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HarvestJob {{ id: {}, source: {}, status: {}, found: {} }}",
            self.id,
            self.source_id,
            self.status(),
            self.resources_found
        )
    }
}
