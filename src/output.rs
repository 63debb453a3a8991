//! Output types: the merged artifact, job statistics and job states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The merged artifact produced by a successful job.
///
/// The document itself lives in the output store under `name`; this struct
/// only describes it. Retrieve the bytes with
/// [`crate::ConversionPipeline::fetch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDocument {
    /// Generated name under which the output is addressable.
    pub name: String,
    /// Location of the artifact inside the output store.
    pub path: PathBuf,
    /// Identifier of the job that produced it.
    pub job_id: String,
    /// Total pages. `None` when a single document was copied through and
    /// could not be parsed to count them.
    pub page_count: Option<usize>,
    pub size_bytes: u64,
    pub stats: JobStats,
}

/// Timing and per-kind counts for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub total_files: usize,
    /// Raster images converted to single-page documents.
    pub images_converted: usize,
    /// Documents passed through unchanged.
    pub documents_passed: usize,
    /// `true` when one document was copied without invoking the merge.
    pub copied_through: bool,
    pub total_duration_ms: u64,
    pub convert_duration_ms: u64,
    pub assemble_duration_ms: u64,
}

/// Lifecycle of a job.
///
/// `Received → Converting(i) → Assembling → Done`, or `Failed` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Received,
    /// `i` files have been turned into documents so far.
    Converting(usize),
    Assembling,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Received, Converting(0)) => true,
            (Converting(i), Converting(j)) => j == i + 1,
            (Converting(_), Assembling) => true,
            (Assembling, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Received => write!(f, "received"),
            JobState::Converting(i) => write!(f, "converting({i})"),
            JobState::Assembling => write!(f, "assembling"),
            JobState::Done => write!(f, "done"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}
