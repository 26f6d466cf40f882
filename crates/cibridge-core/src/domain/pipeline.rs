//! CI pipeline state as reported by the CI platform.

use serde::{Deserialize, Serialize};

/// Native pipeline status on the CI platform.
///
/// Unrecognised values are kept verbatim in [`PipelineStatus::Other`] rather
/// than rejected, so a new platform state never breaks decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PipelineStatus {
    Created,
    WaitingForResource,
    Preparing,
    Pending,
    Running,
    Manual,
    Scheduled,
    Canceled,
    Skipped,
    Failed,
    Success,
    Other(String),
}

impl PipelineStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "created" => PipelineStatus::Created,
            "waiting_for_resource" => PipelineStatus::WaitingForResource,
            "preparing" => PipelineStatus::Preparing,
            "pending" => PipelineStatus::Pending,
            "running" => PipelineStatus::Running,
            "manual" => PipelineStatus::Manual,
            "scheduled" => PipelineStatus::Scheduled,
            "canceled" => PipelineStatus::Canceled,
            "skipped" => PipelineStatus::Skipped,
            "failed" => PipelineStatus::Failed,
            "success" => PipelineStatus::Success,
            other => PipelineStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PipelineStatus::Created => "created",
            PipelineStatus::WaitingForResource => "waiting_for_resource",
            PipelineStatus::Preparing => "preparing",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Manual => "manual",
            PipelineStatus::Scheduled => "scheduled",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Skipped => "skipped",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Success => "success",
            PipelineStatus::Other(raw) => raw,
        }
    }

    /// Whether no further transition can happen from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Success
                | PipelineStatus::Failed
                | PipelineStatus::Canceled
                | PipelineStatus::Skipped
        )
    }
}

impl From<String> for PipelineStatus {
    fn from(raw: String) -> Self {
        PipelineStatus::parse(&raw)
    }
}

impl From<PipelineStatus> for String {
    fn from(status: PipelineStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pipeline on the CI platform. Not owned here: always fetched or refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineHandle {
    pub id: u64,
    pub status: PipelineStatus,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

impl PipelineHandle {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
