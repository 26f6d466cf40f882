//! Commit status vocabulary and the pipeline-to-status mapping.

use serde::{Deserialize, Serialize};

use super::pipeline::PipelineStatus;
use super::reference::CommitSha;

/// Status context the sink deduplicates on, together with the commit sha.
pub const DEFAULT_STATUS_CONTEXT: &str = "continuous-integration/pullrequest";

/// State of a commit status on the source platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportState {
    Pending,
    Success,
    Failure,
    Error,
}

impl ReportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportState::Pending => "pending",
            ReportState::Success => "success",
            ReportState::Failure => "failure",
            ReportState::Error => "error",
        }
    }
}

impl std::fmt::Display for ReportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a CI pipeline status onto the commit status vocabulary.
///
/// Statuses outside the known set map to `pending`: the relay keeps polling
/// and the completion timeout bounds how long that can last.
pub fn map_pipeline_status(status: &PipelineStatus) -> ReportState {
    match status {
        PipelineStatus::Created
        | PipelineStatus::WaitingForResource
        | PipelineStatus::Preparing
        | PipelineStatus::Pending
        | PipelineStatus::Running
        | PipelineStatus::Manual
        | PipelineStatus::Scheduled => ReportState::Pending,
        PipelineStatus::Canceled | PipelineStatus::Skipped => ReportState::Error,
        PipelineStatus::Failed => ReportState::Failure,
        PipelineStatus::Success => ReportState::Success,
        PipelineStatus::Other(_) => ReportState::Pending,
    }
}

/// A commit status to publish. Safe to send repeatedly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub commit_sha: CommitSha,
    pub state: ReportState,
    pub description: String,
    pub target_url: String,
    pub context: String,
}

impl StatusReport {
    pub fn new(
        commit_sha: CommitSha,
        state: ReportState,
        description: impl Into<String>,
        target_url: impl Into<String>,
    ) -> Self {
        StatusReport {
            commit_sha,
            state,
            description: description.into(),
            target_url: target_url.into(),
            context: DEFAULT_STATUS_CONTEXT.to_string(),
        }
    }

    /// Report for a pipeline in `status`, described as `Pipeline: <status>`.
    pub fn for_pipeline(
        commit_sha: CommitSha,
        status: &PipelineStatus,
        target_url: impl Into<String>,
    ) -> Self {
        StatusReport::new(
            commit_sha,
            map_pipeline_status(status),
            format!("Pipeline: {status}"),
            target_url,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(raw: &str) -> ReportState {
        map_pipeline_status(&PipelineStatus::parse(raw))
    }

    #[test]
    fn test_mapping_table() {
        for raw in [
            "created",
            "waiting_for_resource",
            "preparing",
            "pending",
            "running",
            "manual",
            "scheduled",
        ] {
            assert_eq!(map(raw), ReportState::Pending, "{raw}");
        }
        assert_eq!(map("canceled"), ReportState::Error);
        assert_eq!(map("skipped"), ReportState::Error);
        assert_eq!(map("failed"), ReportState::Failure);
        assert_eq!(map("success"), ReportState::Success);
    }

    #[test]
    fn test_unknown_status_falls_back_to_pending() {
        assert_eq!(map(""), ReportState::Pending);
        assert_eq!(map("blocked"), ReportState::Pending);
    }

    #[test]
    fn test_pipeline_report_description() {
        let report = StatusReport::for_pipeline(
            CommitSha::new("def456"),
            &PipelineStatus::Running,
            "https://gitlab.com/QubesOS/qubes-core-admin/-/pipelines/9",
        );
        assert_eq!(report.state, ReportState::Pending);
        assert_eq!(report.description, "Pipeline: running");
        assert_eq!(report.context, DEFAULT_STATUS_CONTEXT);
    }

    #[test]
    fn test_report_state_serializes_lowercase() {
        let json = serde_json::to_string(&ReportState::Failure).unwrap();
        assert_eq!(json, "\"failure\"");
    }
}
