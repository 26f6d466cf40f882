//! Status relay: project a CI pipeline's status onto the source commit.
//!
//! 1. Resolve the source commit (pull request head, branch tip, or a raw sha
//!    translated back through a synthetic merge commit).
//! 2. Take the pipeline given by the caller, or poll the CI platform until
//!    one shows up on the mirror branch.
//! 3. Report the mapped status, then keep refreshing and reporting until the
//!    pipeline is terminal or the completion bound runs out.
//!
//! Reports are idempotent on the sink side, so the relay over-reports rather
//! than risk leaving a stale status behind.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{
    map_pipeline_status, parse_merge_message, BridgeError, CommitSha, PipelineHandle,
    PipelineStatus, ProjectPath, ReportState, Result, SourceReference, StatusReport,
};
use crate::obs;
use crate::poll::PollPolicy;
use crate::ports::{CiPlatform, SourcePlatform, StatusSink};
use crate::publish::publish_status;

/// Which pipeline to report on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineSelection {
    /// Pipeline id and status already known, e.g. from a pipeline event.
    Explicit { id: u64, status: PipelineStatus },
    /// Poll for the newest pipeline on `ref_name`.
    Discover { ref_name: String },
}

impl PipelineSelection {
    /// Build a selection from raw inputs.
    ///
    /// `id` and `status` must be given together or not at all. Without them,
    /// `discover_ref` is required.
    pub fn from_inputs(
        id: Option<u64>,
        status: Option<String>,
        discover_ref: Option<String>,
    ) -> Result<Self> {
        match (id, status) {
            (Some(id), Some(status)) => Ok(PipelineSelection::Explicit {
                id,
                status: PipelineStatus::parse(&status),
            }),
            (Some(_), None) => Err(BridgeError::Configuration(
                "pipeline id provided without status".to_string(),
            )),
            (None, Some(_)) => Err(BridgeError::Configuration(
                "pipeline status provided without id".to_string(),
            )),
            (None, None) => discover_ref
                .map(|ref_name| PipelineSelection::Discover { ref_name })
                .ok_or_else(|| {
                    BridgeError::Configuration(
                        "no pipeline ref can be derived; pass a pull request, branch or pipeline ref"
                            .to_string(),
                    )
                }),
        }
    }
}

/// Everything one relay run needs to know.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Project on the source platform receiving statuses.
    pub source_project: ProjectPath,
    /// Mirror project on the CI platform.
    pub ci_project: ProjectPath,
    pub reference: SourceReference,
    pub pipeline: PipelineSelection,
    pub discovery: PollPolicy,
    pub completion: PollPolicy,
    /// Keep polling until the pipeline is terminal. When `false` the
    /// discovered status is reported once.
    pub wait: bool,
}

impl RelayRequest {
    pub fn new(
        source_project: ProjectPath,
        ci_project: ProjectPath,
        reference: SourceReference,
        pipeline: PipelineSelection,
    ) -> Self {
        RelayRequest {
            source_project,
            ci_project,
            reference,
            pipeline,
            discovery: PollPolicy::discovery(),
            completion: PollPolicy::completion(),
            wait: true,
        }
    }

    pub fn with_discovery(mut self, discovery: PollPolicy) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_completion(mut self, completion: PollPolicy) -> Self {
        self.completion = completion;
        self
    }

    pub fn without_wait(mut self) -> Self {
        self.wait = false;
        self
    }
}

/// How a relay run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// A single status was reported without waiting for completion.
    Reported,
    /// The pipeline reached a terminal status and it was reported.
    Finished,
    /// No pipeline appeared within the discovery bound.
    PipelineNotFound,
    /// The pipeline did not finish within the completion bound.
    TimedOut,
}

/// Result of a relay run that did not fail.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub commit_sha: CommitSha,
    pub pipeline_id: Option<u64>,
    pub last_status: Option<PipelineStatus>,
    pub final_state: ReportState,
    pub reports_sent: u32,
    pub end: RelayEnd,
}

impl RelayOutcome {
    /// Whether the run ended in a known bad state that was reported.
    pub fn is_reportable_failure(&self) -> bool {
        matches!(self.end, RelayEnd::PipelineNotFound | RelayEnd::TimedOut)
    }
}

/// Drives a relay run against the injected capabilities.
pub struct StatusRelay {
    source: Arc<dyn SourcePlatform>,
    ci: Arc<dyn CiPlatform>,
    sink: Arc<dyn StatusSink>,
}

impl StatusRelay {
    pub fn new(
        source: Arc<dyn SourcePlatform>,
        ci: Arc<dyn CiPlatform>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        StatusRelay { source, ci, sink }
    }

    pub async fn run(&self, request: &RelayRequest) -> Result<RelayOutcome> {
        let sha = self.resolve_commit(request).await?;
        debug!(sha = %sha, reference = %request.reference, "Resolved source commit");

        let handle = match &request.pipeline {
            PipelineSelection::Explicit { id, status } => {
                let url = self.ci.pipeline_url(&request.ci_project, *id);
                let report = StatusReport::for_pipeline(sha.clone(), status, url);
                self.send(request, &report).await?;
                return Ok(RelayOutcome {
                    commit_sha: sha,
                    pipeline_id: Some(*id),
                    last_status: Some(status.clone()),
                    final_state: report.state,
                    reports_sent: 1,
                    end: RelayEnd::Reported,
                });
            }
            PipelineSelection::Discover { ref_name } => {
                match self.discover(request, &sha, ref_name).await? {
                    Some(handle) => handle,
                    None => {
                        warn!(ref_name = %ref_name, "No pipeline found");
                        let report = StatusReport::new(
                            sha.clone(),
                            ReportState::Failure,
                            format!("No pipeline found for {ref_name}"),
                            self.ci.project_url(&request.ci_project),
                        );
                        self.send(request, &report).await?;
                        return Ok(RelayOutcome {
                            commit_sha: sha,
                            pipeline_id: None,
                            last_status: None,
                            final_state: ReportState::Failure,
                            reports_sent: 1,
                            end: RelayEnd::PipelineNotFound,
                        });
                    }
                }
            }
        };

        self.stream(request, sha, handle).await
    }

    async fn resolve_commit(&self, request: &RelayRequest) -> Result<CommitSha> {
        match &request.reference {
            SourceReference::PullRequest { number, .. } => self
                .source
                .get_pull_request(&request.source_project, *number)
                .await
                .map_err(BridgeError::platform("get pull request"))?
                .map(|pr| pr.head_sha)
                .ok_or_else(|| {
                    BridgeError::ReferenceNotFound(format!(
                        "pull request #{number} in {}",
                        request.source_project
                    ))
                }),
            SourceReference::Branch { name } => self
                .source
                .get_branch(&request.source_project, name)
                .await
                .map_err(BridgeError::platform("get branch"))?
                .map(|branch| branch.tip_sha)
                .ok_or_else(|| {
                    BridgeError::ReferenceNotFound(format!(
                        "branch {name} in {}",
                        request.source_project
                    ))
                }),
            SourceReference::Commit { sha } => {
                let message = self
                    .ci
                    .get_commit_message(&request.ci_project, sha)
                    .await
                    .map_err(BridgeError::platform("get commit"))?
                    .ok_or_else(|| {
                        BridgeError::ReferenceNotFound(format!(
                            "commit {sha} in {}",
                            request.ci_project
                        ))
                    })?;
                match parse_merge_message(&message) {
                    Some(head) => {
                        info!(merge = %sha, head = %head, "Use parent SHA of merge reference");
                        Ok(head)
                    }
                    None => Ok(sha.clone()),
                }
            }
        }
    }

    async fn discover(
        &self,
        request: &RelayRequest,
        sha: &CommitSha,
        ref_name: &str,
    ) -> Result<Option<PipelineHandle>> {
        let policy = request.discovery;
        let attempts = policy.max_attempts.max(1);
        debug!(ref_name = %ref_name, attempts = attempts, "Waiting for pipeline to be created");

        for attempt in 1..=attempts {
            let found = match self.ci.get_pipeline(&request.ci_project, ref_name).await {
                Ok(found) => found,
                Err(e) => {
                    let err = BridgeError::platform("get pipeline")(e);
                    self.report_breakdown(request, sha, None, &err).await;
                    return Err(err);
                }
            };
            if let Some(handle) = found {
                obs::emit_pipeline_discovered(ref_name, handle.id, handle.status.as_str(), attempt);
                return Ok(Some(handle));
            }
            if attempt < attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }
        Ok(None)
    }

    async fn stream(
        &self,
        request: &RelayRequest,
        sha: CommitSha,
        mut handle: PipelineHandle,
    ) -> Result<RelayOutcome> {
        let url = self.ci.pipeline_url(&request.ci_project, handle.id);
        let report = StatusReport::for_pipeline(sha.clone(), &handle.status, url.clone());
        self.send(request, &report).await?;
        let mut reports_sent = 1;

        if handle.is_terminal() || !request.wait {
            let end = if handle.is_terminal() {
                obs::emit_pipeline_finished(handle.id, handle.status.as_str(), 0);
                RelayEnd::Finished
            } else {
                RelayEnd::Reported
            };
            return Ok(RelayOutcome {
                commit_sha: sha,
                pipeline_id: Some(handle.id),
                final_state: map_pipeline_status(&handle.status),
                last_status: Some(handle.status),
                reports_sent,
                end,
            });
        }

        let policy = request.completion;
        for poll in 1..=policy.max_attempts {
            handle = match self.ci.refresh_pipeline(&request.ci_project, handle.id).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    let err = BridgeError::platform("refresh pipeline")(e);
                    self.report_breakdown(request, &sha, Some(url.as_str()), &err).await;
                    return Err(err);
                }
            };

            let report = StatusReport::for_pipeline(sha.clone(), &handle.status, url.clone());
            self.send(request, &report).await?;
            reports_sent += 1;

            if handle.is_terminal() {
                obs::emit_pipeline_finished(handle.id, handle.status.as_str(), poll);
                return Ok(RelayOutcome {
                    commit_sha: sha,
                    pipeline_id: Some(handle.id),
                    final_state: report.state,
                    last_status: Some(handle.status),
                    reports_sent,
                    end: RelayEnd::Finished,
                });
            }
            tokio::time::sleep(policy.interval).await;
        }

        obs::emit_relay_timeout(handle.id, policy.max_attempts);
        let report = StatusReport::new(
            sha.clone(),
            ReportState::Failure,
            format!("Pipeline {}: timed out", handle.id),
            url,
        );
        self.send(request, &report).await?;
        reports_sent += 1;

        Ok(RelayOutcome {
            commit_sha: sha,
            pipeline_id: Some(handle.id),
            last_status: Some(handle.status),
            final_state: ReportState::Failure,
            reports_sent,
            end: RelayEnd::TimedOut,
        })
    }

    async fn send(&self, request: &RelayRequest, report: &StatusReport) -> Result<u16> {
        publish_status(self.sink.as_ref(), &request.source_project, report).await
    }

    /// Best-effort `error` status once the commit is known and the CI
    /// platform stops answering. The original error is what the caller sees.
    async fn report_breakdown(
        &self,
        request: &RelayRequest,
        sha: &CommitSha,
        url: Option<&str>,
        err: &BridgeError,
    ) {
        let url = url
            .map(str::to_string)
            .unwrap_or_else(|| self.ci.project_url(&request.ci_project));
        let report = StatusReport::new(
            sha.clone(),
            ReportState::Error,
            "Pipeline status unavailable",
            url,
        );
        if let Err(send_err) = self.send(request, &report).await {
            warn!(error = %err, send_error = %send_err, "Could not report relay failure");
        }
    }
}
