//! Branch mirror: reproduce a branch or pull request on the CI mirror.
//!
//! The run walks a fixed sequence of states:
//!
//! ```text
//! Init -> Cloned -> RemoteConfigured -> StaleBranchPurged -> Fetched
//!      -> CheckedOut | Merged | MergeFailed -> Pushed -> Done
//! ```
//!
//! with `Failed` reachable from anywhere. Everything up to `Fetched` is fatal
//! on error. A merge conflict ends the run in `MergeFailed` after a `failure`
//! status for the head commit; it is an outcome, not an error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{
    merge_message, BranchNaming, BridgeError, CommitSha, MergeOutcome, MergePolicy, MirrorTarget,
    ProjectPath, ReportState, Result, SourceReference, StatusReport,
};
use crate::obs;
use crate::ports::{CiPlatform, StatusSink, VcsError, VersionControl};
use crate::publish::publish_status;

/// Name of the remote the source repository is cloned from.
pub const ORIGIN: &str = "origin";

/// States of the mirror state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorState {
    Init,
    Cloned,
    RemoteConfigured,
    StaleBranchPurged,
    Fetched,
    CheckedOut,
    Merged,
    MergeFailed,
    Pushed,
    Done,
    Failed(String),
}

impl MirrorState {
    pub fn name(&self) -> &str {
        match self {
            MirrorState::Init => "init",
            MirrorState::Cloned => "cloned",
            MirrorState::RemoteConfigured => "remote_configured",
            MirrorState::StaleBranchPurged => "stale_branch_purged",
            MirrorState::Fetched => "fetched",
            MirrorState::CheckedOut => "checked_out",
            MirrorState::Merged => "merged",
            MirrorState::MergeFailed => "merge_failed",
            MirrorState::Pushed => "pushed",
            MirrorState::Done => "done",
            MirrorState::Failed(_) => "failed",
        }
    }
}

/// Everything one mirror run needs to know.
#[derive(Debug, Clone)]
pub struct MirrorRequest {
    /// URL the source repository is cloned from.
    pub source_url: String,
    pub reference: SourceReference,
    pub target: MirrorTarget,
    /// Name under which the CI mirror is added as a remote.
    pub remote_name: String,
    /// Push URL of the CI mirror, credentials already embedded.
    pub remote_url: String,
    /// Project on the source platform that receives commit statuses.
    pub status_project: ProjectPath,
}

impl MirrorRequest {
    /// Build a request, deriving the mirror branch from `reference`.
    ///
    /// Commit references cannot be mirrored and are rejected here, before any
    /// I/O. The mirror remote is named after the CI project owner.
    pub fn new(
        source_url: impl Into<String>,
        reference: SourceReference,
        ci_project: ProjectPath,
        naming: BranchNaming,
        remote_url: impl Into<String>,
        status_project: ProjectPath,
    ) -> Result<Self> {
        let target = MirrorTarget::for_reference(ci_project, &reference, naming)?;
        Ok(MirrorRequest {
            source_url: source_url.into(),
            remote_name: target.project.owner.clone(),
            reference,
            target,
            remote_url: remote_url.into(),
            status_project,
        })
    }

    pub fn with_remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = name.into();
        self
    }
}

/// Result of a mirror run that did not fail.
#[derive(Debug, Clone)]
pub struct MirrorRun {
    pub target: MirrorTarget,
    pub outcome: MergeOutcome,
    /// States visited, in order.
    pub states: Vec<MirrorState>,
    pub canceled_pipelines: usize,
    pub pushed: bool,
}

impl MirrorRun {
    /// Whether the run ended in a known bad state that was reported.
    pub fn is_reportable_failure(&self) -> bool {
        self.outcome.is_conflict()
    }
}

struct Transitions {
    branch: String,
    states: Vec<MirrorState>,
}

impl Transitions {
    fn new(branch: &str) -> Self {
        let mut transitions = Transitions {
            branch: branch.to_string(),
            states: Vec::new(),
        };
        transitions.enter(MirrorState::Init);
        transitions
    }

    fn enter(&mut self, state: MirrorState) {
        obs::emit_mirror_state(&self.branch, state.name());
        self.states.push(state);
    }
}

/// Drives a mirror run against the injected capabilities.
pub struct BranchMirror {
    vcs: Arc<dyn VersionControl>,
    ci: Arc<dyn CiPlatform>,
    sink: Arc<dyn StatusSink>,
}

impl BranchMirror {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        ci: Arc<dyn CiPlatform>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        BranchMirror { vcs, ci, sink }
    }

    /// Run the mirror for `request`.
    ///
    /// Returns `Ok` both when the branch was pushed and when a merge conflict
    /// was reported; check [`MirrorRun::is_reportable_failure`]. Any other
    /// failure is an `Err` and leaves the mirror branch untouched or stale.
    pub async fn run(&self, request: &MirrorRequest) -> Result<MirrorRun> {
        let mut transitions = Transitions::new(&request.target.branch);
        match self.drive(request, &mut transitions).await {
            Ok((outcome, canceled_pipelines, pushed)) => Ok(MirrorRun {
                target: request.target.clone(),
                outcome,
                states: transitions.states,
                canceled_pipelines,
                pushed,
            }),
            Err(e) => {
                transitions.enter(MirrorState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &MirrorRequest,
        transitions: &mut Transitions,
    ) -> Result<(MergeOutcome, usize, bool)> {
        let branch = request.target.branch.as_str();
        let remote = request.remote_name.as_str();

        let fetch_refspec = match &request.reference {
            SourceReference::Branch { name } => name.clone(),
            SourceReference::PullRequest { number, .. } => format!("+refs/pull/{number}/head"),
            SourceReference::Commit { sha } => {
                return Err(BridgeError::Configuration(format!(
                    "commit {} cannot be mirrored",
                    sha.short()
                )))
            }
        };
        let clone_branch = match &request.reference {
            SourceReference::PullRequest { base_ref, .. } => base_ref.as_deref(),
            _ => None,
        };

        debug!(url = %request.source_url, "Clone source repository");
        self.vcs
            .clone_repo(&request.source_url, clone_branch)
            .await
            .map_err(BridgeError::vcs("clone"))?;
        transitions.enter(MirrorState::Cloned);

        match self.vcs.remote_add(remote, &request.remote_url).await {
            Ok(()) => {}
            Err(VcsError::RemoteExists { name }) => {
                warn!(remote = %name, "Remote already configured, reusing it");
            }
            Err(e) => return Err(BridgeError::vcs("remote add")(e)),
        }
        transitions.enter(MirrorState::RemoteConfigured);

        self.purge_stale_branch(remote, branch).await;
        transitions.enter(MirrorState::StaleBranchPurged);

        debug!(refspec = %fetch_refspec, "Fetch source reference");
        self.vcs
            .fetch(ORIGIN, &fetch_refspec)
            .await
            .map_err(BridgeError::vcs("fetch"))?;
        let head = self
            .vcs
            .resolve_sha("FETCH_HEAD")
            .await
            .map_err(BridgeError::vcs("rev-parse"))?;
        if let Ok(summary) = self.vcs.log_oneline(head.as_str()).await {
            debug!(head = %head, summary = %summary, "Resolved source head");
        }
        transitions.enter(MirrorState::Fetched);

        let outcome = match &request.reference {
            SourceReference::PullRequest {
                base_ref: Some(base_ref),
                merge_policy: MergePolicy::MergeIntoBase,
                ..
            } => self.merge_onto_base(&head, base_ref, branch).await?,
            _ => {
                self.checkout_clean(head.as_str(), branch).await?;
                MergeOutcome::HeadOnly { head }
            }
        };

        if let MergeOutcome::Conflict { head, base } = &outcome {
            transitions.enter(MirrorState::MergeFailed);
            let report = StatusReport::new(
                head.clone(),
                ReportState::Failure,
                format!("Cannot merge {} into {base}", head.short()),
                self.ci.project_url(&request.target.project),
            );
            publish_status(self.sink.as_ref(), &request.status_project, &report).await?;
            return Ok((outcome, 0, false));
        }
        transitions.enter(match outcome {
            MergeOutcome::Merged { .. } => MirrorState::Merged,
            _ => MirrorState::CheckedOut,
        });

        let canceled = self
            .ci
            .cancel_pipelines(&request.target.project, branch)
            .await
            .map_err(BridgeError::platform("cancel stale pipelines"))?;
        if canceled > 0 {
            info!(branch = %branch, canceled = canceled, "Canceled stale pipelines");
        }

        debug!(remote = %remote, branch = %branch, "Force-push mirror branch");
        self.vcs
            .push(remote, branch, true)
            .await
            .map_err(BridgeError::vcs("push"))?;
        transitions.enter(MirrorState::Pushed);

        let report = StatusReport::new(
            outcome.head().clone(),
            ReportState::Pending,
            format!("Mirrored to CI branch {branch}"),
            self.ci.project_url(&request.target.project),
        );
        publish_status(self.sink.as_ref(), &request.status_project, &report).await?;
        transitions.enter(MirrorState::Done);

        Ok((outcome, canceled, true))
    }

    /// Delete the previous run's remote branch. Never fails the run: a later
    /// force-push overwrites the branch anyway.
    async fn purge_stale_branch(&self, remote: &str, branch: &str) {
        match self.vcs.delete_remote_branch(remote, branch).await {
            Ok(()) => info!(remote = %remote, branch = %branch, "Deleted stale remote branch"),
            Err(VcsError::NotFound { .. }) => {
                debug!(remote = %remote, branch = %branch, "No stale remote branch")
            }
            Err(e) => obs::emit_purge_failed(remote, branch, &e),
        }
    }

    async fn checkout_clean(&self, reference: &str, branch: &str) -> Result<()> {
        self.vcs
            .checkout(reference, Some(branch))
            .await
            .map_err(BridgeError::vcs("checkout"))?;
        self.vcs
            .reset(reference, true)
            .await
            .map_err(BridgeError::vcs("reset"))
    }

    async fn merge_onto_base(
        &self,
        head: &CommitSha,
        base_ref: &str,
        branch: &str,
    ) -> Result<MergeOutcome> {
        debug!(base = %base_ref, "Fetch base reference");
        self.vcs
            .fetch(ORIGIN, base_ref)
            .await
            .map_err(BridgeError::vcs("fetch"))?;
        let base = self
            .vcs
            .resolve_sha("FETCH_HEAD")
            .await
            .map_err(BridgeError::vcs("rev-parse"))?;
        self.checkout_clean(base.as_str(), branch).await?;

        let message = merge_message(head, base_ref);
        match self.vcs.merge(head.as_str(), &message).await {
            Ok(()) => {
                let merge_commit = self
                    .vcs
                    .resolve_sha("HEAD")
                    .await
                    .map_err(BridgeError::vcs("rev-parse"))?;
                info!(head = %head, base = %base, merge_commit = %merge_commit, "Merged head onto base");
                Ok(MergeOutcome::Merged {
                    base,
                    head: head.clone(),
                    merge_commit,
                })
            }
            Err(VcsError::MergeConflict { detail, .. }) => {
                warn!(head = %head, base = %base_ref, detail = %detail, "Merge failed");
                Ok(MergeOutcome::Conflict {
                    head: head.clone(),
                    base: base_ref.to_string(),
                })
            }
            Err(e) => Err(BridgeError::vcs("merge")(e)),
        }
    }
}
