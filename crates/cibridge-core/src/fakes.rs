//! In-memory fakes for the capability traits (testing only)
//!
//! Provides `FakeVcs`, `FakeCi`, `FakeSource` and `RecordingSink` that satisfy
//! the trait contracts without git, network, or filesystem access. Every fake
//! records the calls it receives so tests can assert on ordering and on the
//! absence of I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{CommitSha, PipelineHandle, PipelineStatus, ProjectPath, StatusReport};
use crate::ports::*;

// ---------------------------------------------------------------------------
// FakeVcs
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VcsState {
    calls: Vec<String>,
    fetch_head: Option<CommitSha>,
    head: Option<CommitSha>,
    pushed: Vec<(String, String)>,
    remote_branches: HashMap<(String, String), CommitSha>,
}

/// Scripted `VersionControl`.
///
/// `fetch(remote, refspec)` moves `FETCH_HEAD` to the sha registered for
/// `refspec` with [`FakeVcs::with_ref`]; `checkout`/`reset` move `HEAD`; a
/// successful merge moves `HEAD` to the configured merge commit.
#[derive(Debug)]
pub struct FakeVcs {
    refs: HashMap<String, CommitSha>,
    merge_commit: CommitSha,
    merge_conflict: bool,
    remote_exists: bool,
    failing: Option<&'static str>,
    state: Mutex<VcsState>,
}

impl Default for FakeVcs {
    fn default() -> Self {
        FakeVcs {
            refs: HashMap::new(),
            merge_commit: CommitSha::new("0000000merge"),
            merge_conflict: false,
            remote_exists: false,
            failing: None,
            state: Mutex::new(VcsState::default()),
        }
    }
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `fetch(_, refspec)` resolve `FETCH_HEAD` to `sha`.
    pub fn with_ref(mut self, refspec: &str, sha: &str) -> Self {
        self.refs.insert(refspec.to_string(), CommitSha::new(sha));
        self
    }

    pub fn with_merge_commit(mut self, sha: &str) -> Self {
        self.merge_commit = CommitSha::new(sha);
        self
    }

    pub fn with_merge_conflict(mut self) -> Self {
        self.merge_conflict = true;
        self
    }

    pub fn with_existing_remote(mut self) -> Self {
        self.remote_exists = true;
        self
    }

    /// Make the named operation fail with `CommandFailed`.
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.failing = Some(operation);
        self
    }

    /// Every call received, formatted as `"<op> <args...>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// `(remote, branch)` pairs pushed so far.
    pub fn pushed(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().pushed.clone()
    }

    /// Tip of `branch` on `remote` as left by the last push.
    pub fn remote_tip(&self, remote: &str, branch: &str) -> Option<CommitSha> {
        self.state
            .lock()
            .unwrap()
            .remote_branches
            .get(&(remote.to_string(), branch.to_string()))
            .cloned()
    }

    fn record(&self, operation: &'static str, call: String) -> VcsResult<()> {
        self.state.lock().unwrap().calls.push(call);
        if self.failing == Some(operation) {
            return Err(VcsError::CommandFailed {
                command: operation.to_string(),
                stderr: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    fn lookup(&self, state: &VcsState, reference: &str) -> CommitSha {
        match reference {
            "FETCH_HEAD" => state.fetch_head.clone(),
            "HEAD" => state.head.clone(),
            other => self.refs.get(other).cloned(),
        }
        .unwrap_or_else(|| CommitSha::new(reference))
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn clone_repo(&self, url: &str, branch: Option<&str>) -> VcsResult<()> {
        self.record("clone", format!("clone {url} {}", branch.unwrap_or("-")))
    }

    async fn fetch(&self, remote: &str, refspec: &str) -> VcsResult<()> {
        self.record("fetch", format!("fetch {remote} {refspec}"))?;
        let sha = self.refs.get(refspec).cloned().ok_or_else(|| VcsError::CommandFailed {
            command: "fetch".to_string(),
            stderr: format!("couldn't find remote ref {refspec}"),
        })?;
        self.state.lock().unwrap().fetch_head = Some(sha);
        Ok(())
    }

    async fn checkout(&self, reference: &str, new_branch: Option<&str>) -> VcsResult<()> {
        self.record(
            "checkout",
            format!("checkout {reference} {}", new_branch.unwrap_or("-")),
        )?;
        let mut state = self.state.lock().unwrap();
        let sha = self.lookup(&state, reference);
        state.head = Some(sha);
        Ok(())
    }

    async fn reset(&self, reference: &str, hard: bool) -> VcsResult<()> {
        self.record("reset", format!("reset {reference} hard={hard}"))?;
        let mut state = self.state.lock().unwrap();
        let sha = self.lookup(&state, reference);
        state.head = Some(sha);
        Ok(())
    }

    async fn merge(&self, reference: &str, message: &str) -> VcsResult<()> {
        self.record("merge", format!("merge {reference} {message}"))?;
        if self.merge_conflict {
            return Err(VcsError::MergeConflict {
                reference: reference.to_string(),
                detail: "CONFLICT (content): Merge conflict in README".to_string(),
            });
        }
        self.state.lock().unwrap().head = Some(self.merge_commit.clone());
        Ok(())
    }

    async fn remote_add(&self, name: &str, url: &str) -> VcsResult<()> {
        self.record("remote_add", format!("remote_add {name} {url}"))?;
        if self.remote_exists {
            return Err(VcsError::RemoteExists {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_remote_branch(&self, remote: &str, branch: &str) -> VcsResult<()> {
        self.record(
            "delete_remote_branch",
            format!("delete_remote_branch {remote} {branch}"),
        )?;
        let mut state = self.state.lock().unwrap();
        match state
            .remote_branches
            .remove(&(remote.to_string(), branch.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(VcsError::NotFound {
                what: format!("remote branch {branch}"),
            }),
        }
    }

    async fn resolve_sha(&self, reference: &str) -> VcsResult<CommitSha> {
        self.record("resolve_sha", format!("resolve_sha {reference}"))?;
        let state = self.state.lock().unwrap();
        Ok(self.lookup(&state, reference))
    }

    async fn log_oneline(&self, reference: &str) -> VcsResult<String> {
        self.record("log_oneline", format!("log_oneline {reference}"))?;
        Ok(format!("{reference} fake commit"))
    }

    async fn push(&self, remote: &str, branch: &str, force: bool) -> VcsResult<()> {
        self.record("push", format!("push {remote} {branch} force={force}"))?;
        let mut state = self.state.lock().unwrap();
        let head = state.head.clone().unwrap_or_else(|| CommitSha::new("HEAD"));
        state
            .remote_branches
            .insert((remote.to_string(), branch.to_string()), head);
        state.pushed.push((remote.to_string(), branch.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeCi
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CiState {
    get_pipeline_calls: u32,
    refresh_calls: u32,
    canceled_refs: Vec<String>,
    created: Vec<PipelineOptions>,
    script: VecDeque<PipelineStatus>,
    current: Option<PipelineHandle>,
}

/// Scripted `CiPlatform`.
///
/// A pipeline registered with [`FakeCi::with_pipeline`] becomes visible after
/// `appears_after` unsuccessful `get_pipeline` calls. Each refresh pops the
/// next status from the script; once the script is empty the last status
/// sticks.
#[derive(Debug)]
pub struct FakeCi {
    base_url: String,
    appears_after: u32,
    pipeline: Option<PipelineHandle>,
    cancelable: usize,
    fail_cancel: bool,
    fail_refresh: bool,
    commit_messages: HashMap<String, String>,
    state: Mutex<CiState>,
}

impl Default for FakeCi {
    fn default() -> Self {
        FakeCi {
            base_url: "https://gitlab.example".to_string(),
            appears_after: 0,
            pipeline: None,
            cancelable: 0,
            fail_cancel: false,
            fail_refresh: false,
            commit_messages: HashMap::new(),
            state: Mutex::new(CiState::default()),
        }
    }
}

impl FakeCi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, id: u64, ref_name: &str, status: &str) -> Self {
        let handle = PipelineHandle {
            id,
            status: PipelineStatus::parse(status),
            ref_name: ref_name.to_string(),
        };
        self.state.get_mut().unwrap().current = Some(handle.clone());
        self.pipeline = Some(handle);
        self
    }

    pub fn appearing_after(mut self, misses: u32) -> Self {
        self.appears_after = misses;
        self
    }

    /// Statuses returned by successive refreshes.
    pub fn with_status_script(mut self, statuses: &[&str]) -> Self {
        self.state.get_mut().unwrap().script =
            statuses.iter().map(|s| PipelineStatus::parse(s)).collect();
        self
    }

    pub fn with_cancelable(mut self, count: usize) -> Self {
        self.cancelable = count;
        self
    }

    pub fn failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub fn with_commit_message(mut self, sha: &str, message: &str) -> Self {
        self.commit_messages
            .insert(sha.to_string(), message.to_string());
        self
    }

    pub fn get_pipeline_calls(&self) -> u32 {
        self.state.lock().unwrap().get_pipeline_calls
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.lock().unwrap().refresh_calls
    }

    pub fn canceled_refs(&self) -> Vec<String> {
        self.state.lock().unwrap().canceled_refs.clone()
    }

    pub fn created(&self) -> Vec<PipelineOptions> {
        self.state.lock().unwrap().created.clone()
    }
}

#[async_trait]
impl CiPlatform for FakeCi {
    async fn get_project(&self, project: &ProjectPath) -> PlatformResult<Option<CiProject>> {
        Ok(Some(CiProject {
            id: 1,
            path_with_namespace: project.to_string(),
            web_url: self.project_url(project),
        }))
    }

    async fn get_branch(
        &self,
        _project: &ProjectPath,
        branch: &str,
    ) -> PlatformResult<Option<BranchInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .current
            .as_ref()
            .filter(|p| p.ref_name == branch)
            .map(|_| BranchInfo {
                name: branch.to_string(),
                tip_sha: CommitSha::new("0000000mirror"),
            }))
    }

    async fn get_pipeline(
        &self,
        _project: &ProjectPath,
        ref_name: &str,
    ) -> PlatformResult<Option<PipelineHandle>> {
        let mut state = self.state.lock().unwrap();
        state.get_pipeline_calls += 1;
        if state.get_pipeline_calls <= self.appears_after {
            return Ok(None);
        }
        Ok(self
            .pipeline
            .clone()
            .filter(|p| p.ref_name == ref_name))
    }

    async fn refresh_pipeline(
        &self,
        _project: &ProjectPath,
        id: u64,
    ) -> PlatformResult<PipelineHandle> {
        if self.fail_refresh {
            return Err(PlatformError::Transport("connection reset".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.refresh_calls += 1;
        let next = state.script.pop_front();
        let current = state.current.as_mut().ok_or_else(|| PlatformError::Http {
            status: 404,
            message: format!("pipeline {id} not found"),
        })?;
        if let Some(status) = next {
            current.status = status;
        }
        Ok(current.clone())
    }

    async fn cancel_pipelines(
        &self,
        _project: &ProjectPath,
        ref_name: &str,
    ) -> PlatformResult<usize> {
        if self.fail_cancel {
            return Err(PlatformError::Http {
                status: 500,
                message: "cancel failed".to_string(),
            });
        }
        self.state
            .lock()
            .unwrap()
            .canceled_refs
            .push(ref_name.to_string());
        Ok(self.cancelable)
    }

    async fn create_pipeline(
        &self,
        _project: &ProjectPath,
        options: &PipelineOptions,
    ) -> PlatformResult<PipelineHandle> {
        let mut state = self.state.lock().unwrap();
        state.created.push(options.clone());
        Ok(PipelineHandle {
            id: 1000 + state.created.len() as u64,
            status: PipelineStatus::Created,
            ref_name: options
                .ref_name
                .clone()
                .unwrap_or_else(|| "master".to_string()),
        })
    }

    async fn get_commit_message(
        &self,
        _project: &ProjectPath,
        sha: &CommitSha,
    ) -> PlatformResult<Option<String>> {
        Ok(self.commit_messages.get(sha.as_str()).cloned())
    }

    fn project_url(&self, project: &ProjectPath) -> String {
        format!("{}/{project}", self.base_url)
    }
}

// ---------------------------------------------------------------------------
// FakeSource
// ---------------------------------------------------------------------------

/// Source platform backed by maps of pull requests and branches.
#[derive(Debug, Default)]
pub struct FakeSource {
    pull_requests: HashMap<u64, PullRequestInfo>,
    branches: HashMap<String, BranchInfo>,
    calls: Mutex<u32>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pull_request(mut self, number: u64, head_sha: &str, base_ref: &str) -> Self {
        self.pull_requests.insert(
            number,
            PullRequestInfo {
                number,
                head_sha: CommitSha::new(head_sha),
                base_ref: base_ref.to_string(),
            },
        );
        self
    }

    pub fn with_branch(mut self, name: &str, tip_sha: &str) -> Self {
        self.branches.insert(
            name.to_string(),
            BranchInfo {
                name: name.to_string(),
                tip_sha: CommitSha::new(tip_sha),
            },
        );
        self
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SourcePlatform for FakeSource {
    async fn get_pull_request(
        &self,
        _project: &ProjectPath,
        number: u64,
    ) -> PlatformResult<Option<PullRequestInfo>> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.pull_requests.get(&number).cloned())
    }

    async fn get_branch(
        &self,
        _project: &ProjectPath,
        branch: &str,
    ) -> PlatformResult<Option<BranchInfo>> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.branches.get(branch).cloned())
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Status sink that keeps every submitted report.
#[derive(Debug)]
pub struct RecordingSink {
    response_code: u16,
    reports: Mutex<Vec<(ProjectPath, StatusReport)>>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        RecordingSink {
            response_code: 201,
            reports: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response_code(mut self, code: u16) -> Self {
        self.response_code = code;
        self
    }

    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(_, report)| report.clone())
            .collect()
    }

    pub fn projects(&self) -> Vec<ProjectPath> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(project, _)| project.clone())
            .collect()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn submit(&self, project: &ProjectPath, report: &StatusReport) -> PlatformResult<u16> {
        self.reports
            .lock()
            .unwrap()
            .push((project.clone(), report.clone()));
        Ok(self.response_code)
    }
}
