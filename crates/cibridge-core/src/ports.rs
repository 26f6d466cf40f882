//! Capability traits the state machines are written against.
//!
//! - `VersionControl`: git operations on one private working copy
//! - `CiPlatform`: projects, branches and pipelines on the CI host
//! - `SourcePlatform`: pull requests and branches on the code host
//! - `StatusSink`: commit statuses visible to reviewers
//!
//! All traits are async and backend-agnostic. In-memory fakes live in the
//! `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CommitSha, PipelineHandle, ProjectPath, StatusReport};

// ---------------------------------------------------------------------------
// VersionControl
// ---------------------------------------------------------------------------

/// Failures of individual git operations.
///
/// The distinguished variants are the ones callers recover from; everything
/// else is `CommandFailed`.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("merge of {reference} failed: {detail}")]
    MergeConflict { reference: String, detail: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("remote {name} already exists")]
    RemoteExists { name: String },

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VcsResult<T> = std::result::Result<T, VcsError>;

/// Git operations on a single working copy.
///
/// Every operation takes typed parameters; implementations must never build
/// shell command strings from them.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clone `url` into the working copy, at `branch` or the default branch.
    async fn clone_repo(&self, url: &str, branch: Option<&str>) -> VcsResult<()>;

    async fn fetch(&self, remote: &str, refspec: &str) -> VcsResult<()>;

    /// Check out `reference`, creating or resetting `new_branch` at it if given.
    async fn checkout(&self, reference: &str, new_branch: Option<&str>) -> VcsResult<()>;

    async fn reset(&self, reference: &str, hard: bool) -> VcsResult<()>;

    /// Non-fast-forward merge of `reference` into `HEAD`.
    ///
    /// Returns `VcsError::MergeConflict` when the merge cannot complete.
    async fn merge(&self, reference: &str, message: &str) -> VcsResult<()>;

    /// Returns `VcsError::RemoteExists` when `name` is already configured.
    async fn remote_add(&self, name: &str, url: &str) -> VcsResult<()>;

    /// Returns `VcsError::NotFound` when the remote has no such branch.
    async fn delete_remote_branch(&self, remote: &str, branch: &str) -> VcsResult<()>;

    /// Resolve `reference` to the commit it points at.
    async fn resolve_sha(&self, reference: &str) -> VcsResult<CommitSha>;

    /// One-line summary of the commit at `reference`.
    async fn log_oneline(&self, reference: &str) -> VcsResult<String>;

    async fn push(&self, remote: &str, branch: &str, force: bool) -> VcsResult<()>;
}

// ---------------------------------------------------------------------------
// Platform APIs
// ---------------------------------------------------------------------------

/// Failures of platform API calls.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// A project on the CI platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiProject {
    pub id: u64,
    pub path_with_namespace: String,
    pub web_url: String,
}

/// A branch on either platform, reduced to its tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub tip_sha: CommitSha,
}

/// The parts of a pull request the relay and mirror need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub head_sha: CommitSha,
    pub base_ref: String,
}

/// Options for creating a pipeline explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Ref to run against; the platform default branch when `None`.
    pub ref_name: Option<String>,
    pub variables: Vec<(String, String)>,
}

/// CI-hosting platform capability.
#[async_trait]
pub trait CiPlatform: Send + Sync {
    async fn get_project(&self, project: &ProjectPath) -> PlatformResult<Option<CiProject>>;

    async fn get_branch(
        &self,
        project: &ProjectPath,
        branch: &str,
    ) -> PlatformResult<Option<BranchInfo>>;

    /// Most recent pipeline running against `ref_name`, if any.
    async fn get_pipeline(
        &self,
        project: &ProjectPath,
        ref_name: &str,
    ) -> PlatformResult<Option<PipelineHandle>>;

    /// Fetch the current state of pipeline `id`.
    async fn refresh_pipeline(
        &self,
        project: &ProjectPath,
        id: u64,
    ) -> PlatformResult<PipelineHandle>;

    /// Cancel every non-terminal pipeline on `ref_name`; returns how many.
    async fn cancel_pipelines(&self, project: &ProjectPath, ref_name: &str)
        -> PlatformResult<usize>;

    async fn create_pipeline(
        &self,
        project: &ProjectPath,
        options: &PipelineOptions,
    ) -> PlatformResult<PipelineHandle>;

    /// Full message of commit `sha` in the mirror project, if it exists.
    async fn get_commit_message(
        &self,
        project: &ProjectPath,
        sha: &CommitSha,
    ) -> PlatformResult<Option<String>>;

    /// Web URL of the project.
    fn project_url(&self, project: &ProjectPath) -> String;

    /// Web URL of pipeline `id`.
    fn pipeline_url(&self, project: &ProjectPath, id: u64) -> String {
        format!("{}/-/pipelines/{id}", self.project_url(project))
    }
}

/// Code-hosting platform capability.
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    async fn get_pull_request(
        &self,
        project: &ProjectPath,
        number: u64,
    ) -> PlatformResult<Option<PullRequestInfo>>;

    async fn get_branch(
        &self,
        project: &ProjectPath,
        branch: &str,
    ) -> PlatformResult<Option<BranchInfo>>;
}

/// Destination of commit statuses.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Publish `report` on `project`, returning the HTTP-style status code.
    ///
    /// Codes `>= 400` mean the status was not recorded; callers must surface
    /// them.
    async fn submit(&self, project: &ProjectPath, report: &StatusReport) -> PlatformResult<u16>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UrlOnly;

    #[async_trait]
    impl CiPlatform for UrlOnly {
        async fn get_project(&self, _: &ProjectPath) -> PlatformResult<Option<CiProject>> {
            Ok(None)
        }
        async fn get_branch(&self, _: &ProjectPath, _: &str) -> PlatformResult<Option<BranchInfo>> {
            Ok(None)
        }
        async fn get_pipeline(
            &self,
            _: &ProjectPath,
            _: &str,
        ) -> PlatformResult<Option<PipelineHandle>> {
            Ok(None)
        }
        async fn refresh_pipeline(&self, _: &ProjectPath, id: u64) -> PlatformResult<PipelineHandle> {
            Err(PlatformError::Http {
                status: 404,
                message: format!("pipeline {id}"),
            })
        }
        async fn cancel_pipelines(&self, _: &ProjectPath, _: &str) -> PlatformResult<usize> {
            Ok(0)
        }
        async fn create_pipeline(
            &self,
            _: &ProjectPath,
            _: &PipelineOptions,
        ) -> PlatformResult<PipelineHandle> {
            Err(PlatformError::Transport("offline".to_string()))
        }
        async fn get_commit_message(
            &self,
            _: &ProjectPath,
            _: &CommitSha,
        ) -> PlatformResult<Option<String>> {
            Ok(None)
        }
        fn project_url(&self, project: &ProjectPath) -> String {
            format!("https://gitlab.com/{project}")
        }
    }

    #[test]
    fn test_default_pipeline_url() {
        let url = UrlOnly.pipeline_url(&ProjectPath::new("QubesOS", "qubes-core-admin"), 77);
        assert_eq!(url, "https://gitlab.com/QubesOS/qubes-core-admin/-/pipelines/77");
    }
}
