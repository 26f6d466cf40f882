//! Trigger events decoded once from webhook payloads.
//!
//! Raw payloads never travel past this module: callers get a
//! [`TriggerEvent`] or `None` for payloads the bridge does not act on.

use serde::Deserialize;

use crate::domain::{CommitSha, PipelineStatus, ProjectPath};

/// Events the bridge reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    /// A pull request was opened or received new commits.
    PullRequest {
        repo: ProjectPath,
        number: u64,
        base_ref: String,
        head_sha: CommitSha,
    },
    /// Someone commented on a pull request.
    PullRequestComment {
        pr_url: String,
        user: String,
        body: String,
    },
    /// A CI pipeline changed state.
    Pipeline {
        project: ProjectPath,
        id: u64,
        ref_name: String,
        status: PipelineStatus,
        sha: CommitSha,
    },
}

/// Errors produced while decoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid repository path in payload: {0}")]
    Repository(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Wire {
    PullRequest(PullRequestWire),
    Comment(CommentWire),
    Pipeline(PipelineWire),
}

#[derive(Deserialize)]
struct PullRequestWire {
    action: String,
    pull_request: PullRequestBody,
}

#[derive(Deserialize)]
struct PullRequestBody {
    number: u64,
    base: PullRequestBase,
    head: PullRequestHead,
}

#[derive(Deserialize)]
struct PullRequestBase {
    #[serde(rename = "ref")]
    ref_name: String,
    repo: RepoWire,
}

#[derive(Deserialize)]
struct PullRequestHead {
    sha: String,
}

#[derive(Deserialize)]
struct RepoWire {
    full_name: String,
}

#[derive(Deserialize)]
struct CommentWire {
    action: String,
    issue: IssueWire,
    comment: CommentBody,
}

#[derive(Deserialize)]
struct IssueWire {
    pull_request: Option<IssuePullRequest>,
}

#[derive(Deserialize)]
struct IssuePullRequest {
    url: String,
}

#[derive(Deserialize)]
struct CommentBody {
    user: UserWire,
    body: String,
}

#[derive(Deserialize)]
struct UserWire {
    login: String,
}

#[derive(Deserialize)]
struct PipelineWire {
    object_kind: String,
    project: PipelineProject,
    object_attributes: PipelineAttributes,
}

#[derive(Deserialize)]
struct PipelineProject {
    path_with_namespace: String,
}

#[derive(Deserialize)]
struct PipelineAttributes {
    id: u64,
    #[serde(rename = "ref")]
    ref_name: String,
    status: PipelineStatus,
    sha: String,
}

impl TriggerEvent {
    /// Decode a webhook body.
    ///
    /// Malformed JSON is an error; well-formed payloads of a kind the bridge
    /// ignores (closed PRs, edited comments, push events, ...) yield `None`.
    pub fn decode(body: &[u8]) -> Result<Option<TriggerEvent>, EventError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let wire = match Wire::deserialize(&value) {
            Ok(wire) => wire,
            Err(_) => return Ok(None),
        };

        match wire {
            Wire::PullRequest(pr) => {
                if !matches!(pr.action.as_str(), "opened" | "synchronize") {
                    return Ok(None);
                }
                let repo = ProjectPath::parse(&pr.pull_request.base.repo.full_name)
                    .map_err(|e| EventError::Repository(e.to_string()))?;
                Ok(Some(TriggerEvent::PullRequest {
                    repo,
                    number: pr.pull_request.number,
                    base_ref: pr.pull_request.base.ref_name,
                    head_sha: CommitSha::new(pr.pull_request.head.sha),
                }))
            }
            Wire::Comment(comment) => {
                if comment.action != "created" {
                    return Ok(None);
                }
                Ok(comment
                    .issue
                    .pull_request
                    .map(|pr| TriggerEvent::PullRequestComment {
                        pr_url: pr.url,
                        user: comment.comment.user.login,
                        body: comment.comment.body,
                    }))
            }
            Wire::Pipeline(pipeline) => {
                if pipeline.object_kind != "pipeline" {
                    return Ok(None);
                }
                let project = ProjectPath::parse(&pipeline.project.path_with_namespace)
                    .map_err(|e| EventError::Repository(e.to_string()))?;
                Ok(Some(TriggerEvent::Pipeline {
                    project,
                    id: pipeline.object_attributes.id,
                    ref_name: pipeline.object_attributes.ref_name,
                    status: pipeline.object_attributes.status,
                    sha: CommitSha::new(pipeline.object_attributes.sha),
                }))
            }
        }
    }
}
