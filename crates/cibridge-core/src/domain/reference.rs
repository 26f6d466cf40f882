//! Source references, mirror targets, and the identifiers they are built from.

use serde::{Deserialize, Serialize};

use super::error::{BridgeError, Result};

/// A git commit identifier as reported by git or a platform API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitSha(String);

impl CommitSha {
    pub fn new(sha: impl Into<String>) -> Self {
        CommitSha(sha.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 chars), for log lines and descriptions.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for CommitSha {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `owner/name` coordinates of a project on either platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectPath {
    pub owner: String,
    pub name: String,
}

impl ProjectPath {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        ProjectPath {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`, tolerating a trailing slash.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim().trim_end_matches('/');
        match trimmed.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(ProjectPath::new(owner, name))
            }
            _ => Err(BridgeError::Configuration(format!(
                "expected owner/project, got '{path}'"
            ))),
        }
    }

    /// Derive `owner/name` from an HTTPS or SSH clone URL.
    ///
    /// `https://github.com/QubesOS/qubes-core-admin.git` and
    /// `git@github.com:QubesOS/qubes-core-admin` both yield
    /// `QubesOS/qubes-core-admin`.
    pub fn from_clone_url(url: &str) -> Result<Self> {
        let stripped = url.trim().trim_end_matches('/');
        let stripped = stripped.strip_suffix(".git").unwrap_or(stripped);
        let tail = match stripped.split_once("://") {
            Some((_, rest)) => rest.split_once('/').map(|(_, path)| path),
            None => stripped.split_once(':').map(|(_, path)| path),
        };
        let tail = tail.ok_or_else(|| {
            BridgeError::Configuration(format!("cannot derive owner/project from '{url}'"))
        })?;
        let mut parts = tail.rsplitn(2, '/');
        match (parts.next(), parts.next()) {
            (Some(name), Some(owner)) if !name.is_empty() && !owner.is_empty() => {
                let owner = owner.rsplit('/').next().unwrap_or(owner);
                Ok(ProjectPath::new(owner, name))
            }
            _ => Err(BridgeError::Configuration(format!(
                "cannot derive owner/project from '{url}'"
            ))),
        }
    }
}

impl std::fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Whether a pull request is mirrored as-is or merged onto its base first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    #[default]
    HeadOnly,
    MergeIntoBase,
}

/// The change a run operates on. Exactly one variant per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceReference {
    Branch {
        name: String,
    },
    PullRequest {
        number: u64,
        base_ref: Option<String>,
        merge_policy: MergePolicy,
    },
    Commit {
        sha: CommitSha,
    },
}

impl SourceReference {
    /// Build a reference from mutually exclusive raw inputs.
    ///
    /// Selecting none or more than one input is a configuration error. No I/O
    /// happens here, so callers can validate before touching anything.
    pub fn select(
        branch: Option<String>,
        pull_request: Option<u64>,
        sha: Option<String>,
    ) -> Result<Self> {
        let chosen = [branch.is_some(), pull_request.is_some(), sha.is_some()]
            .iter()
            .filter(|set| **set)
            .count();
        if chosen != 1 {
            return Err(BridgeError::Configuration(
                "exactly one of branch, pull request or commit sha is required".to_string(),
            ));
        }

        if let Some(name) = branch {
            if name.trim().is_empty() {
                return Err(BridgeError::Configuration(
                    "branch name must not be empty".to_string(),
                ));
            }
            return Ok(SourceReference::Branch { name });
        }
        if let Some(number) = pull_request {
            return Ok(SourceReference::PullRequest {
                number,
                base_ref: None,
                merge_policy: MergePolicy::HeadOnly,
            });
        }
        match sha {
            Some(sha) if !sha.trim().is_empty() => Ok(SourceReference::Commit {
                sha: CommitSha::new(sha),
            }),
            _ => Err(BridgeError::Configuration(
                "commit sha must not be empty".to_string(),
            )),
        }
    }

    /// Attach a base ref and merge policy to a pull request reference.
    ///
    /// Requesting a merge without a base ref is a configuration error. Other
    /// variants are returned unchanged unless a merge was requested.
    pub fn with_base(self, base_ref: Option<String>, merge_policy: MergePolicy) -> Result<Self> {
        match self {
            SourceReference::PullRequest { number, .. } => {
                if merge_policy == MergePolicy::MergeIntoBase && base_ref.is_none() {
                    return Err(BridgeError::Configuration(format!(
                        "merging pull request #{number} requires a base ref"
                    )));
                }
                Ok(SourceReference::PullRequest {
                    number,
                    base_ref,
                    merge_policy,
                })
            }
            other if merge_policy == MergePolicy::MergeIntoBase => Err(
                BridgeError::Configuration(format!("merge requested for non pull request {other}")),
            ),
            other => Ok(other),
        }
    }
}

impl std::fmt::Display for SourceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceReference::Branch { name } => write!(f, "branch {name}"),
            SourceReference::PullRequest { number, .. } => write!(f, "pull request #{number}"),
            SourceReference::Commit { sha } => write!(f, "commit {}", sha.short()),
        }
    }
}

/// How pull request mirror branches are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchNaming {
    /// `pr-{n}`
    #[default]
    Plain,
    /// `pr-{n}-{base}`, for PRs mirrored against several bases.
    WithBase,
}

/// Where a source reference lands on the CI platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    pub project: ProjectPath,
    pub branch: String,
}

impl MirrorTarget {
    /// Compute the mirror branch for `reference` in `project`.
    pub fn for_reference(
        project: ProjectPath,
        reference: &SourceReference,
        naming: BranchNaming,
    ) -> Result<Self> {
        let branch = mirror_branch_name(reference, naming)?;
        Ok(MirrorTarget { project, branch })
    }
}

/// Mirror branch name for a reference.
///
/// The name depends only on the reference, so re-running for the same pull
/// request reuses the same remote branch.
pub fn mirror_branch_name(reference: &SourceReference, naming: BranchNaming) -> Result<String> {
    match reference {
        SourceReference::Branch { name } => Ok(name.clone()),
        SourceReference::PullRequest {
            number, base_ref, ..
        } => match (naming, base_ref) {
            (BranchNaming::WithBase, Some(base)) => {
                Ok(format!("pr-{number}-{}", base.replace('/', "-")))
            }
            (BranchNaming::WithBase, None) => Err(BridgeError::Configuration(format!(
                "base-suffixed branch naming for pull request #{number} requires a base ref"
            ))),
            (BranchNaming::Plain, _) => Ok(format!("pr-{number}")),
        },
        SourceReference::Commit { sha } => Err(BridgeError::Configuration(format!(
            "no mirror branch can be derived from commit {}",
            sha.short()
        ))),
    }
}
