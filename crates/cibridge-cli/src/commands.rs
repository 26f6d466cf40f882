//! Subcommand implementations.
//!
//! Inputs are validated before any credential lookup, and credentials are
//! checked before any git or network I/O.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use cibridge_core::obs::RunSpan;
use cibridge_core::{
    mirror_branch_name, BranchMirror, BranchNaming, BridgeError, MergePolicy, MirrorRequest,
    PipelineSelection, ProjectPath, RelayRequest, SourceReference, StatusRelay, TriggerEvent,
    WorkingCopy,
};
use cibridge_git::GitCli;

use crate::config::BridgeConfig;

/// How a command finished without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    /// A known bad outcome (merge conflict, missing pipeline, timeout) was
    /// reported as a commit status.
    ReportedFailure,
}

#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// Source repository to clone
    #[arg(long)]
    pub clone: String,

    /// GitLab instance URL
    #[arg(long, env = "GITLAB_URL", default_value = "https://gitlab.com")]
    pub push: String,

    /// owner/project on the GitLab instance
    #[arg(long)]
    pub repo: String,

    /// Branch to mirror
    #[arg(long = "ref")]
    pub reference: Option<String>,

    /// Pull request number to mirror
    #[arg(long)]
    pub pull_request: Option<u64>,

    /// Base ref of the pull request
    #[arg(long)]
    pub base: Option<String>,

    /// Merge the pull request head into --base before pushing
    #[arg(long)]
    pub merge: bool,

    /// Name the mirror branch pr-<n>-<base>
    #[arg(long)]
    pub suffix_base: bool,

    /// owner/name on GitHub receiving statuses (default: derived from --clone)
    #[arg(long)]
    pub status_repo: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// GitHub owner of the project where the pull request is made
    #[arg(long)]
    pub github_owner: String,

    /// GitHub project name
    #[arg(long)]
    pub github_component: String,

    /// GitLab owner of the project where the pipeline runs
    #[arg(long)]
    pub gitlab_owner: String,

    /// GitLab project name
    #[arg(long)]
    pub gitlab_component: String,

    #[arg(long)]
    pub branch: Option<String>,

    #[arg(long)]
    pub pull_request: Option<u64>,

    /// Commit sha; merge commits are traced back to the pull request head
    #[arg(long)]
    pub sha: Option<String>,

    /// GitLab pipeline id (requires --pipeline-status)
    #[arg(long)]
    pub pipeline_id: Option<u64>,

    /// GitLab pipeline status (requires --pipeline-id)
    #[arg(long)]
    pub pipeline_status: Option<String>,

    /// Mirror branch to watch (default: derived from the reference)
    #[arg(long)]
    pub pipeline_ref: Option<String>,

    /// Report the current status once instead of waiting for completion
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// Webhook payload file; stdin when omitted or "-"
    pub payload: Option<PathBuf>,

    /// Mirror pull requests merged into their base
    #[arg(long)]
    pub merge: bool,

    /// GitLab namespace for mirrors (default: the GitHub owner)
    #[arg(long)]
    pub gitlab_owner: Option<String>,

    /// GitHub owner receiving statuses (default: the GitLab owner)
    #[arg(long)]
    pub github_owner: Option<String>,
}

pub async fn mirror(config: &BridgeConfig, args: &MirrorArgs) -> Result<Completion> {
    let policy = if args.merge {
        MergePolicy::MergeIntoBase
    } else {
        MergePolicy::HeadOnly
    };
    let reference = SourceReference::select(args.reference.clone(), args.pull_request, None)?
        .with_base(args.base.clone(), policy)?;
    let ci_project = ProjectPath::parse(&args.repo)?;
    let status_project = match &args.status_repo {
        Some(repo) => ProjectPath::parse(repo)?,
        None => ProjectPath::from_clone_url(&args.clone)?,
    };
    let naming = if args.suffix_base {
        BranchNaming::WithBase
    } else {
        BranchNaming::Plain
    };

    let config = config.clone().with_gitlab_url(&args.push);
    let gitlab = config.gitlab()?;
    let github = config.github_client()?;
    let push_url = gitlab
        .push_url(&ci_project)
        .map_err(|e| BridgeError::Configuration(e.to_string()))?;
    let ci = config.gitlab_client()?;

    let request = MirrorRequest::new(
        args.clone.clone(),
        reference,
        ci_project,
        naming,
        push_url,
        status_project,
    )?;
    let span = RunSpan::enter("mirror", &request.target.branch);
    debug!(run_id = %span.run_id(), "Starting mirror run");

    let workspace = WorkingCopy::create("cibridge-").map_err(BridgeError::from)?;
    let mirror = BranchMirror::new(
        Arc::new(GitCli::new(workspace.path())),
        Arc::new(ci),
        Arc::new(github),
    );
    let result = mirror.run(&request).await;
    workspace.close();
    let run = result?;

    info!(
        branch = %run.target.branch,
        head = %run.outcome.head(),
        pushed = run.pushed,
        canceled_pipelines = run.canceled_pipelines,
        "Mirror finished"
    );
    Ok(if run.is_reportable_failure() {
        Completion::ReportedFailure
    } else {
        Completion::Done
    })
}

pub async fn status(config: &BridgeConfig, args: &StatusArgs) -> Result<Completion> {
    let reference =
        SourceReference::select(args.branch.clone(), args.pull_request, args.sha.clone())?;
    let discover_ref = args
        .pipeline_ref
        .clone()
        .or_else(|| mirror_branch_name(&reference, BranchNaming::Plain).ok());
    let selection = PipelineSelection::from_inputs(
        args.pipeline_id,
        args.pipeline_status.clone(),
        discover_ref,
    )?;
    let source_project = ProjectPath::new(&args.github_owner, &args.github_component);
    let ci_project = ProjectPath::new(&args.gitlab_owner, &args.gitlab_component);

    let ci = config.gitlab_client()?;
    let github = Arc::new(config.github_client()?);

    let mut request = RelayRequest::new(source_project, ci_project, reference, selection);
    if args.no_wait {
        request = request.without_wait();
    }
    let span = RunSpan::enter("status", &request.reference.to_string());
    debug!(run_id = %span.run_id(), "Starting status relay");

    let relay = StatusRelay::new(github.clone(), Arc::new(ci), github);
    let outcome = relay.run(&request).await?;

    info!(
        sha = %outcome.commit_sha,
        pipeline = ?outcome.pipeline_id,
        state = %outcome.final_state,
        reports = outcome.reports_sent,
        end = ?outcome.end,
        "Status relay finished"
    );
    Ok(if outcome.is_reportable_failure() {
        Completion::ReportedFailure
    } else {
        Completion::Done
    })
}

pub async fn event(config: &BridgeConfig, args: &EventArgs) -> Result<Completion> {
    let body = read_payload(args.payload.as_ref()).await?;
    let event = TriggerEvent::decode(&body)
        .map_err(|e| BridgeError::Configuration(e.to_string()))?;

    match event {
        None => {
            info!("Ignoring payload");
            Ok(Completion::Done)
        }
        Some(TriggerEvent::PullRequestComment { pr_url, user, .. }) => {
            info!(pr = %pr_url, user = %user, "Ignoring pull request comment");
            Ok(Completion::Done)
        }
        Some(TriggerEvent::PullRequest {
            repo,
            number,
            base_ref,
            head_sha,
        }) => {
            debug!(repo = %repo, number = number, head = %head_sha, "Pull request event");
            let gitlab_owner = args.gitlab_owner.clone().unwrap_or_else(|| repo.owner.clone());
            let mirror_args = MirrorArgs {
                clone: format!("{}/{repo}", config.github_url.trim_end_matches('/')),
                push: config.gitlab_url.clone(),
                repo: ProjectPath::new(gitlab_owner, &repo.name).to_string(),
                reference: None,
                pull_request: Some(number),
                base: Some(base_ref),
                merge: args.merge,
                suffix_base: false,
                status_repo: Some(repo.to_string()),
            };
            mirror(config, &mirror_args).await
        }
        Some(TriggerEvent::Pipeline {
            project,
            id,
            ref_name,
            status: pipeline_status,
            sha,
        }) => {
            debug!(project = %project, pipeline = id, ref_name = %ref_name, sha = %sha, "Pipeline event");
            // Address the commit the pipeline tested; the pull request head
            // may have moved since. Merge commits map back to their head.
            let status_args = StatusArgs {
                github_owner: args
                    .github_owner
                    .clone()
                    .unwrap_or_else(|| project.owner.clone()),
                github_component: project.name.clone(),
                gitlab_owner: project.owner.clone(),
                gitlab_component: project.name.clone(),
                branch: None,
                pull_request: None,
                sha: Some(sha.to_string()),
                pipeline_id: Some(id),
                pipeline_status: Some(pipeline_status.as_str().to_string()),
                pipeline_ref: Some(ref_name),
                no_wait: true,
            };
            status(config, &status_args).await
        }
    }
}

async fn read_payload(path: Option<&PathBuf>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path.as_os_str() != "-" => tokio::fs::read(path).await.map_err(|e| {
            BridgeError::Configuration(format!("cannot read payload {}: {e}", path.display()))
                .into()
        }),
        _ => {
            let mut body = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut body)
                .await
                .context("Failed to read payload from stdin")?;
            Ok(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::process::Command;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COMMITS: &str = "/api/v4/projects/QubesOS%2Fqubes-core-admin/repository/commits";
    const STATUSES: &str = "/repos/QubesOS/qubes-core-admin/statuses";

    fn config(gitlab: &MockServer, github: &MockServer, github_url: &str) -> BridgeConfig {
        let vars: HashMap<&str, String> = HashMap::from([
            ("GITLAB_URL", gitlab.uri()),
            ("GITLAB_API_TOKEN", "glpat-test".to_string()),
            ("GITHUB_API_URL", github.uri()),
            ("GITHUB_API_TOKEN", "ghp-test".to_string()),
            ("GITHUB_URL", github_url.to_string()),
        ]);
        BridgeConfig::from_lookup(move |key| vars.get(key).cloned())
    }

    fn payload(dir: &Path, body: serde_json::Value) -> EventArgs {
        let file = dir.join("payload.json");
        std::fs::write(&file, body.to_string()).unwrap();
        EventArgs {
            payload: Some(file),
            merge: false,
            gitlab_owner: None,
            github_owner: None,
        }
    }

    fn pipeline_payload(sha: &str, status: &str) -> serde_json::Value {
        json!({
            "object_kind": "pipeline",
            "project": {"path_with_namespace": "QubesOS/qubes-core-admin"},
            "object_attributes": {"id": 99, "ref": "pr-42", "status": status, "sha": sha}
        })
    }

    async fn commit_message(gitlab: &MockServer, sha: &str, message: &str) {
        Mock::given(method("GET"))
            .and(path(format!("{COMMITS}/{sha}")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": sha, "message": message})),
            )
            .mount(gitlab)
            .await;
    }

    async fn accept_statuses(github: &MockServer, sha: &str, state: &str) {
        Mock::given(method("POST"))
            .and(path(format!("{STATUSES}/{sha}")))
            .and(body_partial_json(json!({"state": state})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(github)
            .await;
    }

    async fn pull_request_lookups_forbidden(github: &MockServer) {
        Mock::given(method("GET"))
            .and(path_regex(r"^/repos/.*/pulls/.*$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(github)
            .await;
    }

    #[tokio::test]
    async fn test_pipeline_event_reports_on_the_tested_commit() {
        let gitlab = MockServer::start().await;
        let github = MockServer::start().await;
        commit_message(&gitlab, "oldhead111111", "pull request change\n").await;
        accept_statuses(&github, "oldhead111111", "success").await;
        pull_request_lookups_forbidden(&github).await;

        let dir = tempfile::tempdir().unwrap();
        let args = payload(dir.path(), pipeline_payload("oldhead111111", "success"));
        let completion = event(&config(&gitlab, &github, "https://github.com"), &args)
            .await
            .unwrap();

        assert_eq!(completion, Completion::Done);
    }

    #[tokio::test]
    async fn test_pipeline_event_on_merge_commit_reports_on_pull_request_head() {
        let gitlab = MockServer::start().await;
        let github = MockServer::start().await;
        commit_message(&gitlab, "fff999", "Merge def456 into master\n").await;
        accept_statuses(&github, "def456", "failure").await;
        Mock::given(method("POST"))
            .and(path(format!("{STATUSES}/fff999")))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&github)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let args = payload(dir.path(), pipeline_payload("fff999", "failed"));
        let completion = event(&config(&gitlab, &github, "https://github.com"), &args)
            .await
            .unwrap();

        assert_eq!(completion, Completion::Done);
    }

    #[tokio::test]
    async fn test_pipeline_event_for_unknown_commit_sends_nothing() {
        let gitlab = MockServer::start().await;
        let github = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&github)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let args = payload(dir.path(), pipeline_payload("abc123", "running"));
        let err = event(&config(&gitlab, &github, "https://github.com"), &args)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::ReferenceNotFound(_))
        ));
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(["-c", "user.name=test-user", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// `QubesOS/qubes-core-admin` under `root` whose pull request 42 cannot
    /// merge into `main`. Returns the pull request head.
    fn conflicting_source(root: &Path) -> String {
        let repo = root.join("QubesOS").join("qubes-core-admin");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "-q", "-b", "main"]);
        std::fs::write(repo.join("README"), "hello\n").unwrap();
        git(&repo, &["add", "README"]);
        git(&repo, &["commit", "-q", "-m", "initial"]);
        git(&repo, &["checkout", "-q", "-b", "feature"]);
        std::fs::write(repo.join("README"), "feature side\n").unwrap();
        git(&repo, &["commit", "-q", "-am", "pull request change"]);
        let head = git(&repo, &["rev-parse", "HEAD"]);
        git(&repo, &["update-ref", "refs/pull/42/head", &head]);
        git(&repo, &["checkout", "-q", "main"]);
        std::fs::write(repo.join("README"), "main side\n").unwrap();
        git(&repo, &["commit", "-q", "-am", "diverge"]);
        head
    }

    #[tokio::test]
    async fn test_pull_request_event_mirrors_and_reports_merge_failure() {
        let gitlab = MockServer::start().await;
        let github = MockServer::start().await;
        let sources = tempfile::tempdir().unwrap();
        let head = conflicting_source(sources.path());
        accept_statuses(&github, &head, "failure").await;

        let dir = tempfile::tempdir().unwrap();
        let mut args = payload(
            dir.path(),
            json!({
                "action": "synchronize",
                "pull_request": {
                    "number": 42,
                    "base": {"ref": "main", "repo": {"full_name": "QubesOS/qubes-core-admin"}},
                    "head": {"sha": head}
                }
            }),
        );
        args.merge = true;
        let github_url = sources.path().to_str().unwrap();
        let completion = event(&config(&gitlab, &github, github_url), &args)
            .await
            .unwrap();

        assert_eq!(completion, Completion::ReportedFailure);
    }
}
