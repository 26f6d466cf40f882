//! End-to-end mirror runs with real git against local repositories.
//!
//! The "source platform" is a plain repository with `refs/pull/<n>/head`
//! refs; the "CI mirror" is a bare repository. CI and status capabilities
//! are in-memory fakes.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use cibridge_core::fakes::{FakeCi, RecordingSink};
use cibridge_core::{
    BranchMirror, BranchNaming, MergeOutcome, MergePolicy, MirrorRequest, ProjectPath,
    ReportState, SourceReference, WorkingCopy,
};
use cibridge_git::GitCli;

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

/// Source repo with `main` and a pull request branch published as
/// `refs/pull/42/head`. Returns the pull request head.
fn make_source(dir: &Path) -> String {
    git(dir, &["init", "-q", "-b", "main"]);
    std::fs::write(dir.join("README"), "hello\n").unwrap();
    git(dir, &["add", "README"]);
    git(dir, &["commit", "-q", "-m", "initial"]);
    push_pull_request_commit(dir, "feature.txt", "v1\n")
}

fn push_pull_request_commit(dir: &Path, file: &str, content: &str) -> String {
    git(dir, &["checkout", "-q", "-B", "feature"]);
    std::fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", "pull request change"]);
    let head = git(dir, &["rev-parse", "HEAD"]);
    git(dir, &["update-ref", "refs/pull/42/head", &head]);
    git(dir, &["checkout", "-q", "main"]);
    head
}

fn request(source: &Path, mirror: &Path, policy: MergePolicy) -> MirrorRequest {
    let reference = SourceReference::select(None, Some(42), None)
        .unwrap()
        .with_base(Some("main".to_string()), policy)
        .unwrap();
    MirrorRequest::new(
        source.to_str().unwrap(),
        reference,
        ProjectPath::new("QubesOS", "qubes-core-admin"),
        BranchNaming::Plain,
        mirror.to_str().unwrap(),
        ProjectPath::new("QubesOS", "qubes-core-admin"),
    )
    .unwrap()
}

async fn run_once(request: &MirrorRequest, sink: Arc<RecordingSink>) -> MergeOutcome {
    let workspace = WorkingCopy::create("cibridge-test").unwrap();
    let vcs = Arc::new(GitCli::new(workspace.path()));
    let mirror = BranchMirror::new(vcs, Arc::new(FakeCi::new()), sink);
    let run = mirror.run(request).await.unwrap();
    workspace.close();
    run.outcome
}

#[tokio::test]
async fn head_only_mirror_pushes_pull_request_head() {
    let source = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();
    let head = make_source(source.path());
    git(mirror.path(), &["init", "-q", "--bare"]);

    let sink = Arc::new(RecordingSink::new());
    let outcome = run_once(
        &request(source.path(), mirror.path(), MergePolicy::HeadOnly),
        sink.clone(),
    )
    .await;

    assert_eq!(outcome.head().as_str(), head);
    assert_eq!(git(mirror.path(), &["rev-parse", "refs/heads/pr-42"]), head);
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, ReportState::Pending);
    assert_eq!(reports[0].commit_sha.as_str(), head);
}

#[tokio::test]
async fn merge_mirror_is_idempotent_across_runs() {
    let source = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();
    let first_head = make_source(source.path());
    git(mirror.path(), &["init", "-q", "--bare"]);
    let request = request(source.path(), mirror.path(), MergePolicy::MergeIntoBase);

    let sink = Arc::new(RecordingSink::new());
    let first = run_once(&request, sink.clone()).await;
    let first_merge = match &first {
        MergeOutcome::Merged { merge_commit, .. } => merge_commit.clone(),
        other => panic!("expected a merge, got {other:?}"),
    };
    assert_eq!(first.head().as_str(), first_head);
    assert_eq!(
        git(mirror.path(), &["log", "-1", "--format=%s", "refs/heads/pr-42"]),
        format!("Merge {first_head} into main")
    );

    let second_head = push_pull_request_commit(source.path(), "feature.txt", "v2\n");
    let second = run_once(&request, sink.clone()).await;
    let second_merge = match &second {
        MergeOutcome::Merged { merge_commit, .. } => merge_commit.clone(),
        other => panic!("expected a merge, got {other:?}"),
    };

    assert_ne!(first_merge, second_merge);
    assert_eq!(second.head().as_str(), second_head);
    assert_eq!(
        git(mirror.path(), &["rev-parse", "refs/heads/pr-42"]),
        second_merge.as_str()
    );
    let parents = git(mirror.path(), &["log", "-1", "--format=%P", "refs/heads/pr-42"]);
    assert!(parents.split_whitespace().any(|p| p == second_head));

    let heads: Vec<_> = sink
        .reports()
        .iter()
        .map(|r| r.commit_sha.as_str().to_string())
        .collect();
    assert_eq!(heads, vec![first_head, second_head]);
}

#[tokio::test]
async fn conflicting_pull_request_is_reported_and_not_pushed() {
    let source = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();
    make_source(source.path());
    let head = push_pull_request_commit(source.path(), "README", "feature side\n");
    std::fs::write(source.path().join("README"), "main side\n").unwrap();
    git(source.path(), &["commit", "-q", "-am", "diverge"]);
    git(mirror.path(), &["init", "-q", "--bare"]);

    let workspace = WorkingCopy::create("cibridge-test").unwrap();
    let sink = Arc::new(RecordingSink::new());
    let branch_mirror = BranchMirror::new(
        Arc::new(GitCli::new(workspace.path())),
        Arc::new(FakeCi::new()),
        sink.clone(),
    );
    let run = branch_mirror
        .run(&request(source.path(), mirror.path(), MergePolicy::MergeIntoBase))
        .await
        .unwrap();

    assert!(run.is_reportable_failure());
    let refs = git(mirror.path(), &["for-each-ref", "refs/heads"]);
    assert!(refs.is_empty(), "nothing should be pushed, found {refs}");
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, ReportState::Failure);
    assert_eq!(reports[0].commit_sha.as_str(), head);
}
