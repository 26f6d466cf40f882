//! GitHub client and token exchange against a mock server.

use cibridge_core::ports::{PlatformError, SourcePlatform, StatusSink};
use cibridge_core::{CommitSha, ProjectPath, ReportState, StatusReport};
use cibridge_forge::{CachedToken, GitHubClient, InstallationTokenSource, StaticToken};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn project() -> ProjectPath {
    ProjectPath::new("QubesOS", "qubes-core-admin")
}

fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::new(&server.uri(), CachedToken::new(StaticToken::new("ghp_test"))).unwrap()
}

#[tokio::test]
async fn test_pull_request_head_and_base() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/QubesOS/qubes-core-admin/pulls/42"))
        .and(header("Authorization", "token ghp_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "number": 42,
            "head": {"sha": "def456", "ref": "feature"},
            "base": {"sha": "abc000", "ref": "master"}
        })))
        .mount(&server)
        .await;

    let pr = client(&server)
        .get_pull_request(&project(), 42)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pr.head_sha, CommitSha::new("def456"));
    assert_eq!(pr.base_ref, "master");
}

#[tokio::test]
async fn test_unknown_pull_request_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/QubesOS/qubes-core-admin/pulls/7"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .mount(&server)
        .await;

    assert!(client(&server)
        .get_pull_request(&project(), 7)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_branch_tip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/QubesOS/qubes-core-admin/branches/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "main",
            "commit": {"sha": "aaa111"}
        })))
        .mount(&server)
        .await;

    let branch = client(&server)
        .get_branch(&project(), "main")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(branch.tip_sha, CommitSha::new("aaa111"));
}

#[tokio::test]
async fn test_status_is_posted_with_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/QubesOS/qubes-core-admin/statuses/def456"))
        .and(body_json(json!({
            "state": "success",
            "description": "Pipeline: success",
            "target_url": "https://gitlab.com/QubesOS/qubes-core-admin/-/pipelines/99",
            "context": "continuous-integration/pullrequest"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let report = StatusReport::new(
        CommitSha::new("def456"),
        ReportState::Success,
        "Pipeline: success",
        "https://gitlab.com/QubesOS/qubes-core-admin/-/pipelines/99",
    );
    let code = client(&server).submit(&project(), &report).await.unwrap();
    assert_eq!(code, 201);
}

#[tokio::test]
async fn test_rejected_status_returns_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/QubesOS/qubes-core-admin/statuses/def456"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "Validation Failed"})))
        .mount(&server)
        .await;

    let report = StatusReport::new(CommitSha::new("def456"), ReportState::Pending, "x", "https://x");
    let code = client(&server).submit(&project(), &report).await.unwrap();
    assert_eq!(code, 422);
}

#[tokio::test]
async fn test_installation_token_is_exchanged_once_and_used() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/77/access_tokens"))
        .and(header("Authorization", "Bearer app.jwt.value"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "ghs_installation",
            "expires_at": "2099-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/QubesOS/qubes-core-admin/statuses/def456"))
        .and(header("Authorization", "token ghs_installation"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let source = InstallationTokenSource::new(&server.uri(), "app.jwt.value", 77).unwrap();
    let client = GitHubClient::new(&server.uri(), CachedToken::new(source)).unwrap();
    let report = StatusReport::new(CommitSha::new("def456"), ReportState::Pending, "x", "https://x");
    assert_eq!(client.submit(&project(), &report).await.unwrap(), 201);
    assert_eq!(client.submit(&project(), &report).await.unwrap(), 201);
}

#[tokio::test]
async fn test_failed_token_exchange_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/77/access_tokens"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})))
        .mount(&server)
        .await;

    let source = InstallationTokenSource::new(&server.uri(), "expired.jwt", 77).unwrap();
    let client = GitHubClient::new(&server.uri(), CachedToken::new(source)).unwrap();
    let report = StatusReport::new(CommitSha::new("def456"), ReportState::Pending, "x", "https://x");
    let err = client.submit(&project(), &report).await.unwrap_err();
    assert!(matches!(err, PlatformError::Auth(_)));
}
