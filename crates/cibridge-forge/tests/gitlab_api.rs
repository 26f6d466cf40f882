//! GitLab client against a mock server.

use cibridge_core::ports::{CiPlatform, PipelineOptions, PlatformError};
use cibridge_core::{CommitSha, PipelineStatus, ProjectPath};
use cibridge_forge::{GitLabClient, GitLabConfig};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "/api/v4/projects/QubesOS%2Fqubes-core-admin";

fn project() -> ProjectPath {
    ProjectPath::new("QubesOS", "qubes-core-admin")
}

fn client(server: &MockServer) -> GitLabClient {
    GitLabClient::new(GitLabConfig::new(&server.uri(), "glpat-test")).unwrap()
}

#[tokio::test]
async fn test_latest_pipeline_for_ref() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/pipelines")))
        .and(query_param("ref", "pr-42"))
        .and(header("PRIVATE-TOKEN", "glpat-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 99, "status": "running", "ref": "pr-42", "sha": "fff999"},
            {"id": 98, "status": "canceled", "ref": "pr-42", "sha": "eee888"}
        ])))
        .mount(&server)
        .await;

    let handle = client(&server)
        .get_pipeline(&project(), "pr-42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.id, 99);
    assert_eq!(handle.status, PipelineStatus::Running);
}

#[tokio::test]
async fn test_no_pipeline_yet() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/pipelines")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let found = client(&server).get_pipeline(&project(), "pr-42").await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_refresh_pipeline_keeps_unknown_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/pipelines/99")))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"id": 99, "status": "waiting_for_resource", "ref": "pr-42"}),
        ))
        .mount(&server)
        .await;

    let handle = client(&server).refresh_pipeline(&project(), 99).await.unwrap();
    assert_eq!(handle.status, PipelineStatus::WaitingForResource);
}

#[tokio::test]
async fn test_cancel_only_active_pipelines() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/pipelines")))
        .and(query_param("ref", "pr-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 3, "status": "running", "ref": "pr-42"},
            {"id": 2, "status": "pending", "ref": "pr-42"},
            {"id": 1, "status": "success", "ref": "pr-42"}
        ])))
        .mount(&server)
        .await;
    for id in [3, 2] {
        Mock::given(method("POST"))
            .and(path(format!("{PROJECT}/pipelines/{id}/cancel")))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"id": id, "status": "canceled", "ref": "pr-42"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
    }

    let canceled = client(&server)
        .cancel_pipelines(&project(), "pr-42")
        .await
        .unwrap();
    assert_eq!(canceled, 2);
}

#[tokio::test]
async fn test_create_pipeline_defaults_to_master() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{PROJECT}/pipeline")))
        .and(body_json(json!({
            "ref": "master",
            "variables": [{"key": "OPENQA", "value": "1"}]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(
            json!({"id": 100, "status": "created", "ref": "master"}),
        ))
        .mount(&server)
        .await;

    let options = PipelineOptions {
        ref_name: None,
        variables: vec![("OPENQA".to_string(), "1".to_string())],
    };
    let handle = client(&server)
        .create_pipeline(&project(), &options)
        .await
        .unwrap();
    assert_eq!(handle.id, 100);
    assert_eq!(handle.status, PipelineStatus::Created);
}

#[tokio::test]
async fn test_commit_message_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/commits/fff999")))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"id": "fff999", "message": "Merge def456 into master\n"}),
        ))
        .mount(&server)
        .await;

    let message = client(&server)
        .get_commit_message(&project(), &CommitSha::new("fff999"))
        .await
        .unwrap();
    assert_eq!(message.as_deref(), Some("Merge def456 into master\n"));
}

#[tokio::test]
async fn test_missing_project_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PROJECT))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "404 Project Not Found"})))
        .mount(&server)
        .await;

    assert!(client(&server).get_project(&project()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_branch_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/branches/pr-42")))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"name": "pr-42", "commit": {"id": "fff999"}}),
        ))
        .mount(&server)
        .await;

    let branch = client(&server)
        .get_branch(&project(), "pr-42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(branch.tip_sha, CommitSha::new("fff999"));
}

#[tokio::test]
async fn test_server_error_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/pipelines/5")))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = client(&server).refresh_pipeline(&project(), 5).await.unwrap_err();
    assert!(matches!(err, PlatformError::Http { status: 502, .. }));
}
