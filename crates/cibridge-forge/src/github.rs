//! GitHub REST v3 client: pull requests, branches and commit statuses.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cibridge_core::ports::{
    BranchInfo, PlatformError, PlatformResult, PullRequestInfo, SourcePlatform, StatusSink,
};
use cibridge_core::{CommitSha, ProjectPath, StatusReport};

use crate::error::Result;
use crate::http;
use crate::token::CachedToken;

/// GitHub refuses status descriptions longer than this.
pub const MAX_DESCRIPTION_LEN: usize = 140;

const ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Deserialize)]
struct PullRequestWire {
    number: u64,
    head: HeadWire,
    base: BaseWire,
}

#[derive(Deserialize)]
struct HeadWire {
    sha: String,
}

#[derive(Deserialize)]
struct BaseWire {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Deserialize)]
struct BranchWire {
    name: String,
    commit: BranchCommitWire,
}

#[derive(Deserialize)]
struct BranchCommitWire {
    sha: String,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    state: &'a str,
    description: &'a str,
    target_url: &'a str,
    context: &'a str,
}

pub struct GitHubClient {
    api: Url,
    http: reqwest::Client,
    tokens: CachedToken,
}

impl GitHubClient {
    /// `api_url` is the REST root, `https://api.github.com` for github.com.
    pub fn new(api_url: &str, tokens: CachedToken) -> Result<Self> {
        Ok(GitHubClient {
            api: http::parse_base(api_url, &[])?,
            http: http::build_client()?,
            tokens,
        })
    }

    fn repo_endpoint(&self, project: &ProjectPath, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos", project.owner.as_str(), project.name.as_str()];
        segments.extend_from_slice(rest);
        http::join(&self.api, &segments)
    }

    async fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        let token = self.tokens.valid_token().await?;
        Ok(builder
            .header("Authorization", format!("token {token}"))
            .header("Accept", ACCEPT))
    }

    async fn pull_request(
        &self,
        project: &ProjectPath,
        number: u64,
    ) -> Result<Option<PullRequestInfo>> {
        let number = number.to_string();
        let url = self.repo_endpoint(project, &["pulls", number.as_str()])?;
        let request = self.authorized(self.http.get(url)).await?;
        let found: Option<PullRequestWire> = http::read_optional(request.send().await?).await?;
        Ok(found.map(|pr| PullRequestInfo {
            number: pr.number,
            head_sha: CommitSha::new(pr.head.sha),
            base_ref: pr.base.ref_name,
        }))
    }

    async fn branch(&self, project: &ProjectPath, branch: &str) -> Result<Option<BranchInfo>> {
        let url = self.repo_endpoint(project, &["branches", branch])?;
        let request = self.authorized(self.http.get(url)).await?;
        let found: Option<BranchWire> = http::read_optional(request.send().await?).await?;
        Ok(found.map(|b| BranchInfo {
            name: b.name,
            tip_sha: CommitSha::new(b.commit.sha),
        }))
    }

    async fn post_status(&self, project: &ProjectPath, report: &StatusReport) -> Result<u16> {
        let url = self.repo_endpoint(project, &["statuses", report.commit_sha.as_str()])?;
        let body = StatusBody {
            state: report.state.as_str(),
            description: truncate(&report.description, MAX_DESCRIPTION_LEN),
            target_url: &report.target_url,
            context: &report.context,
        };
        let request = self.authorized(self.http.post(url)).await?;
        let response = request.json(&body).send().await?;
        let code = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(code = code, message = %message, "Commit status not accepted");
        }
        Ok(code)
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[async_trait]
impl SourcePlatform for GitHubClient {
    async fn get_pull_request(
        &self,
        project: &ProjectPath,
        number: u64,
    ) -> PlatformResult<Option<PullRequestInfo>> {
        Ok(self.pull_request(project, number).await?)
    }

    async fn get_branch(
        &self,
        project: &ProjectPath,
        branch: &str,
    ) -> PlatformResult<Option<BranchInfo>> {
        Ok(self.branch(project, branch).await?)
    }
}

#[async_trait]
impl StatusSink for GitHubClient {
    /// Returns the HTTP status code; rejections are judged by the caller.
    async fn submit(&self, project: &ProjectPath, report: &StatusReport) -> PlatformResult<u16> {
        self.post_status(project, report)
            .await
            .map_err(PlatformError::from)
    }
}
