//! GitLab REST v4 client
//!
//! Implements [`CiPlatform`] for the CI mirror: projects, branches,
//! pipelines, and commit lookups, authenticated with a `PRIVATE-TOKEN`.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cibridge_core::ports::{BranchInfo, CiPlatform, CiProject, PipelineOptions, PlatformResult};
use cibridge_core::{CommitSha, PipelineHandle, PipelineStatus, ProjectPath};

use crate::error::{ForgeError, Result};
use crate::http;

/// Default ref for explicitly created pipelines.
pub const DEFAULT_PIPELINE_REF: &str = "master";

/// GitLab connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabConfig {
    /// Instance URL, e.g. `https://gitlab.com`
    pub base_url: String,
    /// Personal or project access token
    pub token: String,
}

impl GitLabConfig {
    pub fn new(base_url: &str, token: &str) -> Self {
        GitLabConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Push URL for `project` with the token embedded as userinfo.
    pub fn push_url(&self, project: &ProjectPath) -> Result<String> {
        let mut url = http::parse_base(
            &self.base_url,
            &[project.owner.as_str(), project.name.as_str()],
        )?;
        url.set_username(&project.owner)
            .and_then(|_| url.set_password(Some(&self.token)))
            .map_err(|_| ForgeError::Url(self.base_url.clone()))?;
        Ok(url.to_string())
    }
}

#[derive(Deserialize)]
struct ProjectWire {
    id: u64,
    path_with_namespace: String,
    web_url: String,
}

#[derive(Deserialize)]
struct BranchWire {
    name: String,
    commit: BranchCommitWire,
}

#[derive(Deserialize)]
struct BranchCommitWire {
    id: String,
}

#[derive(Deserialize)]
struct PipelineWire {
    id: u64,
    status: PipelineStatus,
    #[serde(rename = "ref")]
    ref_name: String,
}

impl From<PipelineWire> for PipelineHandle {
    fn from(wire: PipelineWire) -> Self {
        PipelineHandle {
            id: wire.id,
            status: wire.status,
            ref_name: wire.ref_name,
        }
    }
}

#[derive(Deserialize)]
struct CommitWire {
    message: String,
}

#[derive(Serialize)]
struct CreatePipelineBody<'a> {
    #[serde(rename = "ref")]
    ref_name: &'a str,
    variables: Vec<VariableBody<'a>>,
}

#[derive(Serialize)]
struct VariableBody<'a> {
    key: &'a str,
    value: &'a str,
}

/// GitLab API client
pub struct GitLabClient {
    config: GitLabConfig,
    api: Url,
    http: reqwest::Client,
}

impl GitLabClient {
    pub fn new(config: GitLabConfig) -> Result<Self> {
        let api = http::parse_base(&config.base_url, &["api", "v4"])?;
        Ok(GitLabClient {
            config,
            api,
            http: http::build_client()?,
        })
    }

    fn project_endpoint(&self, project: &ProjectPath, rest: &[&str]) -> Result<Url> {
        let path = project.to_string();
        let mut segments = vec!["projects", path.as_str()];
        segments.extend_from_slice(rest);
        http::join(&self.api, &segments)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("PRIVATE-TOKEN", &self.config.token)
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.http
            .post(url)
            .header("PRIVATE-TOKEN", &self.config.token)
    }

    async fn project(&self, project: &ProjectPath) -> Result<Option<CiProject>> {
        let url = self.project_endpoint(project, &[])?;
        let found: Option<ProjectWire> = http::read_optional(self.get(url).send().await?).await?;
        Ok(found.map(|p| CiProject {
            id: p.id,
            path_with_namespace: p.path_with_namespace,
            web_url: p.web_url,
        }))
    }

    async fn branch(&self, project: &ProjectPath, branch: &str) -> Result<Option<BranchInfo>> {
        let url = self.project_endpoint(project, &["repository", "branches", branch])?;
        let found: Option<BranchWire> = http::read_optional(self.get(url).send().await?).await?;
        Ok(found.map(|b| BranchInfo {
            name: b.name,
            tip_sha: CommitSha::new(b.commit.id),
        }))
    }

    async fn pipelines(
        &self,
        project: &ProjectPath,
        ref_name: &str,
        per_page: u32,
    ) -> Result<Vec<PipelineWire>> {
        let url = self.project_endpoint(project, &["pipelines"])?;
        let per_page = per_page.to_string();
        let response = self
            .get(url)
            .query(&[
                ("ref", ref_name),
                ("order_by", "id"),
                ("sort", "desc"),
                ("per_page", per_page.as_str()),
            ])
            .send()
            .await?;
        http::read_json(response).await
    }

    async fn latest_pipeline(
        &self,
        project: &ProjectPath,
        ref_name: &str,
    ) -> Result<Option<PipelineHandle>> {
        let latest = self.pipelines(project, ref_name, 1).await?.into_iter().next();
        Ok(latest.map(PipelineHandle::from))
    }

    async fn pipeline(&self, project: &ProjectPath, id: u64) -> Result<PipelineHandle> {
        let id = id.to_string();
        let url = self.project_endpoint(project, &["pipelines", id.as_str()])?;
        let wire: PipelineWire = http::read_json(self.get(url).send().await?).await?;
        Ok(wire.into())
    }

    async fn cancel_running(&self, project: &ProjectPath, ref_name: &str) -> Result<usize> {
        let active: Vec<u64> = self
            .pipelines(project, ref_name, 100)
            .await?
            .into_iter()
            .filter(|p| !p.status.is_terminal())
            .map(|p| p.id)
            .collect();
        for id in &active {
            let id = id.to_string();
            let url = self.project_endpoint(project, &["pipelines", id.as_str(), "cancel"])?;
            let _: PipelineWire = http::read_json(self.post(url).send().await?).await?;
            debug!(pipeline = %id, ref_name = %ref_name, "Canceled pipeline");
        }
        Ok(active.len())
    }

    async fn create(
        &self,
        project: &ProjectPath,
        options: &PipelineOptions,
    ) -> Result<PipelineHandle> {
        let url = self.project_endpoint(project, &["pipeline"])?;
        let body = CreatePipelineBody {
            ref_name: options.ref_name.as_deref().unwrap_or(DEFAULT_PIPELINE_REF),
            variables: options
                .variables
                .iter()
                .map(|(key, value)| VariableBody {
                    key: key.as_str(),
                    value: value.as_str(),
                })
                .collect(),
        };
        let wire: PipelineWire = http::read_json(self.post(url).json(&body).send().await?).await?;
        info!(pipeline = wire.id, ref_name = %wire.ref_name, "Created pipeline");
        Ok(wire.into())
    }

    async fn commit_message(
        &self,
        project: &ProjectPath,
        sha: &CommitSha,
    ) -> Result<Option<String>> {
        let url = self.project_endpoint(project, &["repository", "commits", sha.as_str()])?;
        let found: Option<CommitWire> = http::read_optional(self.get(url).send().await?).await?;
        Ok(found.map(|c| c.message))
    }
}

#[async_trait]
impl CiPlatform for GitLabClient {
    async fn get_project(&self, project: &ProjectPath) -> PlatformResult<Option<CiProject>> {
        Ok(self.project(project).await?)
    }

    async fn get_branch(
        &self,
        project: &ProjectPath,
        branch: &str,
    ) -> PlatformResult<Option<BranchInfo>> {
        Ok(self.branch(project, branch).await?)
    }

    async fn get_pipeline(
        &self,
        project: &ProjectPath,
        ref_name: &str,
    ) -> PlatformResult<Option<PipelineHandle>> {
        Ok(self.latest_pipeline(project, ref_name).await?)
    }

    async fn refresh_pipeline(
        &self,
        project: &ProjectPath,
        id: u64,
    ) -> PlatformResult<PipelineHandle> {
        Ok(self.pipeline(project, id).await?)
    }

    async fn cancel_pipelines(&self, project: &ProjectPath, ref_name: &str) -> PlatformResult<usize> {
        Ok(self.cancel_running(project, ref_name).await?)
    }

    async fn create_pipeline(
        &self,
        project: &ProjectPath,
        options: &PipelineOptions,
    ) -> PlatformResult<PipelineHandle> {
        Ok(self.create(project, options).await?)
    }

    async fn get_commit_message(
        &self,
        project: &ProjectPath,
        sha: &CommitSha,
    ) -> PlatformResult<Option<String>> {
        Ok(self.commit_message(project, sha).await?)
    }

    fn project_url(&self, project: &ProjectPath) -> String {
        format!("{}/{project}", self.config.base_url.trim_end_matches('/'))
    }
}
