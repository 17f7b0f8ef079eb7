//! GitHub-backed document store
//!
//! Thin client over the GitHub REST contents/refs/pulls/actions endpoints.
//! Credentials and host are explicit constructor inputs; `from_env` is a
//! convenience for processes configured through the environment.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{
    DirEntry, DocumentStore, EntryKind, FileContents, PullRequest, RepoId, RunSummary, WorkflowJob,
    WorkflowStep,
};
use crate::error::{with_retry, Error, Result, RetryPolicy};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

/// GitHub connection configuration
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// Token with contents + pull-requests + workflow scopes
    pub token: String,

    /// API base URL; override for GitHub Enterprise
    pub api_base: String,
}

impl GitHubConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| Error::InvalidArgument("GITHUB_TOKEN not set".into()))?;
        let api_base = std::env::var("GITHUB_API_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            token: token.trim().to_string(),
            api_base,
        })
    }
}

/// GitHub document store client
pub struct GitHubStore {
    config: GitHubConfig,
    client: Client,
    retry: RetryPolicy,
}

impl GitHubStore {
    /// Create a new client with a bounded request timeout.
    pub fn new(config: GitHubConfig) -> Result<Self> {
        Url::parse(&config.api_base)
            .map_err(|e| Error::InvalidArgument(format!("invalid api base url: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("bluegreen-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            client,
            retry: RetryPolicy::default(),
        })
    }

    /// Override the read retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.api_base, path);
        self.client
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }
}

#[derive(Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Deserialize)]
struct RefInfo {
    object: RefObject,
}

#[derive(Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Deserialize)]
struct ContentFile {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct WriteResponse {
    content: ContentSha,
}

#[derive(Deserialize)]
struct ContentSha {
    sha: String,
}

#[derive(Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
    title: String,
}

#[derive(Deserialize)]
struct RunsResponse {
    #[serde(default)]
    workflow_runs: Vec<RunItem>,
}

#[derive(Deserialize)]
struct RunItem {
    id: u64,
    status: String,
    conclusion: Option<String>,
    html_url: String,
}

#[derive(Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<JobItem>,
}

#[derive(Deserialize)]
struct JobItem {
    id: u64,
    name: String,
    status: String,
    conclusion: Option<String>,
    #[serde(default)]
    steps: Vec<StepItem>,
}

#[derive(Deserialize)]
struct StepItem {
    name: String,
    status: String,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct DirItem {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

async fn fail(context: &str, status: StatusCode, response: reqwest::Response) -> Error {
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(context.to_string()),
        StatusCode::CONFLICT => Error::Conflict(format!("{context}: {body}")),
        _ => Error::Api {
            status: status.as_u16(),
            message: format!("{context}: {body}"),
        },
    }
}

#[async_trait]
impl DocumentStore for GitHubStore {
    async fn default_ref(&self, repo: &RepoId) -> Result<String> {
        let path = format!("/repos/{}/{}", repo.owner, repo.repo);
        with_retry(&self.retry, || async {
            let response = self.request(Method::GET, &path).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(fail(&format!("repository {repo}"), status, response).await);
            }
            let info: RepoInfo = response.json().await?;
            Ok(info.default_branch)
        })
        .await
    }

    async fn ref_head(&self, repo: &RepoId, r#ref: &str) -> Result<String> {
        let path = format!(
            "/repos/{}/{}/git/ref/heads/{}",
            repo.owner, repo.repo, r#ref
        );
        with_retry(&self.retry, || async {
            let response = self.request(Method::GET, &path).send().await?;
            let status = response.status();
            if !status.is_success() {
                let context = format!("ref {} in {}", r#ref, repo);
                return Err(fail(&context, status, response).await);
            }
            let info: RefInfo = response.json().await?;
            Ok(info.object.sha)
        })
        .await
    }

    async fn create_branch(&self, repo: &RepoId, new_ref: &str, from_revision: &str) -> Result<()> {
        let path = format!("/repos/{}/{}/git/refs", repo.owner, repo.repo);
        let response = self
            .request(Method::POST, &path)
            .json(&serde_json::json!({
                "ref": format!("refs/heads/{new_ref}"),
                "sha": from_revision,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            // "Reference already exists"
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Conflict(format!("branch {new_ref}: {body}")));
        }
        if !status.is_success() {
            return Err(fail(&format!("create branch {new_ref} in {repo}"), status, response).await);
        }

        tracing::debug!(branch = new_ref, %repo, "created branch");
        Ok(())
    }

    async fn read_file(&self, repo: &RepoId, path: &str, r#ref: &str) -> Result<FileContents> {
        let api_path = format!("/repos/{}/{}/contents/{}", repo.owner, repo.repo, path);
        with_retry(&self.retry, || async {
            let response = self
                .request(Method::GET, &api_path)
                .query(&[("ref", r#ref)])
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let context = format!("file {} at {}", path, r#ref);
                return Err(fail(&context, status, response).await);
            }

            let file: ContentFile = response.json().await?;
            let packed: String = file.content.split_whitespace().collect();
            let bytes = BASE64.decode(packed).map_err(|e| Error::Api {
                status: 200,
                message: format!("undecodable content for {path}: {e}"),
            })?;
            Ok(FileContents {
                bytes,
                revision: file.sha,
            })
        })
        .await
    }

    async fn write_file(
        &self,
        repo: &RepoId,
        path: &str,
        message: &str,
        bytes: &[u8],
        branch: &str,
        expected_revision: &str,
    ) -> Result<String> {
        let api_path = format!("/repos/{}/{}/contents/{}", repo.owner, repo.repo, path);
        let response = self
            .request(Method::PUT, &api_path)
            .json(&serde_json::json!({
                "message": message,
                "content": BASE64.encode(bytes),
                "branch": branch,
                "sha": expected_revision,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            // Stale revision tag: someone committed to this path since we read it.
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Conflict(format!(
                "write {path} on {branch} with revision {expected_revision}: {body}"
            )));
        }
        if !status.is_success() {
            return Err(fail(&format!("write {path} on {branch}"), status, response).await);
        }

        let written: WriteResponse = response.json().await?;
        tracing::debug!(path, branch, revision = %written.content.sha, "wrote file");
        Ok(written.content.sha)
    }

    async fn create_pull_request(
        &self,
        repo: &RepoId,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let path = format!("/repos/{}/{}/pulls", repo.owner, repo.repo);
        let response = self
            .request(Method::POST, &path)
            .json(&serde_json::json!({
                "title": title,
                "head": head,
                "base": base,
                "body": body,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(&format!("pull request {head} -> {base}"), status, response).await);
        }

        let pull: PullResponse = response.json().await?;
        tracing::info!(url = %pull.html_url, "opened pull request");
        Ok(PullRequest {
            id: pull.number,
            url: pull.html_url,
            title: pull.title,
        })
    }

    async fn dispatch_workflow(
        &self,
        repo: &RepoId,
        workflow: &str,
        r#ref: &str,
        inputs: &HashMap<String, String>,
    ) -> Result<()> {
        let path = format!(
            "/repos/{}/{}/actions/workflows/{}/dispatches",
            repo.owner, repo.repo, workflow
        );
        let response = self
            .request(Method::POST, &path)
            .json(&serde_json::json!({ "ref": r#ref, "inputs": inputs }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InvalidArgument(format!(
                "workflow {workflow} rejected dispatch inputs: {body}"
            )));
        }
        if !status.is_success() {
            return Err(fail(&format!("dispatch workflow {workflow}"), status, response).await);
        }

        tracing::info!(workflow, target_ref = r#ref, "dispatched workflow");
        Ok(())
    }

    async fn list_workflow_runs(
        &self,
        repo: &RepoId,
        workflow: &str,
        branch: Option<&str>,
        per_page: u32,
    ) -> Result<Vec<RunSummary>> {
        let path = format!(
            "/repos/{}/{}/actions/workflows/{}/runs",
            repo.owner, repo.repo, workflow
        );
        with_retry(&self.retry, || async {
            let mut query: Vec<(&str, String)> = vec![("per_page", per_page.to_string())];
            if let Some(branch) = branch {
                query.push(("branch", branch.to_string()));
            }

            let response = self.request(Method::GET, &path).query(&query).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(fail(&format!("runs of workflow {workflow}"), status, response).await);
            }

            let runs: RunsResponse = response.json().await?;
            Ok(runs
                .workflow_runs
                .into_iter()
                .map(|r| RunSummary {
                    id: r.id,
                    status: r.status,
                    conclusion: r.conclusion,
                    url: r.html_url,
                })
                .collect())
        })
        .await
    }

    async fn list_run_jobs(&self, repo: &RepoId, run_id: u64) -> Result<Vec<WorkflowJob>> {
        let path = format!(
            "/repos/{}/{}/actions/runs/{}/jobs",
            repo.owner, repo.repo, run_id
        );
        with_retry(&self.retry, || async {
            let response = self.request(Method::GET, &path).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(fail(&format!("jobs of run {run_id}"), status, response).await);
            }

            let jobs: JobsResponse = response.json().await?;
            Ok(jobs
                .jobs
                .into_iter()
                .map(|j| WorkflowJob {
                    id: j.id,
                    name: j.name,
                    status: j.status,
                    conclusion: j.conclusion,
                    steps: j
                        .steps
                        .into_iter()
                        .map(|s| WorkflowStep {
                            name: s.name,
                            status: s.status,
                            conclusion: s.conclusion,
                        })
                        .collect(),
                })
                .collect())
        })
        .await
    }

    async fn job_logs(&self, repo: &RepoId, job_id: u64) -> Result<String> {
        let path = format!(
            "/repos/{}/{}/actions/jobs/{}/logs",
            repo.owner, repo.repo, job_id
        );
        with_retry(&self.retry, || async {
            // The host answers with a redirect to a signed URL; reqwest
            // follows it and the final body is plain text.
            let response = self.request(Method::GET, &path).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(fail(&format!("logs of job {job_id}"), status, response).await);
            }
            Ok(response.text().await?)
        })
        .await
    }

    async fn list_dir(&self, repo: &RepoId, path: &str, r#ref: &str) -> Result<Vec<DirEntry>> {
        let api_path = format!("/repos/{}/{}/contents/{}", repo.owner, repo.repo, path);
        with_retry(&self.retry, || async {
            let response = self
                .request(Method::GET, &api_path)
                .query(&[("ref", r#ref)])
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(fail(&format!("directory {path}"), status, response).await);
            }

            // A file path answers with an object instead of an array.
            let value: serde_json::Value = response.json().await?;
            let items: Vec<DirItem> = match value {
                serde_json::Value::Array(_) => {
                    serde_json::from_value(value).map_err(|e| Error::Api {
                        status: 200,
                        message: format!("unexpected listing shape for {path}: {e}"),
                    })?
                }
                _ => Vec::new(),
            };

            Ok(items
                .into_iter()
                .map(|item| DirEntry {
                    kind: match item.kind.as_str() {
                        "file" => EntryKind::File,
                        "dir" => EntryKind::Dir,
                        _ => EntryKind::Other,
                    },
                    name: item.name,
                })
                .collect())
        })
        .await
    }
}
