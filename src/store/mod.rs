//! Versioned document store
//!
//! Interface to the Git host that owns the values files: branch refs, file
//! contents with revision tags, pull requests, and the workflow-run surface
//! used by the dispatch/poll feature. [`github::GitHubStore`] is the
//! production implementation; tests drive the orchestrator through an
//! in-memory fake.

pub mod github;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use github::{GitHubConfig, GitHubStore};

/// Repository coordinates on the document store host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// File bytes plus the opaque revision tag identifying this exact stored
/// content. The tag conditions the subsequent optimistic-concurrency write.
#[derive(Debug, Clone)]
pub struct FileContents {
    pub bytes: Vec<u8>,
    pub revision: String,
}

/// Handle to a created pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub url: String,
    pub title: String,
}

/// One workflow run as reported by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
    pub url: String,
}

/// One job inside a workflow run, with its step outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
}

/// Directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// The versioned-file host consumed by the orchestrator.
///
/// Write calls (`create_branch`, `write_file`, `create_pull_request`,
/// `dispatch_workflow`) are not idempotent and are never retried by
/// implementations; read calls may apply the crate retry policy.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Default branch of the repository.
    async fn default_ref(&self, repo: &RepoId) -> Result<String>;

    /// Head revision of a branch ref.
    async fn ref_head(&self, repo: &RepoId, r#ref: &str) -> Result<String>;

    /// Create `new_ref` pointing at `from_revision`. Fails with Conflict
    /// when the ref already exists.
    async fn create_branch(&self, repo: &RepoId, new_ref: &str, from_revision: &str) -> Result<()>;

    /// Read one file at a ref. Fails with NotFound.
    async fn read_file(&self, repo: &RepoId, path: &str, r#ref: &str) -> Result<FileContents>;

    /// Write one file on `branch`, conditioned on `expected_revision`.
    /// Fails with Conflict when the revision tag is stale. Returns the new
    /// revision tag.
    async fn write_file(
        &self,
        repo: &RepoId,
        path: &str,
        message: &str,
        bytes: &[u8],
        branch: &str,
        expected_revision: &str,
    ) -> Result<String>;

    /// Open a pull request from `head` into `base`.
    async fn create_pull_request(
        &self,
        repo: &RepoId,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest>;

    /// Trigger a workflow file on a ref with string inputs.
    async fn dispatch_workflow(
        &self,
        repo: &RepoId,
        workflow: &str,
        r#ref: &str,
        inputs: &HashMap<String, String>,
    ) -> Result<()>;

    /// Most recent runs of a workflow, newest first.
    async fn list_workflow_runs(
        &self,
        repo: &RepoId,
        workflow: &str,
        branch: Option<&str>,
        per_page: u32,
    ) -> Result<Vec<RunSummary>>;

    /// Jobs of one workflow run.
    async fn list_run_jobs(&self, repo: &RepoId, run_id: u64) -> Result<Vec<WorkflowJob>>;

    /// Plain-text logs of one job.
    async fn job_logs(&self, repo: &RepoId, job_id: u64) -> Result<String>;

    /// List a directory at a ref.
    async fn list_dir(&self, repo: &RepoId, path: &str, r#ref: &str) -> Result<Vec<DirEntry>>;
}

/// App folders under `base_path`: the directories, sorted.
pub async fn list_apps(
    store: &dyn DocumentStore,
    repo: &RepoId,
    base_path: &str,
    r#ref: &str,
) -> Result<Vec<String>> {
    let mut apps: Vec<String> = store
        .list_dir(repo, base_path, r#ref)
        .await?
        .into_iter()
        .filter(|e| e.kind == EntryKind::Dir)
        .map(|e| e.name)
        .collect();
    apps.sort();
    Ok(apps)
}

/// Values files inside one app folder: files named `values*.yaml`/`.yml`,
/// sorted.
pub async fn list_value_files(
    store: &dyn DocumentStore,
    repo: &RepoId,
    base_path: &str,
    app: &str,
    r#ref: &str,
) -> Result<Vec<String>> {
    let path = format!("{}/{}", base_path.trim_end_matches('/'), app);
    let mut files: Vec<String> = store
        .list_dir(repo, &path, r#ref)
        .await?
        .into_iter()
        .filter(|e| e.kind == EntryKind::File)
        .map(|e| e.name)
        .filter(|name| {
            let lower = name.to_ascii_lowercase();
            lower.starts_with("values") && (lower.ends_with(".yaml") || lower.ends_with(".yml"))
        })
        .collect();
    files.sort();
    Ok(files)
}
