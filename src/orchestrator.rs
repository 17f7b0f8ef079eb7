//! Release orchestrator
//!
//! Sequences one full propose-change transaction against the document
//! store: create branch, read the values file, apply exactly one mutation,
//! write it back conditioned on the read revision, open a pull request.
//! The sequence is deliberately not transactional across steps; a failure
//! after branch creation leaves the branch behind and the error names it,
//! because deleting a ref automatically could destroy concurrent manual
//! work on the same name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConfigDocument;
use crate::error::{Error, Result};
use crate::mutation::{flip_active, set_switch, set_version, SwitchState};
use crate::slot::{detect_active_slot, Slot};
use crate::store::{DocumentStore, PullRequest, RepoId, RunSummary};

/// One requested transition of a values document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Operation {
    /// Overwrite one slot's version field
    VersionUpdate { slot: Slot, version: String },

    /// Switch which slot is active; optionally force the new standby's
    /// traffic switch off
    AutoFlip { turn_off_standby_switch: bool },
}

impl Operation {
    fn action_slug(&self) -> String {
        match self {
            Operation::VersionUpdate { slot, .. } => format!("update-{slot}-version"),
            Operation::AutoFlip { .. } => "auto-flip".to_string(),
        }
    }
}

/// Which document a change targets, and the labels woven into branch
/// names, commit messages, and pull-request text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Application label, e.g. the app folder name
    pub app: String,

    /// Environment label, e.g. `dev-us`
    pub env: String,

    /// Values file path inside the repository
    pub values_path: String,
}

/// Outcome of a successful propose-change transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChange {
    pub branch: String,
    pub pull_request: PullRequest,

    /// The newly active slot, for auto-flips
    pub new_active: Option<Slot>,
}

/// Read-only activation summary of one values document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotReport {
    pub active: Slot,
    pub standby: Slot,
    pub blue_version: Option<String>,
    pub green_version: Option<String>,
}

/// Which slot a version update should land on, relative to the current
/// activation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    Primary,
    Standby,
}

impl UpdateTarget {
    pub fn resolve(self, active: Slot) -> Slot {
        match self {
            UpdateTarget::Primary => active,
            UpdateTarget::Standby => active.standby(),
        }
    }
}

/// Bounded polling configuration for workflow-run lookups.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// First wait between lookups
    pub interval: Duration,

    /// Interval growth factor, capped at `max_interval`
    pub multiplier: f64,

    /// Largest wait between lookups
    pub max_interval: Duration,

    /// Total wait budget before giving up
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            multiplier: 1.5,
            max_interval: Duration::from_secs(15),
            max_wait: Duration::from_secs(120),
        }
    }
}

/// Result of a bounded workflow-run wait. A timeout is an answer, not a
/// failure: whatever mutating call preceded the wait already succeeded.
#[derive(Debug, Clone)]
pub enum RunLookup {
    Found(RunSummary),
    TimedOut,
}

impl fmt::Display for RunLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunLookup::Found(run) => write!(f, "run {} ({})", run.id, run.status),
            RunLookup::TimedOut => f.write_str("no completed run observed yet"),
        }
    }
}

static PR_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://github\.com/\S+/pull/\d+").expect("valid regex"));

/// First pull-request URL appearing in a log text.
pub fn extract_pr_url(log_text: &str) -> Option<&str> {
    PR_URL.find(log_text).map(|m| m.as_str())
}

/// UTC timestamp slug with second resolution. Collisions within the same
/// second for the same target fail loudly at branch creation.
fn timestamp_slug(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d-%H%M%S").to_string()
}

/// Deterministic branch name for one proposed change.
pub fn branch_slug(app: &str, env: &str, action: &str, at: DateTime<Utc>) -> String {
    let app_slug = app.replace('/', "-");
    format!("feat/{}-{}-{}-{}", app_slug, env, action, timestamp_slug(at))
}

/// Deterministic pull-request title.
pub fn pr_title(op: &Operation, target: &Target, new_active: Option<Slot>) -> String {
    match op {
        Operation::VersionUpdate { slot, version } => format!(
            "{} [{}] Update {} version: {}",
            target.app, target.env, slot, version
        ),
        Operation::AutoFlip { .. } => {
            let color = new_active.map(Slot::as_str).unwrap_or("standby");
            format!("{} [{}] Auto flip to {}", target.app, target.env, color)
        }
    }
}

/// Deterministic pull-request body.
pub fn pr_body(op: &Operation, target: &Target, new_active: Option<Slot>) -> String {
    match op {
        Operation::VersionUpdate { slot, version } => format!(
            "Automated release pull request.\n\n\
             **App:** {}\n\n**Env:** {}\n\n**Target slot:** {}\n\n**New version:** {}\n",
            target.app, target.env, slot, version
        ),
        Operation::AutoFlip {
            turn_off_standby_switch,
        } => {
            let color = new_active.map(Slot::as_str).unwrap_or("standby");
            let mut body = format!(
                "Automated pull request flipping the active slot and adjusting weights.\n\n\
                 **App:** {}\n\n**Env:** {}\n\n**New active slot:** {}\n",
                target.app, target.env, color
            );
            if *turn_off_standby_switch {
                body.push_str("\nStandby switch turned off.\n");
            }
            body
        }
    }
}

/// Commit message for the values-file write.
pub fn commit_message(op: &Operation, target: &Target, new_active: Option<Slot>) -> String {
    match op {
        Operation::VersionUpdate { slot, version } => format!(
            "chore({}): bump {} version to {} [{}]",
            target.app, slot, version, target.env
        ),
        Operation::AutoFlip { .. } => {
            let color = new_active.map(Slot::as_str).unwrap_or("standby");
            format!(
                "feat({}): auto-flip active slot to {} [{}]",
                target.app, color, target.env
            )
        }
    }
}

/// Composes the slot resolver, the mutation engine, and the document store
/// into end-to-end propose/report/dispatch operations. Holds no mutable
/// state: every operation is a fresh read-modify-write cycle and concurrent
/// proposals race at the store's revision check, not here.
pub struct ReleaseOrchestrator {
    store: Arc<dyn DocumentStore>,
    repo: RepoId,
}

impl ReleaseOrchestrator {
    pub fn new(store: Arc<dyn DocumentStore>, repo: RepoId) -> Self {
        Self { store, repo }
    }

    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Explicit base ref, or the repository default.
    pub async fn base_ref(&self, explicit: Option<&str>) -> Result<String> {
        match explicit {
            Some(r) if !r.trim().is_empty() => Ok(r.trim().to_string()),
            _ => self.store.default_ref(&self.repo).await,
        }
    }

    /// Read-only activation summary of the values file at a ref.
    pub async fn slot_report(&self, values_path: &str, base_ref: Option<&str>) -> Result<SlotReport> {
        let base = self.base_ref(base_ref).await?;
        let file = self.store.read_file(&self.repo, values_path, &base).await?;
        let doc = ConfigDocument::from_bytes(&file.bytes)?;
        let active = detect_active_slot(&doc)?;

        Ok(SlotReport {
            active,
            standby: active.standby(),
            blue_version: version_of(&doc, Slot::Blue),
            green_version: version_of(&doc, Slot::Green),
        })
    }

    /// Propose one change: branch, commit, pull request.
    ///
    /// Cancellation-safe in the usual way — dropping the returned future
    /// aborts before the next remote call, but a call already issued is
    /// not rolled back.
    pub async fn propose_change(
        &self,
        op: &Operation,
        target: &Target,
        base_ref: Option<&str>,
    ) -> Result<ProposedChange> {
        if let Operation::VersionUpdate { version, .. } = op {
            if version.trim().is_empty() {
                return Err(Error::InvalidArgument("version must not be blank".into()));
            }
        }

        let base = self.base_ref(base_ref).await?;
        let branch = branch_slug(&target.app, &target.env, &op.action_slug(), Utc::now());

        let head = self.store.ref_head(&self.repo, &base).await?;
        self.store.create_branch(&self.repo, &branch, &head).await?;
        tracing::info!(branch = %branch, base = %base, "created proposal branch");

        // The branch exists from here on; any later failure leaves it
        // orphaned and the error must say so.
        self.commit_and_open(op, target, &base, &branch)
            .await
            .map_err(|e| orphaned_branch(e, &branch))
    }

    async fn commit_and_open(
        &self,
        op: &Operation,
        target: &Target,
        base: &str,
        branch: &str,
    ) -> Result<ProposedChange> {
        let file = self
            .store
            .read_file(&self.repo, &target.values_path, branch)
            .await?;
        let doc = ConfigDocument::from_bytes(&file.bytes)?;

        let (next, new_active) = match op {
            Operation::VersionUpdate { slot, version } => {
                (set_version(&doc, *slot, version)?, None)
            }
            Operation::AutoFlip {
                turn_off_standby_switch,
            } => {
                let (flipped, new_active) = flip_active(&doc)?;
                let flipped = if *turn_off_standby_switch {
                    set_switch(&flipped, new_active.standby(), SwitchState::Off)?
                } else {
                    flipped
                };
                (flipped, Some(new_active))
            }
        };

        let bytes = next.to_bytes()?;
        let message = commit_message(op, target, new_active);
        self.store
            .write_file(
                &self.repo,
                &target.values_path,
                &message,
                &bytes,
                branch,
                &file.revision,
            )
            .await?;

        let pull_request = self
            .store
            .create_pull_request(
                &self.repo,
                branch,
                base,
                &pr_title(op, target, new_active),
                &pr_body(op, target, new_active),
            )
            .await?;

        Ok(ProposedChange {
            branch: branch.to_string(),
            pull_request,
            new_active,
        })
    }

    /// Run the same operation across several targets with bounded
    /// concurrency. Failures are collected per app, never short-circuited:
    /// one bad values file must not block the other apps' proposals.
    pub async fn propose_for_apps(
        &self,
        op: &Operation,
        targets: &[Target],
        base_ref: Option<&str>,
        concurrency: usize,
    ) -> Vec<(String, Result<ProposedChange>)> {
        stream::iter(targets)
            .map(|target| async move {
                let outcome = self.propose_change(op, target, base_ref).await;
                (target.app.clone(), outcome)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Trigger a workflow file on a ref.
    pub async fn dispatch(
        &self,
        workflow: &str,
        r#ref: &str,
        inputs: &HashMap<String, String>,
    ) -> Result<()> {
        self.store
            .dispatch_workflow(&self.repo, workflow, r#ref, inputs)
            .await
    }

    /// Most recent runs of a workflow.
    pub async fn runs(
        &self,
        workflow: &str,
        branch: Option<&str>,
        per_page: u32,
    ) -> Result<Vec<RunSummary>> {
        self.store
            .list_workflow_runs(&self.repo, workflow, branch, per_page)
            .await
    }

    /// Wait for the newest run of `workflow` to complete, within the
    /// policy's total budget. Answers [`RunLookup::TimedOut`] instead of
    /// blocking indefinitely or failing hard.
    pub async fn wait_for_run(
        &self,
        workflow: &str,
        branch: Option<&str>,
        policy: &PollPolicy,
    ) -> Result<RunLookup> {
        let started = tokio::time::Instant::now();
        let mut interval = policy.interval;

        loop {
            let runs = self
                .store
                .list_workflow_runs(&self.repo, workflow, branch, 5)
                .await?;
            if let Some(run) = runs.into_iter().find(|r| r.status == "completed") {
                return Ok(RunLookup::Found(run));
            }

            if started.elapsed() + interval > policy.max_wait {
                return Ok(RunLookup::TimedOut);
            }
            tokio::time::sleep(interval).await;
            interval = Duration::from_secs_f64(
                (interval.as_secs_f64() * policy.multiplier)
                    .min(policy.max_interval.as_secs_f64()),
            );
        }
    }

    /// Scan one run's jobs for a successful PR-creating step and pull the
    /// first pull-request URL out of that job's logs.
    pub async fn find_pr_link(&self, run_id: u64) -> Result<Option<String>> {
        let jobs = self.store.list_run_jobs(&self.repo, run_id).await?;
        for job in jobs {
            let created_pr = job.steps.iter().any(|step| {
                step.name.to_ascii_lowercase().contains("pr")
                    && step.status == "completed"
                    && step.conclusion.as_deref() == Some("success")
            });
            if !created_pr {
                continue;
            }
            let logs = self.store.job_logs(&self.repo, job.id).await?;
            if let Some(url) = extract_pr_url(&logs) {
                return Ok(Some(url.to_string()));
            }
        }
        Ok(None)
    }
}

fn version_of(doc: &ConfigDocument, slot: Slot) -> Option<String> {
    let underscored = format!("appversion_{}", slot);
    let joined = format!("appversion{}", slot);
    doc.get_ci(&underscored)
        .or_else(|| doc.get_ci(&joined))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Re-wrap a failure that happened after branch creation so the caller
/// knows which branch is left for manual cleanup.
fn orphaned_branch(error: Error, branch: &str) -> Error {
    let note = format!("branch {branch} was already created and is left in place");
    match error {
        Error::NotFound(msg) => Error::NotFound(format!("{msg} ({note})")),
        Error::Conflict(msg) => Error::Conflict(format!("{msg} ({note})")),
        Error::InvalidArgument(msg) => Error::InvalidArgument(format!("{msg} ({note})")),
        Error::RemoteUnavailable(msg) => Error::RemoteUnavailable(format!("{msg} ({note})")),
        Error::Api { status, message } => Error::Api {
            status,
            message: format!("{message} ({note})"),
        },
        Error::Yaml(e) => Error::InvalidArgument(format!("{e} ({note})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn target() -> Target {
        Target {
            app: "checkout/api".into(),
            env: "prod-us".into(),
            values_path: "apps/checkout-api/values-prod-us.yaml".into(),
        }
    }

    #[test]
    fn branch_slug_is_deterministic_and_slash_safe() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(
            branch_slug("checkout/api", "prod-us", "auto-flip", at),
            "feat/checkout-api-prod-us-auto-flip-20250314-092653"
        );
    }

    #[test]
    fn version_update_texts_name_every_label() {
        let op = Operation::VersionUpdate {
            slot: Slot::Green,
            version: "2.4.0".into(),
        };
        let t = target();

        assert_eq!(
            pr_title(&op, &t, None),
            "checkout/api [prod-us] Update green version: 2.4.0"
        );
        assert_eq!(
            commit_message(&op, &t, None),
            "chore(checkout/api): bump green version to 2.4.0 [prod-us]"
        );
        let body = pr_body(&op, &t, None);
        assert!(body.contains("**Target slot:** green"));
        assert!(body.contains("**New version:** 2.4.0"));
    }

    #[test]
    fn auto_flip_texts_name_new_active_and_switch_note() {
        let op = Operation::AutoFlip {
            turn_off_standby_switch: true,
        };
        let t = target();

        assert_eq!(
            pr_title(&op, &t, Some(Slot::Green)),
            "checkout/api [prod-us] Auto flip to green"
        );
        assert_eq!(
            commit_message(&op, &t, Some(Slot::Green)),
            "feat(checkout/api): auto-flip active slot to green [prod-us]"
        );
        let body = pr_body(&op, &t, Some(Slot::Green));
        assert!(body.contains("**New active slot:** green"));
        assert!(body.contains("Standby switch turned off."));

        let silent = pr_body(
            &Operation::AutoFlip {
                turn_off_standby_switch: false,
            },
            &t,
            Some(Slot::Blue),
        );
        assert!(!silent.contains("Standby switch"));
    }

    #[test]
    fn action_slug_encodes_operation() {
        let bump = Operation::VersionUpdate {
            slot: Slot::Blue,
            version: "1.0.0".into(),
        };
        assert_eq!(bump.action_slug(), "update-blue-version");
        assert_eq!(
            Operation::AutoFlip {
                turn_off_standby_switch: false
            }
            .action_slug(),
            "auto-flip"
        );
    }

    #[test]
    fn update_target_resolves_against_active() {
        assert_eq!(UpdateTarget::Primary.resolve(Slot::Blue), Slot::Blue);
        assert_eq!(UpdateTarget::Standby.resolve(Slot::Blue), Slot::Green);
    }

    #[test]
    fn extracts_first_pr_url_from_logs() {
        let logs = "2025-03-14T09:26:53Z creating pull request...\n\
                    2025-03-14T09:26:54Z done: https://github.com/acme/deploys/pull/512\n\
                    2025-03-14T09:26:55Z see also https://github.com/acme/deploys/pull/513\n";
        assert_eq!(
            extract_pr_url(logs),
            Some("https://github.com/acme/deploys/pull/512")
        );
        assert_eq!(extract_pr_url("no links here"), None);
    }

    #[test]
    fn orphaned_branch_note_keeps_variant() {
        let wrapped = orphaned_branch(Error::Conflict("stale revision".into()), "feat/x");
        match wrapped {
            Error::Conflict(msg) => {
                assert!(msg.contains("stale revision"));
                assert!(msg.contains("feat/x"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
