//! # Blue/Green Release Orchestrator
//!
//! Operator tooling for blue/green deployments backed by a Git host:
//! reads an environment's values file, derives which slot is active,
//! computes a consistent new document for a requested transition, and
//! encodes the change as a branch + commit + pull request guarded by the
//! host's optimistic-concurrency check.
//!
//! ## Features
//!
//! - **Case-tolerant document model**: values files with inconsistent key
//!   casing (and even duplicate differently-cased sections) mutate safely
//! - **Idempotent mutations**: version bump, slot flip, and switch toggle
//!   land on the same final state no matter how often they are applied
//! - **Race-checked writes**: every proposal is a fresh read-modify-write
//!   conditioned on the revision tag observed at read time
//! - **Reviewable output**: each change lands as a pull request with
//!   deterministic branch names, titles, and bodies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluegreen_orchestrator::{
//!     GitHubConfig, GitHubStore, Operation, ReleaseOrchestrator, RepoId, Target,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = GitHubStore::new(GitHubConfig::from_env()?)?;
//!     let orchestrator =
//!         ReleaseOrchestrator::new(Arc::new(store), RepoId::new("acme", "deploys"));
//!
//!     let change = orchestrator
//!         .propose_change(
//!             &Operation::AutoFlip { turn_off_standby_switch: false },
//!             &Target {
//!                 app: "checkout".into(),
//!                 env: "prod-us".into(),
//!                 values_path: "apps/checkout/values-prod-us.yaml".into(),
//!             },
//!             None,
//!         )
//!         .await?;
//!     println!("PR: {}", change.pull_request.url);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod inspect;
pub mod mutation;
pub mod orchestrator;
pub mod server;
pub mod slot;
pub mod store;

// Re-export main types for library consumers
pub use config::ConfigDocument;
pub use error::{Error, Result, RetryPolicy};
pub use mutation::{flip_active, set_switch, set_version, SwitchState};
pub use orchestrator::{
    Operation, PollPolicy, ProposedChange, ReleaseOrchestrator, RunLookup, SlotReport, Target,
    UpdateTarget,
};
pub use slot::{detect_active_slot, Slot};
pub use store::{DocumentStore, GitHubConfig, GitHubStore, PullRequest, RepoId, RunSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
