use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use bluegreen_orchestrator::{
    orchestrator::{PollPolicy, RunLookup, UpdateTarget},
    server, store, GitHubConfig, GitHubStore, Operation, ReleaseOrchestrator, RepoId, Slot, Target,
};
use clap::{Parser, Subcommand};
use colored::*;

#[derive(Parser)]
#[command(name = "bluegreen")]
#[command(
    about = "Blue/green release orchestrator: inspect slot state, bump versions, flip active slots, and open review-ready pull requests",
    version
)]
#[command(after_help = "Environment:
  GITHUB_TOKEN    token with contents, pull-requests and workflow scopes (required)
  GITHUB_OWNER    default repository owner/org
  GITHUB_REPO     default repository name
  GITHUB_BRANCH   default base branch (falls back to the repo default branch)
  GITHUB_API_URL  API base URL for GitHub Enterprise

Every mutating command creates its own branch from the base ref and opens a
pull request; nothing is pushed to the base branch directly.")]
struct Cli {
    /// Repository owner/org (defaults to GITHUB_OWNER)
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Repository name (defaults to GITHUB_REPO)
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Base ref to read from (defaults to GITHUB_BRANCH, then the repo default)
    #[arg(long = "ref", global = true, value_name = "BRANCH")]
    base_ref: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active/standby slots and versions of a values file
    Show {
        /// Values file path inside the repository
        #[arg(short, long)]
        path: String,
    },

    /// Propose a version update for one slot and open a PR
    Bump {
        /// Version to set
        version: String,

        /// Explicit slot to update; overrides --target
        #[arg(long)]
        slot: Option<Slot>,

        /// Update the primary (active) or standby slot
        #[arg(long, value_enum, default_value = "standby")]
        target: TargetChoice,

        /// App label woven into branch names and PR text
        #[arg(short, long)]
        app: String,

        /// Environment label, e.g. dev-us
        #[arg(short, long)]
        env: String,

        /// Values file path inside the repository
        #[arg(short, long)]
        path: String,
    },

    /// Propose flipping the active slot and open a PR
    Flip {
        /// Also force the new standby's traffic switch off
        #[arg(long)]
        turn_off_standby: bool,

        #[arg(short, long)]
        app: String,

        #[arg(short, long)]
        env: String,

        #[arg(short, long)]
        path: String,
    },

    /// List app folders under a base path
    Apps {
        #[arg(long, default_value = "apps")]
        base_path: String,
    },

    /// List values files of one app folder
    Values {
        app: String,

        #[arg(long, default_value = "apps")]
        base_path: String,
    },

    /// Trigger a workflow file with string inputs
    Dispatch {
        /// Workflow file name under .github/workflows/
        workflow: String,

        /// Inputs as a JSON object of strings
        #[arg(long, default_value = "{}")]
        inputs: String,
    },

    /// List recent runs of a workflow
    Runs {
        workflow: String,

        #[arg(long)]
        branch: Option<String>,

        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Poll until a completed run is observed (bounded wait)
        #[arg(long)]
        wait: bool,

        /// Scan the completed run's job logs for a pull-request link
        #[arg(long)]
        pr_link: bool,
    },

    /// Start the HTTP surface for dashboard UIs
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum TargetChoice {
    Primary,
    Standby,
}

impl From<TargetChoice> for UpdateTarget {
    fn from(choice: TargetChoice) -> Self {
        match choice {
            TargetChoice::Primary => UpdateTarget::Primary,
            TargetChoice::Standby => UpdateTarget::Standby,
        }
    }
}

fn repo_id(cli: &Cli) -> Result<RepoId> {
    let owner = cli
        .owner
        .clone()
        .or_else(|| std::env::var("GITHUB_OWNER").ok())
        .context("repository owner not set (--owner or GITHUB_OWNER)")?;
    let repo = cli
        .repo
        .clone()
        .or_else(|| std::env::var("GITHUB_REPO").ok())
        .context("repository name not set (--repo or GITHUB_REPO)")?;
    Ok(RepoId::new(owner, repo))
}

fn base_ref(cli: &Cli) -> Option<String> {
    cli.base_ref
        .clone()
        .or_else(|| std::env::var("GITHUB_BRANCH").ok())
        .filter(|r| !r.trim().is_empty())
}

fn orchestrator(cli: &Cli) -> Result<Arc<ReleaseOrchestrator>> {
    let store = GitHubStore::new(GitHubConfig::from_env()?)?;
    Ok(Arc::new(ReleaseOrchestrator::new(
        Arc::new(store),
        repo_id(cli)?,
    )))
}

fn print_change(change: &bluegreen_orchestrator::ProposedChange) {
    println!("{} Pull request created", "✓".green());
    println!("  Branch: {}", change.branch.bright_yellow());
    println!(
        "  PR:     {} {}",
        change.pull_request.title.bright_white(),
        change.pull_request.url.bright_blue()
    );
    if let Some(active) = change.new_active {
        println!("  Active: {}", active.to_string().bright_cyan());
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base = base_ref(&cli);

    match &cli.command {
        Commands::Show { path } => {
            let orch = orchestrator(&cli)?;
            let report = orch.slot_report(path, base.as_deref()).await?;
            println!("{}", "Slot state".cyan().bold());
            println!(
                "  Active:  {}",
                report.active.to_string().bright_green().bold()
            );
            println!("  Standby: {}", report.standby.to_string().bright_black());
            println!(
                "  Blue version:  {}",
                report.blue_version.as_deref().unwrap_or("-").bright_white()
            );
            println!(
                "  Green version: {}",
                report
                    .green_version
                    .as_deref()
                    .unwrap_or("-")
                    .bright_white()
            );
        }

        Commands::Bump {
            version,
            slot,
            target,
            app,
            env,
            path,
        } => {
            let orch = orchestrator(&cli)?;
            let slot = match slot {
                Some(slot) => *slot,
                None => {
                    let report = orch.slot_report(path, base.as_deref()).await?;
                    UpdateTarget::from(*target).resolve(report.active)
                }
            };
            println!(
                "{}",
                format!("Proposing {} version {} for {}...", slot, version, app)
                    .cyan()
                    .bold()
            );

            let op = Operation::VersionUpdate {
                slot,
                version: version.clone(),
            };
            let change = orch
                .propose_change(
                    &op,
                    &Target {
                        app: app.clone(),
                        env: env.clone(),
                        values_path: path.clone(),
                    },
                    base.as_deref(),
                )
                .await?;
            print_change(&change);
        }

        Commands::Flip {
            turn_off_standby,
            app,
            env,
            path,
        } => {
            let orch = orchestrator(&cli)?;
            println!(
                "{}",
                format!("Proposing auto-flip for {}...", app).cyan().bold()
            );

            let op = Operation::AutoFlip {
                turn_off_standby_switch: *turn_off_standby,
            };
            let change = orch
                .propose_change(
                    &op,
                    &Target {
                        app: app.clone(),
                        env: env.clone(),
                        values_path: path.clone(),
                    },
                    base.as_deref(),
                )
                .await?;
            print_change(&change);
        }

        Commands::Apps { base_path } => {
            let orch = orchestrator(&cli)?;
            let r#ref = orch.base_ref(base.as_deref()).await?;
            let apps = store::list_apps(orch.store().as_ref(), orch.repo(), base_path, &r#ref).await?;
            if apps.is_empty() {
                println!("{}", "No app folders found.".yellow());
            }
            for app in apps {
                println!("{} {}", "●".bright_green(), app.bright_white());
            }
        }

        Commands::Values { app, base_path } => {
            let orch = orchestrator(&cli)?;
            let r#ref = orch.base_ref(base.as_deref()).await?;
            let files =
                store::list_value_files(orch.store().as_ref(), orch.repo(), base_path, app, &r#ref)
                    .await?;
            if files.is_empty() {
                println!("{}", "No values files found.".yellow());
            }
            for file in files {
                println!("{} {}/{}/{}", "●".bright_green(), base_path, app, file);
            }
        }

        Commands::Dispatch { workflow, inputs } => {
            let orch = orchestrator(&cli)?;
            let inputs: HashMap<String, String> =
                serde_json::from_str(inputs).context("inputs must be a JSON object of strings")?;
            let r#ref = orch.base_ref(base.as_deref()).await?;
            orch.dispatch(workflow, &r#ref, &inputs).await?;
            println!(
                "{} Workflow {} dispatched on {}",
                "✓".green(),
                workflow.bright_white(),
                r#ref.bright_yellow()
            );
        }

        Commands::Runs {
            workflow,
            branch,
            limit,
            wait,
            pr_link,
        } => {
            let orch = orchestrator(&cli)?;

            let completed = if *wait {
                println!("{}", "Waiting for a completed run...".cyan());
                match orch
                    .wait_for_run(workflow, branch.as_deref(), &PollPolicy::default())
                    .await?
                {
                    RunLookup::Found(run) => Some(run),
                    RunLookup::TimedOut => {
                        println!("{}", "No completed run observed yet.".yellow());
                        None
                    }
                }
            } else {
                None
            };

            let runs = orch.runs(workflow, branch.as_deref(), *limit).await?;
            println!("{}", "Workflow runs".cyan().bold());
            for run in &runs {
                let conclusion = run.conclusion.as_deref().unwrap_or("-");
                println!(
                    "  {} {} {} {}",
                    format!("#{}", run.id).bright_black(),
                    run.status.bright_white(),
                    conclusion.bright_yellow(),
                    run.url.bright_blue()
                );
            }

            if *pr_link {
                if let Some(run) = completed.or_else(|| runs.first().cloned()) {
                    match orch.find_pr_link(run.id).await? {
                        Some(url) => {
                            println!("{} PR created: {}", "✓".green(), url.bright_blue())
                        }
                        None => println!(
                            "{}",
                            "No PR link found in run logs yet; it may appear after logs finish uploading.".yellow()
                        ),
                    }
                }
            }
        }

        Commands::Serve { port } => {
            let orch = orchestrator(&cli)?;
            println!(
                "{}",
                format!("Starting orchestrator API on port {}...", port)
                    .cyan()
                    .bold()
            );
            server::start(*port, orch).await?;
        }
    }

    Ok(())
}
