//! Pipeline-health collaborator interface
//!
//! The health dashboard reads pipeline jobs, metrics, and logs, and asks a
//! text model for a summary. That whole feature is an external collaborator
//! of the release core: this module only fixes the interface — the data
//! shapes, the two traits, and the deterministic prompt both sides agree
//! on. Concrete backends (the pipeline API, the model API) live outside
//! this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One pipeline job as listed by the inspector backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub job_type: Option<String>,
    pub state: Option<String>,
    pub region: Option<String>,
    pub create_time: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// One metric update of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricUpdate {
    pub name: String,
    pub kind: Option<String>,
    pub scalar: Option<f64>,
    pub update_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

impl LogSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            LogSeverity::Info => "INFO",
            LogSeverity::Warning => "WARNING",
            LogSeverity::Error => "ERROR",
        }
    }
}

/// One log line or job message, normalized to a common shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Option<String>,
    pub severity: LogSeverity,
    pub message: String,
}

/// Read-only job inspection backend.
#[async_trait]
pub trait JobInspector: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<JobInfo>>;
    async fn get_metrics(&self, job_id: &str) -> Result<Vec<MetricUpdate>>;
    async fn get_logs(&self, job_id: &str) -> Result<Vec<LogEntry>>;
}

/// Text-generation backend. The request/response wire shape is the
/// implementation's business; the core only supplies the prompt text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, system: &str, prompt: &str) -> Result<String>;
}

/// System instruction for health summaries.
pub const HEALTH_SYSTEM_PROMPT: &str = "You are a data-pipeline reliability assistant. \
Given a job summary, metrics and recent error logs, produce a concise health summary with: \
1) Current status & likely cause, 2) Impact (if any), \
3) Top 3 next steps with concrete console or CLI paths, \
4) If healthy, recommended validations.";

const MAX_METRICS: usize = 30;
const MAX_LOG_LINES: usize = 10;

/// Deterministic user prompt: job core fields, truncated metrics, the most
/// recent log lines, and an optional output-validation note.
pub fn health_prompt(
    job: &JobInfo,
    metrics: &[MetricUpdate],
    logs: &[LogEntry],
    validation_note: Option<&str>,
) -> String {
    let job_json = serde_json::to_string_pretty(job).unwrap_or_default();
    let metrics_json =
        serde_json::to_string_pretty(&metrics[..metrics.len().min(MAX_METRICS)]).unwrap_or_default();
    let log_lines: Vec<String> = logs
        .iter()
        .take(MAX_LOG_LINES)
        .map(|entry| {
            format!(
                "{} [{}]: {}",
                entry.timestamp.as_deref().unwrap_or(""),
                entry.severity.as_str(),
                entry.message
            )
        })
        .collect();
    let logs_json = serde_json::to_string_pretty(&log_lines).unwrap_or_default();

    let mut prompt = format!(
        "JOB:\n{job_json}\n\nMETRICS (truncated):\n{metrics_json}\n\nRECENT LOGS (up to {MAX_LOG_LINES}):\n{logs_json}\n"
    );
    if let Some(note) = validation_note {
        prompt.push_str(&format!("\nOUTPUT VALIDATION CONTEXT:\n{note}\n"));
    }
    prompt
}

/// Fetch a job's metrics and logs and ask the summarizer for a health
/// report.
pub async fn summarize_job(
    inspector: &dyn JobInspector,
    summarizer: &dyn Summarizer,
    job: &JobInfo,
    validation_note: Option<&str>,
) -> Result<String> {
    let metrics = inspector.get_metrics(&job.id).await?;
    let logs = inspector.get_logs(&job.id).await?;
    let prompt = health_prompt(job, &metrics, &logs, validation_note);
    summarizer.summarize(HEALTH_SYSTEM_PROMPT, &prompt).await
}
