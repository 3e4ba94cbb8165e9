use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::recording::ProcessingStep;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Initial,
    Resume,
    Force,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Initial => "initial",
            RunType::Resume => "resume",
            RunType::Force => "force",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "initial" => Ok(RunType::Initial),
            "resume" => Ok(RunType::Resume),
            "force" => Ok(RunType::Force),
            other => Err(anyhow!("unknown run type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(anyhow!("unknown run status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseOutcome {
    Success,
    Skipped,
    Failed,
    Cancelled,
}

impl PhaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseOutcome::Success => "success",
            PhaseOutcome::Skipped => "skipped",
            PhaseOutcome::Failed => "failed",
            PhaseOutcome::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "success" => Ok(PhaseOutcome::Success),
            "skipped" => Ok(PhaseOutcome::Skipped),
            "failed" => Ok(PhaseOutcome::Failed),
            "cancelled" => Ok(PhaseOutcome::Cancelled),
            other => Err(anyhow!("unknown phase outcome '{other}'")),
        }
    }
}

/// Append-only record of one pipeline execution against one recording.
/// Diagnostic only: runs never drive business logic and may be dropped
/// without affecting processing correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRun {
    pub id: String,
    pub recording_id: String,
    pub run_type: RunType,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Timing, outcome and item counts for one phase within a run, plus the
/// resource peaks sampled from registered external processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStat {
    pub id: String,
    pub run_id: String,
    pub step: ProcessingStep,
    pub outcome: PhaseOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub items_total: i64,
    pub items_succeeded: i64,
    pub items_failed: i64,
    pub peak_cpu_percent: Option<f64>,
    pub avg_cpu_percent: Option<f64>,
    pub peak_memory_mb: Option<f64>,
    pub avg_memory_mb: Option<f64>,
}
