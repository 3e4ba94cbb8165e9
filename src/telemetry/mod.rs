//! Run/phase ledger plus resource sampling.
//!
//! Every pipeline execution opens a [`ProcessingRun`] row, and each phase
//! within it closes with a [`PhaseStat`] row carrying timing, item counts
//! and sampled CPU/RAM of registered external processes. Telemetry is
//! diagnostic only: a write failure here is logged and swallowed, never
//! surfaced to the pipeline.

pub mod sampler;

pub use sampler::{ResourceSampler, ResourceUsage};

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{PhaseOutcome, PhaseStat, ProcessingRun, ProcessingStep, RunStatus, RunType};
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Item counts for one phase. Phases that do not fan out over items report
/// zeros.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemCounts {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
}

impl ItemCounts {
    pub fn all_succeeded(total: usize) -> Self {
        Self {
            total: total as i64,
            succeeded: total as i64,
            failed: 0,
        }
    }

    pub fn partial(total: usize, failed: usize) -> Self {
        Self {
            total: total as i64,
            succeeded: (total - failed) as i64,
            failed: failed as i64,
        }
    }
}

/// Open phase window: timing started, resource sampling running.
/// Close it with [`Telemetry::phase_finished`].
pub struct PhaseWindow {
    run_id: String,
    step: ProcessingStep,
    started_at: chrono::DateTime<Utc>,
    sampler_cancel: CancellationToken,
    sampler_window: JoinHandle<Option<ResourceUsage>>,
}

/// Records runs and phase stats through the database worker. Cloning is
/// cheap; clones share the sampler's tracked-process registry.
#[derive(Clone)]
pub struct Telemetry {
    db: Database,
    sampler: ResourceSampler,
}

impl Telemetry {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            sampler: ResourceSampler::new(),
        }
    }

    pub fn sampler(&self) -> &ResourceSampler {
        &self.sampler
    }

    pub async fn run_started(&self, recording_id: &str, run_type: RunType) -> Result<ProcessingRun> {
        let run = ProcessingRun {
            id: Uuid::new_v4().to_string(),
            recording_id: recording_id.to_string(),
            run_type,
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
        };
        self.db.insert_processing_run(&run).await?;
        log_info!(
            "run {} started for recording {} ({})",
            run.id,
            recording_id,
            run_type.as_str()
        );
        Ok(run)
    }

    pub async fn run_finished(&self, run: &ProcessingRun, status: RunStatus) {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - run.started_at).num_milliseconds();
        if let Err(err) = self
            .db
            .finish_processing_run(&run.id, status, ended_at, duration_ms)
            .await
        {
            log_warn!("failed to record run outcome for {}: {err:#}", run.id);
            return;
        }
        log_info!(
            "run {} finished {} in {}ms",
            run.id,
            status.as_str(),
            duration_ms
        );
    }

    /// Open a phase window and start sampling tracked processes.
    pub fn phase_started(&self, run_id: &str, step: ProcessingStep) -> PhaseWindow {
        let sampler_cancel = CancellationToken::new();
        let sampler_window = self.sampler.begin_window(sampler_cancel.clone());
        log_info!("phase {} started (run {run_id})", step.as_str());
        PhaseWindow {
            run_id: run_id.to_string(),
            step,
            started_at: Utc::now(),
            sampler_cancel,
            sampler_window,
        }
    }

    /// Close a phase window: stop sampling, persist the stat row.
    pub async fn phase_finished(
        &self,
        window: PhaseWindow,
        outcome: PhaseOutcome,
        counts: ItemCounts,
    ) {
        window.sampler_cancel.cancel();
        let usage = match window.sampler_window.await {
            Ok(usage) => usage,
            Err(err) => {
                log_warn!("resource sampler task failed: {err}");
                None
            }
        };

        let ended_at = Utc::now();
        let stat = PhaseStat {
            id: Uuid::new_v4().to_string(),
            run_id: window.run_id.clone(),
            step: window.step,
            outcome,
            started_at: window.started_at,
            ended_at,
            duration_ms: (ended_at - window.started_at).num_milliseconds(),
            items_total: counts.total,
            items_succeeded: counts.succeeded,
            items_failed: counts.failed,
            peak_cpu_percent: usage.map(|u| u.peak_cpu_percent),
            avg_cpu_percent: usage.map(|u| u.avg_cpu_percent),
            peak_memory_mb: usage.map(|u| u.peak_memory_mb),
            avg_memory_mb: usage.map(|u| u.avg_memory_mb),
        };

        if let Err(err) = self.db.insert_phase_stat(&stat).await {
            log_warn!(
                "failed to record phase stat {} for run {}: {err:#}",
                window.step.as_str(),
                window.run_id
            );
            return;
        }
        log_info!(
            "phase {} {} in {}ms ({}/{} items ok)",
            window.step.as_str(),
            outcome.as_str(),
            stat.duration_ms,
            stat.items_succeeded,
            stat.items_total
        );
    }

    /// Record a phase that was skipped on resume, without opening a window.
    pub async fn phase_skipped(&self, run_id: &str, step: ProcessingStep) {
        let now = Utc::now();
        let stat = PhaseStat {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            step,
            outcome: PhaseOutcome::Skipped,
            started_at: now,
            ended_at: now,
            duration_ms: 0,
            items_total: 0,
            items_succeeded: 0,
            items_failed: 0,
            peak_cpu_percent: None,
            avg_cpu_percent: None,
            peak_memory_mb: None,
            avg_memory_mb: None,
        };
        if let Err(err) = self.db.insert_phase_stat(&stat).await {
            log_warn!(
                "failed to record skipped phase {} for run {run_id}: {err:#}",
                step.as_str()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Recording, RecordingStatus};

    fn temp_db() -> Database {
        let path = std::env::temp_dir().join(format!("desklog-test-{}.db", Uuid::new_v4()));
        Database::new(path).unwrap()
    }

    async fn seed_recording(db: &Database, id: &str) {
        let now = Utc::now();
        db.insert_recording(&Recording {
            id: id.to_string(),
            status: RecordingStatus::Raw,
            processing_step: None,
            error_message: None,
            video_path: None,
            mic_audio_path: Some("/tmp/mic.wav".to_string()),
            system_audio_path: None,
            duration_secs: 60,
            captured_at: now,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_lifecycle_is_persisted() {
        let db = temp_db();
        let telemetry = Telemetry::new(db.clone());
        seed_recording(&db, "rec-1").await;

        let run = telemetry.run_started("rec-1", RunType::Initial).await.unwrap();
        telemetry.run_finished(&run, RunStatus::Completed).await;

        let runs = db.get_runs_for_recording("rec-1").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert!(runs[0].ended_at.is_some());
        assert!(runs[0].duration_ms.is_some());
    }

    #[tokio::test]
    async fn phase_window_records_counts_and_outcome() {
        let db = temp_db();
        let telemetry = Telemetry::new(db.clone());
        seed_recording(&db, "rec-2").await;
        let run = telemetry.run_started("rec-2", RunType::Initial).await.unwrap();

        let window = telemetry.phase_started(&run.id, ProcessingStep::Transcription);
        telemetry
            .phase_finished(window, PhaseOutcome::Success, ItemCounts::partial(5, 1))
            .await;

        let stats = db.get_phase_stats_for_run(&run.id).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].step, ProcessingStep::Transcription);
        assert_eq!(stats[0].outcome, PhaseOutcome::Success);
        assert_eq!(stats[0].items_total, 5);
        assert_eq!(stats[0].items_succeeded, 4);
        assert_eq!(stats[0].items_failed, 1);
        // Nothing registered with the sampler, so resource columns stay null
        assert_eq!(stats[0].peak_cpu_percent, None);
    }

    #[tokio::test]
    async fn skipped_phases_get_zeroed_rows() {
        let db = temp_db();
        let telemetry = Telemetry::new(db.clone());
        seed_recording(&db, "rec-3").await;
        let run = telemetry.run_started("rec-3", RunType::Resume).await.unwrap();

        telemetry.phase_skipped(&run.id, ProcessingStep::Vad).await;

        let stats = db.get_phase_stats_for_run(&run.id).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].outcome, PhaseOutcome::Skipped);
        assert_eq!(stats[0].duration_ms, 0);
        assert_eq!(stats[0].items_total, 0);
    }
}
