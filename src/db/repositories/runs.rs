use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime},
};
use crate::models::{PhaseOutcome, PhaseStat, ProcessingRun, ProcessingStep, RunStatus, RunType};

fn row_to_run(row: &Row) -> Result<ProcessingRun> {
    let run_type: String = row.get("run_type")?;
    let status: String = row.get("status")?;
    let started_at: String = row.get("started_at")?;

    Ok(ProcessingRun {
        id: row.get("id")?,
        recording_id: row.get("recording_id")?,
        run_type: RunType::parse(&run_type)?,
        status: RunStatus::parse(&status)?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(row.get("ended_at")?, "ended_at")?,
        duration_ms: row.get("duration_ms")?,
    })
}

fn row_to_phase_stat(row: &Row) -> Result<PhaseStat> {
    let step: String = row.get("step")?;
    let outcome: String = row.get("outcome")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: String = row.get("ended_at")?;

    Ok(PhaseStat {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        step: ProcessingStep::parse(&step)?,
        outcome: PhaseOutcome::parse(&outcome)?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_datetime(&ended_at, "ended_at")?,
        duration_ms: row.get("duration_ms")?,
        items_total: row.get("items_total")?,
        items_succeeded: row.get("items_succeeded")?,
        items_failed: row.get("items_failed")?,
        peak_cpu_percent: row.get("peak_cpu_percent")?,
        avg_cpu_percent: row.get("avg_cpu_percent")?,
        peak_memory_mb: row.get("peak_memory_mb")?,
        avg_memory_mb: row.get("avg_memory_mb")?,
    })
}

impl Database {
    pub async fn insert_processing_run(&self, run: &ProcessingRun) -> Result<()> {
        let record = run.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO processing_runs (
                    id, recording_id, run_type, status, started_at, ended_at,
                    duration_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.recording_id,
                    record.run_type.as_str(),
                    record.status.as_str(),
                    record.started_at.to_rfc3339(),
                    record.ended_at.map(|dt| dt.to_rfc3339()),
                    record.duration_ms,
                ],
            )
            .with_context(|| "failed to insert processing run")?;
            Ok(())
        })
        .await
    }

    pub async fn finish_processing_run(
        &self,
        run_id: &str,
        status: RunStatus,
        ended_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<()> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE processing_runs
                 SET status = ?1, ended_at = ?2, duration_ms = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    ended_at.to_rfc3339(),
                    duration_ms,
                    run_id,
                ],
            )
            .with_context(|| "failed to finish processing run")?;
            Ok(())
        })
        .await
    }

    pub async fn insert_phase_stat(&self, stat: &PhaseStat) -> Result<()> {
        let record = stat.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO phase_stats (
                    id, run_id, step, outcome, started_at, ended_at, duration_ms,
                    items_total, items_succeeded, items_failed,
                    peak_cpu_percent, avg_cpu_percent, peak_memory_mb, avg_memory_mb
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id,
                    record.run_id,
                    record.step.as_str(),
                    record.outcome.as_str(),
                    record.started_at.to_rfc3339(),
                    record.ended_at.to_rfc3339(),
                    record.duration_ms,
                    record.items_total,
                    record.items_succeeded,
                    record.items_failed,
                    record.peak_cpu_percent,
                    record.avg_cpu_percent,
                    record.peak_memory_mb,
                    record.avg_memory_mb,
                ],
            )
            .with_context(|| "failed to insert phase stat")?;
            Ok(())
        })
        .await
    }

    pub async fn get_runs_for_recording(&self, recording_id: &str) -> Result<Vec<ProcessingRun>> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recording_id, run_type, status, started_at, ended_at,
                        duration_ms
                 FROM processing_runs
                 WHERE recording_id = ?1
                 ORDER BY started_at ASC",
            )?;

            let mut rows = stmt.query(params![recording_id])?;
            let mut runs = Vec::new();
            while let Some(row) = rows.next()? {
                runs.push(row_to_run(row)?);
            }
            Ok(runs)
        })
        .await
    }

    pub async fn get_phase_stats_for_run(&self, run_id: &str) -> Result<Vec<PhaseStat>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, step, outcome, started_at, ended_at, duration_ms,
                        items_total, items_succeeded, items_failed,
                        peak_cpu_percent, avg_cpu_percent, peak_memory_mb, avg_memory_mb
                 FROM phase_stats
                 WHERE run_id = ?1
                 ORDER BY started_at ASC",
            )?;

            let mut rows = stmt.query(params![run_id])?;
            let mut stats = Vec::new();
            while let Some(row) = rows.next()? {
                stats.push(row_to_phase_stat(row)?);
            }
            Ok(stats)
        })
        .await
    }
}
