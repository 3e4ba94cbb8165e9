use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{connection::Database, helpers::parse_datetime};
use crate::models::{ProcessingStep, Recording, RecordingStatus};

fn row_to_recording(row: &Row) -> Result<Recording> {
    let captured_at: String = row.get("captured_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let status: String = row.get("status")?;
    let step: Option<String> = row.get("processing_step")?;

    Ok(Recording {
        id: row.get("id")?,
        status: RecordingStatus::parse(&status)?,
        processing_step: step.as_deref().map(ProcessingStep::parse).transpose()?,
        error_message: row.get("error_message")?,
        video_path: row.get("video_path")?,
        mic_audio_path: row.get("mic_audio_path")?,
        system_audio_path: row.get("system_audio_path")?,
        duration_secs: row.get("duration_secs")?,
        captured_at: parse_datetime(&captured_at, "captured_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_recording(&self, recording: &Recording) -> Result<()> {
        let record = recording.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO recordings (
                    id, status, processing_step, error_message,
                    video_path, mic_audio_path, system_audio_path,
                    duration_secs, captured_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.status.as_str(),
                    record.processing_step.map(|s| s.as_str()),
                    record.error_message,
                    record.video_path,
                    record.mic_audio_path,
                    record.system_audio_path,
                    record.duration_secs,
                    record.captured_at.to_rfc3339(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert recording")?;
            Ok(())
        })
        .await
    }

    pub async fn get_recording(&self, recording_id: &str) -> Result<Option<Recording>> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, status, processing_step, error_message,
                        video_path, mic_audio_path, system_audio_path,
                        duration_secs, captured_at, created_at, updated_at
                 FROM recordings
                 WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![recording_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_recording(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Persist the outcome of a state-machine transition. This is the single
    /// write per transition that makes the row the durable resume point.
    pub async fn update_recording_state(&self, recording: &Recording) -> Result<()> {
        let record = recording.clone();
        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE recordings
                     SET status = ?1,
                         processing_step = ?2,
                         error_message = ?3,
                         updated_at = ?4
                     WHERE id = ?5",
                    params![
                        record.status.as_str(),
                        record.processing_step.map(|s| s.as_str()),
                        record.error_message,
                        record.updated_at.to_rfc3339(),
                        record.id,
                    ],
                )
                .with_context(|| "failed to update recording state")?;
            anyhow::ensure!(updated == 1, "recording {} not found", record.id);
            Ok(())
        })
        .await
    }

    pub async fn recording_exists(&self, recording_id: &str) -> Result<bool> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM recordings WHERE id = ?1",
                    params![recording_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }
}
