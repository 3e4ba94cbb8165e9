use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{from_optional_json_column, parse_datetime, to_json_column},
};
use crate::models::{
    AudioKind, AudioObservation, AudioSource, Modality, Observation, VisualObservation,
};

fn row_to_observation(row: &Row) -> Result<Observation> {
    let modality: String = row.get("modality")?;
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;

    match Modality::parse(&modality)? {
        Modality::Audio => {
            let source: String = row
                .get::<_, Option<String>>("audio_source")?
                .ok_or_else(|| anyhow!("audio observation row missing audio_source"))?;
            let kind: String = row
                .get::<_, Option<String>>("audio_kind")?
                .ok_or_else(|| anyhow!("audio observation row missing audio_kind"))?;
            Ok(Observation::Audio(AudioObservation {
                id: row.get("id")?,
                recording_id: row.get("recording_id")?,
                source: AudioSource::parse(&source)?,
                kind: AudioKind::parse(&kind)?,
                start_time: parse_datetime(&start_time, "start_time")?,
                end_time: parse_datetime(&end_time, "end_time")?,
                text: row.get::<_, Option<String>>("text")?.unwrap_or_default(),
            }))
        }
        Modality::Visual => Ok(Observation::Visual(VisualObservation {
            id: row.get("id")?,
            recording_id: row.get("recording_id")?,
            timestamp: parse_datetime(&start_time, "start_time")?,
            image_path: row
                .get::<_, Option<String>>("image_path")?
                .ok_or_else(|| anyhow!("visual observation row missing image_path"))?,
            ocr_text: row.get("ocr_text")?,
            vlm_description: row.get("vlm_description")?,
            embedding: from_optional_json_column(row.get("embedding_json")?, "embedding_json")?,
        })),
    }
}

impl Database {
    /// Atomic batch insert: either every observation in the slice becomes
    /// visible or none of them do.
    pub async fn insert_observations(&self, observations: &[Observation]) -> Result<()> {
        let observations = observations.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            for observation in &observations {
                match observation {
                    Observation::Audio(o) => {
                        tx.execute(
                            "INSERT INTO observations (
                                id, recording_id, modality, start_time, end_time,
                                audio_source, audio_kind, text
                            ) VALUES (?1, ?2, 'audio', ?3, ?4, ?5, ?6, ?7)",
                            params![
                                o.id,
                                o.recording_id,
                                o.start_time.to_rfc3339(),
                                o.end_time.to_rfc3339(),
                                o.source.as_str(),
                                o.kind.as_str(),
                                o.text,
                            ],
                        )?;
                    }
                    Observation::Visual(o) => {
                        let embedding_json = o
                            .embedding
                            .as_ref()
                            .map(|e| to_json_column(e, "embedding_json"))
                            .transpose()?;
                        tx.execute(
                            "INSERT INTO observations (
                                id, recording_id, modality, start_time, end_time,
                                image_path, ocr_text, vlm_description, embedding_json
                            ) VALUES (?1, ?2, 'visual', ?3, ?4, ?5, ?6, ?7, ?8)",
                            params![
                                o.id,
                                o.recording_id,
                                o.timestamp.to_rfc3339(),
                                o.timestamp.to_rfc3339(),
                                o.image_path,
                                o.ocr_text,
                                o.vlm_description,
                                embedding_json,
                            ],
                        )?;
                    }
                }
            }

            tx.commit().with_context(|| "failed to commit observation batch")?;
            Ok(())
        })
        .await
    }

    pub async fn get_observations_for_recording(
        &self,
        recording_id: &str,
    ) -> Result<Vec<Observation>> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recording_id, modality, start_time, end_time,
                        audio_source, audio_kind, text,
                        image_path, ocr_text, vlm_description, embedding_json
                 FROM observations
                 WHERE recording_id = ?1
                 ORDER BY start_time ASC",
            )?;

            let mut rows = stmt.query(params![recording_id])?;
            let mut observations = Vec::new();
            while let Some(row) = rows.next()? {
                observations.push(row_to_observation(row)?);
            }
            Ok(observations)
        })
        .await
    }

    pub async fn count_observations(
        &self,
        recording_id: &str,
        modality: Modality,
    ) -> Result<i64> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM observations
                 WHERE recording_id = ?1 AND modality = ?2",
                params![recording_id, modality.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    /// Drop one modality's observations so a re-run phase can rebuild its
    /// batch from scratch without duplicating rows.
    pub async fn delete_observations_by_modality(
        &self,
        recording_id: &str,
        modality: Modality,
    ) -> Result<usize> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM observations WHERE recording_id = ?1 AND modality = ?2",
                    params![recording_id, modality.as_str()],
                )
                .with_context(|| "failed to delete observations by modality")?;
            Ok(deleted)
        })
        .await
    }

    pub async fn delete_observations_for_recording(&self, recording_id: &str) -> Result<usize> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM observations WHERE recording_id = ?1",
                    params![recording_id],
                )
                .with_context(|| "failed to delete observations")?;
            Ok(deleted)
        })
        .await
    }

    /// Whole-source transcript reconstructed from persisted audio
    /// observations, in timeline order.
    pub async fn transcript_text(
        &self,
        recording_id: &str,
        source: Option<AudioSource>,
    ) -> Result<String> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let mut texts: Vec<String> = Vec::new();
            match source {
                Some(source) => {
                    let mut stmt = conn.prepare(
                        "SELECT text FROM observations
                         WHERE recording_id = ?1 AND modality = 'audio' AND audio_source = ?2
                         ORDER BY start_time ASC",
                    )?;
                    let mut rows = stmt.query(params![recording_id, source.as_str()])?;
                    while let Some(row) = rows.next()? {
                        if let Some(text) = row.get::<_, Option<String>>(0)? {
                            texts.push(text);
                        }
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT text FROM observations
                         WHERE recording_id = ?1 AND modality = 'audio'
                         ORDER BY start_time ASC",
                    )?;
                    let mut rows = stmt.query(params![recording_id])?;
                    while let Some(row) = rows.next()? {
                        if let Some(text) = row.get::<_, Option<String>>(0)? {
                            texts.push(text);
                        }
                    }
                }
            }
            Ok(texts.join(" "))
        })
        .await
    }
}
