use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{from_json_column, to_json_column},
};
use crate::models::TopicBlock;

fn row_to_topic_block(row: &Row) -> Result<TopicBlock> {
    let context_ids: String = row.get("context_ids_json")?;
    let classification: String = row.get("classification_json")?;

    Ok(TopicBlock {
        id: row.get("id")?,
        recording_id: row.get("recording_id")?,
        context_ids: from_json_column(&context_ids, "context_ids_json")?,
        classification: from_json_column(&classification, "classification_json")?,
        duration_secs: row.get("duration_secs")?,
    })
}

impl Database {
    /// Batch insert blocks for one recording; all-or-nothing.
    pub async fn insert_topic_blocks(&self, blocks: &[TopicBlock]) -> Result<()> {
        let blocks = blocks.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for block in &blocks {
                tx.execute(
                    "INSERT INTO topic_blocks (
                        id, recording_id, context_ids_json, classification_json,
                        duration_secs
                    ) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        block.id,
                        block.recording_id,
                        to_json_column(&block.context_ids, "context_ids_json")?,
                        to_json_column(&block.classification, "classification_json")?,
                        block.duration_secs,
                    ],
                )?;
            }
            tx.commit().with_context(|| "failed to commit topic blocks")?;
            Ok(())
        })
        .await
    }

    pub async fn get_topic_blocks_for_recording(
        &self,
        recording_id: &str,
    ) -> Result<Vec<TopicBlock>> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recording_id, context_ids_json, classification_json,
                        duration_secs
                 FROM topic_blocks
                 WHERE recording_id = ?1",
            )?;

            let mut rows = stmt.query(params![recording_id])?;
            let mut blocks = Vec::new();
            while let Some(row) = rows.next()? {
                blocks.push(row_to_topic_block(row)?);
            }
            Ok(blocks)
        })
        .await
    }

    pub async fn delete_topic_blocks_for_recording(&self, recording_id: &str) -> Result<usize> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM topic_blocks WHERE recording_id = ?1",
                    params![recording_id],
                )
                .with_context(|| "failed to delete topic blocks")?;
            Ok(deleted)
        })
        .await
    }
}
