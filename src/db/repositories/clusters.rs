use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::classification::Classification;
use crate::db::{
    connection::Database,
    helpers::{from_json_column, from_optional_json_column, parse_datetime, to_json_column},
};
use crate::models::{Cluster, ClusterMerge, Modality};

fn row_to_cluster(row: &Row) -> Result<Cluster> {
    let modality: String = row.get("modality")?;
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let observation_ids: String = row.get("observation_ids_json")?;

    Ok(Cluster {
        id: row.get("id")?,
        recording_id: row.get("recording_id")?,
        modality: Modality::parse(&modality)?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_datetime(&end_time, "end_time")?,
        observation_count: row.get("observation_count")?,
        centroid: from_optional_json_column(row.get("centroid_json")?, "centroid_json")?,
        classification: from_optional_json_column(
            row.get("classification_json")?,
            "classification_json",
        )?,
        observation_ids: from_json_column(&observation_ids, "observation_ids_json")?,
    })
}

fn row_to_merge(row: &Row) -> Result<ClusterMerge, rusqlite::Error> {
    Ok(ClusterMerge {
        id: row.get("id")?,
        recording_id: row.get("recording_id")?,
        audio_cluster_id: row.get("audio_cluster_id")?,
        visual_cluster_id: row.get("visual_cluster_id")?,
        similarity: row.get("similarity")?,
        reason: row.get("reason")?,
    })
}

impl Database {
    /// Idempotent rebuild: drops every cluster and merge for the recording,
    /// then inserts the new set, all in one transaction.
    pub async fn replace_clusters(
        &self,
        recording_id: &str,
        clusters: &[Cluster],
        merges: &[ClusterMerge],
    ) -> Result<()> {
        let recording_id = recording_id.to_string();
        let clusters = clusters.to_vec();
        let merges = merges.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM cluster_merges WHERE recording_id = ?1",
                params![recording_id],
            )?;
            tx.execute(
                "DELETE FROM clusters WHERE recording_id = ?1",
                params![recording_id],
            )?;

            for cluster in &clusters {
                let centroid_json = cluster
                    .centroid
                    .as_ref()
                    .map(|c| to_json_column(c, "centroid_json"))
                    .transpose()?;
                let classification_json = cluster
                    .classification
                    .as_ref()
                    .map(|c| to_json_column(c, "classification_json"))
                    .transpose()?;
                tx.execute(
                    "INSERT INTO clusters (
                        id, recording_id, modality, start_time, end_time,
                        observation_count, centroid_json, classification_json,
                        observation_ids_json
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        cluster.id,
                        cluster.recording_id,
                        cluster.modality.as_str(),
                        cluster.start_time.to_rfc3339(),
                        cluster.end_time.to_rfc3339(),
                        cluster.observation_count,
                        centroid_json,
                        classification_json,
                        to_json_column(&cluster.observation_ids, "observation_ids_json")?,
                    ],
                )?;
            }

            for merge in &merges {
                tx.execute(
                    "INSERT INTO cluster_merges (
                        id, recording_id, audio_cluster_id, visual_cluster_id,
                        similarity, reason
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        merge.id,
                        merge.recording_id,
                        merge.audio_cluster_id,
                        merge.visual_cluster_id,
                        merge.similarity,
                        merge.reason,
                    ],
                )?;
            }

            tx.commit().with_context(|| "failed to commit cluster rebuild")?;
            Ok(())
        })
        .await
    }

    pub async fn get_clusters_for_recording(&self, recording_id: &str) -> Result<Vec<Cluster>> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recording_id, modality, start_time, end_time,
                        observation_count, centroid_json, classification_json,
                        observation_ids_json
                 FROM clusters
                 WHERE recording_id = ?1
                 ORDER BY start_time ASC",
            )?;

            let mut rows = stmt.query(params![recording_id])?;
            let mut clusters = Vec::new();
            while let Some(row) = rows.next()? {
                clusters.push(row_to_cluster(row)?);
            }
            Ok(clusters)
        })
        .await
    }

    pub async fn get_merges_for_recording(
        &self,
        recording_id: &str,
    ) -> Result<Vec<ClusterMerge>> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recording_id, audio_cluster_id, visual_cluster_id,
                        similarity, reason
                 FROM cluster_merges
                 WHERE recording_id = ?1",
            )?;

            let merges_iter = stmt.query_map(params![recording_id], row_to_merge)?;
            let mut merges = Vec::new();
            for merge in merges_iter {
                merges.push(merge?);
            }
            Ok(merges)
        })
        .await
    }

    pub async fn update_cluster_classification(
        &self,
        cluster_id: &str,
        classification: &Classification,
    ) -> Result<()> {
        let cluster_id = cluster_id.to_string();
        let classification = *classification;
        self.execute(move |conn| {
            conn.execute(
                "UPDATE clusters SET classification_json = ?1 WHERE id = ?2",
                params![
                    to_json_column(&classification, "classification_json")?,
                    cluster_id,
                ],
            )
            .with_context(|| "failed to update cluster classification")?;
            Ok(())
        })
        .await
    }

    pub async fn count_clusters(&self, recording_id: &str, modality: Modality) -> Result<i64> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM clusters
                 WHERE recording_id = ?1 AND modality = ?2",
                params![recording_id, modality.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    pub async fn delete_clusters_for_recording(&self, recording_id: &str) -> Result<usize> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM cluster_merges WHERE recording_id = ?1",
                params![recording_id],
            )?;
            let deleted = conn
                .execute(
                    "DELETE FROM clusters WHERE recording_id = ?1",
                    params![recording_id],
                )
                .with_context(|| "failed to delete clusters")?;
            Ok(deleted)
        })
        .await
    }
}
