use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::Classification;

/// The classification payload persisted with a topic block. Stored as JSON;
/// this struct owns that schema so the storage layer stays opaque to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockClassification {
    pub scores: Classification,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Audio clusters whose content was folded into this block, kept for
    /// traceability back to the merge records.
    pub merged_audio_cluster_ids: Vec<String>,
}

/// The user-facing unit of "what was I doing": one per visual cluster plus
/// whatever audio clusters merged into it. Never mutated after creation;
/// reprocessing deletes and recreates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicBlock {
    pub id: String,
    pub recording_id: String,
    pub context_ids: Vec<String>,
    pub classification: BlockClassification,
    pub duration_secs: i64,
}
