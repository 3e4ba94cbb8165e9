use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::Classification;
use crate::time_range::TimeRange;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Audio,
    Visual,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Audio => "audio",
            Modality::Visual => "visual",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "audio" => Ok(Modality::Audio),
            "visual" => Ok(Modality::Visual),
            other => Err(anyhow!("unknown modality '{other}'")),
        }
    }
}

/// A time-bounded group of same-modality observations from one recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub recording_id: String,
    pub modality: Modality,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub observation_count: i64,
    /// Mean of member embeddings, where members carry embeddings.
    pub centroid: Option<Vec<f32>>,
    pub classification: Option<Classification>,
    pub observation_ids: Vec<String>,
}

impl Cluster {
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn duration_secs(&self) -> i64 {
        self.time_range().duration_secs()
    }
}

/// Records that an audio cluster's content was folded into a visual cluster.
/// Merges are many-to-one: several audio clusters may point at one visual
/// cluster, never the reverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMerge {
    pub id: String,
    pub recording_id: String,
    pub audio_cluster_id: String,
    pub visual_cluster_id: String,
    pub similarity: f64,
    /// Human-readable audit trail, e.g. "temporal overlap 0.82".
    pub reason: String,
}
