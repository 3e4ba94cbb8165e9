//! Topic block formation: grouping clusters across the merge relation,
//! keyword-scoring topic signals, and assembling the persisted block.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use std::collections::{HashMap, HashSet};

use crate::classification::{aggregate, ActivityKind, Classification};
use crate::models::{BlockClassification, Cluster, ClusterMerge, Modality, TopicBlock};

/// Keyword sets matched (case-insensitively, substring) against topic
/// strings. First match per category wins; a matched category scores
/// [`KEYWORD_MATCH_SCORE`].
const KEYWORD_RULES: [(ActivityKind, &[&str]); 5] = [
    (ActivityKind::Debugging, &["debug", "fix", "error"]),
    (ActivityKind::Learning, &["learn", "research"]),
    (ActivityKind::Tutorial, &["tutorial", "watch"]),
    (ActivityKind::Meeting, &["meeting", "call", "discuss"]),
    (ActivityKind::Working, &["implement", "build", "code"]),
];

const KEYWORD_MATCH_SCORE: u32 = 80;

/// Baseline "working" score when no topic matches any category: a session
/// must always carry some signal.
const FALLBACK_WORKING_SCORE: u32 = 50;

/// Score the five categories from topic strings by keyword matching. If
/// nothing matches, the working category gets the baseline score instead of
/// leaving the vector all-zero.
pub fn classify_topics(topics: &[String]) -> Classification {
    let mut out = Classification::default();
    for topic in topics {
        let lowered = topic.to_lowercase();
        for (kind, keywords) in KEYWORD_RULES {
            if keywords.iter().any(|k| lowered.contains(k)) {
                out.set_score(kind, out.score(kind).max(KEYWORD_MATCH_SCORE));
            }
        }
    }
    if out.is_zero() {
        out.set_score(ActivityKind::Working, FALLBACK_WORKING_SCORE);
    }
    out
}

/// One block-to-be: a primary cluster plus the audio clusters merged into
/// it. Visual clusters are primaries; an audio cluster is a primary only
/// when nothing absorbed it, so every cluster lands in exactly one group.
pub struct ClusterGroup {
    pub primary: Cluster,
    pub merged_audio: Vec<Cluster>,
}

impl ClusterGroup {
    pub fn all_observation_ids(&self) -> Vec<String> {
        let mut ids = self.primary.observation_ids.clone();
        for audio in &self.merged_audio {
            ids.extend(audio.observation_ids.iter().cloned());
        }
        ids
    }

    fn span(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let mut start = self.primary.start_time;
        let mut end = self.primary.end_time;
        for audio in &self.merged_audio {
            start = start.min(audio.start_time);
            end = end.max(audio.end_time);
        }
        (start, end)
    }
}

/// Partition a recording's clusters into block groups using the merge
/// relation. Merge rows referencing unknown clusters are ignored.
pub fn group_clusters(clusters: &[Cluster], merges: &[ClusterMerge]) -> Vec<ClusterGroup> {
    let audio_by_id: HashMap<&str, &Cluster> = clusters
        .iter()
        .filter(|c| c.modality == Modality::Audio)
        .map(|c| (c.id.as_str(), c))
        .collect();

    let mut merged_audio_ids: HashSet<String> = HashSet::new();
    let mut groups = Vec::new();

    for cluster in clusters {
        if cluster.modality != Modality::Visual {
            continue;
        }
        let merged: Vec<Cluster> = merges
            .iter()
            .filter(|m| m.visual_cluster_id == cluster.id)
            .filter_map(|m| audio_by_id.get(m.audio_cluster_id.as_str()))
            .map(|c| (*c).clone())
            .collect();
        for audio in &merged {
            merged_audio_ids.insert(audio.id.clone());
        }
        groups.push(ClusterGroup {
            primary: cluster.clone(),
            merged_audio: merged,
        });
    }

    // Audio clusters nothing absorbed stand alone; without this an
    // audio-only recording would produce no blocks at all.
    for cluster in clusters {
        if cluster.modality == Modality::Audio
            && !merged_audio_ids.contains(cluster.id.as_str())
        {
            groups.push(ClusterGroup {
                primary: cluster.clone(),
                merged_audio: Vec::new(),
            });
        }
    }

    groups
}

/// Assemble the persisted block for one group.
///
/// The block's scores are the duration-weighted aggregate of the keyword
/// vector (weighted by the group's span) and every contributing cluster's
/// stored classification (weighted by that cluster's duration); clusters
/// that were never classified contribute nothing.
pub fn build_block(
    recording_id: &str,
    group: &ClusterGroup,
    context_ids: Vec<String>,
    topics: &[String],
) -> TopicBlock {
    let (start, end) = group.span();
    let duration_secs = (end - start).num_seconds().max(0);

    let mut weighted: Vec<(Classification, f64)> = vec![(
        classify_topics(topics),
        duration_secs.max(1) as f64,
    )];
    for cluster in std::iter::once(&group.primary).chain(group.merged_audio.iter()) {
        if let Some(classification) = cluster.classification {
            weighted.push((classification, cluster.duration_secs().max(1) as f64));
        }
    }

    TopicBlock {
        id: Uuid::new_v4().to_string(),
        recording_id: recording_id.to_string(),
        context_ids,
        classification: BlockClassification {
            scores: aggregate(&weighted),
            start_time: start,
            end_time: end,
            merged_audio_cluster_ids: group
                .merged_audio
                .iter()
                .map(|c| c.id.clone())
                .collect(),
        },
        duration_secs,
    }
}
