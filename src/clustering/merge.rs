use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::clustering::config::ClusteringConfig;
use crate::models::{Cluster, ClusterMerge};

/// Fold audio clusters into the visual clusters they overlap, scoring each
/// candidate pair by temporal overlap and transcript/OCR text similarity.
///
/// Merges are many-to-one: each audio cluster lands on at most one visual
/// cluster (its best-scoring candidate), while a visual cluster may collect
/// several audio clusters. `cluster_texts` maps cluster id to that cluster's
/// combined text evidence.
pub fn merge_audio_into_visual(
    recording_id: &str,
    audio_clusters: &[Cluster],
    visual_clusters: &[Cluster],
    cluster_texts: &HashMap<String, String>,
    config: &ClusteringConfig,
) -> Vec<ClusterMerge> {
    let mut merges = Vec::new();

    for audio in audio_clusters {
        let audio_range = audio.time_range();
        let mut best: Option<(&Cluster, f64, f64, f64)> = None;

        for visual in visual_clusters {
            let overlap_secs = audio_range
                .overlap_duration(&visual.time_range())
                .num_seconds();
            if overlap_secs < config.merge_min_overlap_secs {
                continue;
            }

            let overlap_ratio = audio_range.overlap_ratio(&visual.time_range());
            let text_similarity = jaccard_similarity(
                cluster_texts.get(&audio.id).map(String::as_str),
                cluster_texts.get(&visual.id).map(String::as_str),
            );
            let score = config.merge_overlap_weight * overlap_ratio
                + config.merge_text_weight * text_similarity;

            if best.map_or(true, |(_, top, _, _)| score > top) {
                best = Some((visual, score, overlap_ratio, text_similarity));
            }
        }

        if let Some((visual, score, overlap_ratio, text_similarity)) = best {
            if score >= config.merge_score_threshold {
                merges.push(ClusterMerge {
                    id: Uuid::new_v4().to_string(),
                    recording_id: recording_id.to_string(),
                    audio_cluster_id: audio.id.clone(),
                    visual_cluster_id: visual.id.clone(),
                    similarity: score,
                    reason: format!(
                        "temporal overlap {overlap_ratio:.2}, text similarity {text_similarity:.2}"
                    ),
                });
            }
        }
    }

    merges
}

/// Word-set Jaccard similarity over lowercased alphanumeric tokens.
fn jaccard_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    let set_a = tokenize(a);
    let set_b = tokenize(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    use crate::models::Modality;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn cluster(id: &str, modality: Modality, start: i64, end: i64) -> Cluster {
        Cluster {
            id: id.to_string(),
            recording_id: "rec".to_string(),
            modality,
            start_time: at(start),
            end_time: at(end),
            observation_count: 1,
            centroid: None,
            classification: None,
            observation_ids: vec![format!("{id}-obs")],
        }
    }

    fn texts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect()
    }

    #[test]
    fn merges_overlapping_clusters_with_shared_vocabulary() {
        let audio = vec![cluster("a1", Modality::Audio, 0, 100)];
        let visual = vec![cluster("v1", Modality::Visual, 0, 120)];
        let cluster_texts = texts(&[
            ("a1", "discussing the parser bug in the tokenizer"),
            ("v1", "parser tokenizer error stack trace editor"),
        ]);

        let merges = merge_audio_into_visual(
            "rec",
            &audio,
            &visual,
            &cluster_texts,
            &ClusteringConfig::default(),
        );
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].audio_cluster_id, "a1");
        assert_eq!(merges[0].visual_cluster_id, "v1");
        assert!(merges[0].similarity >= 0.3);
        assert!(merges[0].reason.contains("temporal overlap"));
    }

    #[test]
    fn skips_clusters_below_minimum_overlap() {
        let audio = vec![cluster("a1", Modality::Audio, 0, 10)];
        let visual = vec![cluster("v1", Modality::Visual, 8, 100)];
        // 2s of overlap, below the 5s default minimum
        let merges = merge_audio_into_visual(
            "rec",
            &audio,
            &visual,
            &HashMap::new(),
            &ClusteringConfig::default(),
        );
        assert!(merges.is_empty());
    }

    #[test]
    fn each_audio_cluster_picks_its_best_visual_cluster() {
        let audio = vec![cluster("a1", Modality::Audio, 40, 100)];
        let visual = vec![
            cluster("v1", Modality::Visual, 0, 50),
            cluster("v2", Modality::Visual, 50, 200),
        ];
        let merges = merge_audio_into_visual(
            "rec",
            &audio,
            &visual,
            &HashMap::new(),
            &ClusteringConfig::default(),
        );
        // v2 covers 50 of the 60 audio seconds, v1 only 10
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].visual_cluster_id, "v2");
    }

    #[test]
    fn many_audio_clusters_may_merge_into_one_visual_cluster() {
        let audio = vec![
            cluster("a1", Modality::Audio, 0, 60),
            cluster("a2", Modality::Audio, 70, 130),
        ];
        let visual = vec![cluster("v1", Modality::Visual, 0, 140)];
        let merges = merge_audio_into_visual(
            "rec",
            &audio,
            &visual,
            &HashMap::new(),
            &ClusteringConfig::default(),
        );
        assert_eq!(merges.len(), 2);
        assert!(merges.iter().all(|m| m.visual_cluster_id == "v1"));
    }

    #[test]
    fn score_below_threshold_records_no_merge() {
        let audio = vec![cluster("a1", Modality::Audio, 0, 100)];
        let visual = vec![cluster("v1", Modality::Visual, 90, 400)];
        // 10s overlap out of 100 → ratio 0.1, no shared text → score 0.06
        let merges = merge_audio_into_visual(
            "rec",
            &audio,
            &visual,
            &HashMap::new(),
            &ClusteringConfig::default(),
        );
        assert!(merges.is_empty());
    }
}
