use uuid::Uuid;

use crate::clustering::config::ClusteringConfig;
use crate::models::{Cluster, Modality, Observation};

/// A cluster under construction, with the member observations still at hand.
struct OpenCluster<'a> {
    members: Vec<&'a Observation>,
}

impl<'a> OpenCluster<'a> {
    fn last(&self) -> &'a Observation {
        self.members[self.members.len() - 1]
    }

    fn close(self, recording_id: &str, modality: Modality) -> Cluster {
        let start = self
            .members
            .iter()
            .map(|o| o.time_range().start)
            .min()
            .expect("open cluster is never empty");
        let end = self
            .members
            .iter()
            .map(|o| o.time_range().end)
            .max()
            .expect("open cluster is never empty");

        let embeddings: Vec<&[f32]> =
            self.members.iter().filter_map(|o| o.embedding()).collect();

        Cluster {
            id: Uuid::new_v4().to_string(),
            recording_id: recording_id.to_string(),
            modality,
            start_time: start,
            end_time: end,
            observation_count: self.members.len() as i64,
            centroid: mean_embedding(&embeddings),
            classification: None,
            observation_ids: self.members.iter().map(|o| o.id().to_string()).collect(),
        }
    }
}

/// Group a recording's observations of one modality into time-bounded
/// clusters. Consecutive observations join the current cluster while the gap
/// stays within the configured bound and, where both sides carry embeddings,
/// cosine similarity stays above the threshold; otherwise a new cluster
/// starts. Input order does not matter; observations are sorted by start.
pub fn cluster_observations(
    recording_id: &str,
    observations: &[Observation],
    modality: Modality,
    config: &ClusteringConfig,
) -> Vec<Cluster> {
    let mut ordered: Vec<&Observation> = observations
        .iter()
        .filter(|o| o.modality() == modality)
        .collect();
    if ordered.is_empty() {
        return Vec::new();
    }
    ordered.sort_by_key(|o| o.time_range().start);

    let max_gap_secs = match modality {
        Modality::Audio => config.audio_max_gap_secs,
        Modality::Visual => config.visual_max_gap_secs,
    };

    let mut clusters = Vec::new();
    let mut current: Option<OpenCluster> = None;

    for observation in ordered {
        match &mut current {
            Some(open) if belongs(open.last(), observation, max_gap_secs, config) => {
                open.members.push(observation);
            }
            _ => {
                if let Some(open) = current.take() {
                    clusters.push(open.close(recording_id, modality));
                }
                current = Some(OpenCluster {
                    members: vec![observation],
                });
            }
        }
    }

    if let Some(open) = current {
        clusters.push(open.close(recording_id, modality));
    }

    clusters
}

fn belongs(
    previous: &Observation,
    candidate: &Observation,
    max_gap_secs: i64,
    config: &ClusteringConfig,
) -> bool {
    let gap = (candidate.time_range().start - previous.time_range().end).num_seconds();
    if gap > max_gap_secs {
        return false;
    }

    match (previous.embedding(), candidate.embedding()) {
        (Some(a), Some(b)) => cosine_similarity(a, b) >= config.similarity_threshold,
        // Missing embeddings fall back to the temporal criterion alone
        _ => true,
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Element-wise mean of the given vectors; `None` when there are none.
/// Vectors of mismatched length are skipped rather than poisoning the mean.
pub fn mean_embedding(embeddings: &[&[f32]]) -> Option<Vec<f32>> {
    let dim = embeddings.iter().map(|e| e.len()).find(|len| *len > 0)?;
    let usable: Vec<&&[f32]> = embeddings.iter().filter(|e| e.len() == dim).collect();
    if usable.is_empty() {
        return None;
    }

    let mut sums = vec![0.0f64; dim];
    for embedding in &usable {
        for (slot, value) in sums.iter_mut().zip(embedding.iter()) {
            *slot += f64::from(*value);
        }
    }
    let count = usable.len() as f64;
    Some(sums.into_iter().map(|s| (s / count) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    use crate::models::{AudioKind, AudioObservation, AudioSource, VisualObservation};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn audio(id: &str, start: i64, end: i64) -> Observation {
        Observation::Audio(AudioObservation {
            id: id.to_string(),
            recording_id: "rec".to_string(),
            source: AudioSource::Mic,
            kind: AudioKind::Speech,
            start_time: at(start),
            end_time: at(end),
            text: format!("segment {id}"),
        })
    }

    fn frame(id: &str, ts: i64, embedding: Option<Vec<f32>>) -> Observation {
        Observation::Visual(VisualObservation {
            id: id.to_string(),
            recording_id: "rec".to_string(),
            timestamp: at(ts),
            image_path: format!("/tmp/{id}.jpg"),
            ocr_text: Some("text".to_string()),
            vlm_description: None,
            embedding,
        })
    }

    #[test]
    fn splits_on_temporal_gap() {
        let observations = vec![
            audio("a", 0, 10),
            audio("b", 15, 25),
            // 35s of silence after "b" ends
            audio("c", 60, 70),
        ];
        let clusters = cluster_observations(
            "rec",
            &observations,
            Modality::Audio,
            &ClusteringConfig::default(),
        );
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].observation_count, 2);
        assert_eq!(clusters[0].observation_ids, vec!["a", "b"]);
        assert_eq!(clusters[1].observation_ids, vec!["c"]);
        assert_eq!(clusters[0].start_time, at(0));
        assert_eq!(clusters[0].end_time, at(25));
    }

    #[test]
    fn splits_on_embedding_dissimilarity() {
        let code = vec![1.0f32, 0.0, 0.0];
        let video = vec![0.0f32, 1.0, 0.0];
        let observations = vec![
            frame("f1", 0, Some(code.clone())),
            frame("f2", 2, Some(code.clone())),
            frame("f3", 4, Some(video.clone())),
            frame("f4", 6, Some(video)),
        ];
        let clusters = cluster_observations(
            "rec",
            &observations,
            Modality::Visual,
            &ClusteringConfig::default(),
        );
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].observation_ids, vec!["f1", "f2"]);
        assert_eq!(clusters[1].observation_ids, vec!["f3", "f4"]);
    }

    #[test]
    fn missing_embeddings_fall_back_to_temporal_grouping() {
        let observations = vec![
            frame("f1", 0, Some(vec![1.0, 0.0])),
            frame("f2", 2, None),
            frame("f3", 4, Some(vec![0.0, 1.0])),
        ];
        let clusters = cluster_observations(
            "rec",
            &observations,
            Modality::Visual,
            &ClusteringConfig::default(),
        );
        // f2 has no embedding, so both joins use the temporal criterion only
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].observation_count, 3);
    }

    #[test]
    fn centroid_is_mean_of_member_embeddings() {
        let observations = vec![
            frame("f1", 0, Some(vec![1.0, 0.5])),
            frame("f2", 2, Some(vec![1.0, 0.7])),
        ];
        let clusters = cluster_observations(
            "rec",
            &observations,
            Modality::Visual,
            &ClusteringConfig::default(),
        );
        assert_eq!(clusters.len(), 1);
        let centroid = clusters[0].centroid.as_ref().unwrap();
        assert!((centroid[0] - 1.0).abs() < 1e-6);
        assert!((centroid[1] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn filters_by_modality() {
        let observations = vec![audio("a", 0, 10), frame("f1", 5, None)];
        let clusters = cluster_observations(
            "rec",
            &observations,
            Modality::Audio,
            &ClusteringConfig::default(),
        );
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].observation_ids, vec!["a"]);
    }

    #[test]
    fn empty_input_yields_no_clusters() {
        let clusters = cluster_observations(
            "rec",
            &[],
            Modality::Visual,
            &ClusteringConfig::default(),
        );
        assert!(clusters.is_empty());
    }

    #[test]
    fn cosine_similarity_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
    }
}
