/// Configuration for temporal clustering and cross-modal merging, with
/// tunable thresholds. Defaults match the original indexing behavior.
#[derive(Debug, Clone)]
pub struct ClusteringConfig {
    /// Maximum silence between consecutive audio observations before a new
    /// cluster starts.
    pub audio_max_gap_secs: i64,

    /// Maximum gap between consecutive visual observations before a new
    /// cluster starts.
    pub visual_max_gap_secs: i64,

    /// Cosine similarity below which consecutive frames split into separate
    /// clusters even without a temporal gap. Only applied when both sides
    /// carry embeddings.
    pub similarity_threshold: f64,

    /// Minimum temporal overlap for an audio cluster to be considered for a
    /// merge into a visual cluster.
    pub merge_min_overlap_secs: i64,

    /// Combined merge score below which no merge is recorded.
    pub merge_score_threshold: f64,

    /// Merge score weights: temporal overlap ratio vs. text similarity.
    pub merge_overlap_weight: f64,
    pub merge_text_weight: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            audio_max_gap_secs: 30,
            visual_max_gap_secs: 30,
            similarity_threshold: 0.85,
            merge_min_overlap_secs: 5,
            merge_score_threshold: 0.3,
            merge_overlap_weight: 0.6,
            merge_text_weight: 0.4,
        }
    }
}
