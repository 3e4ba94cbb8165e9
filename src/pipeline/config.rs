use std::path::PathBuf;

use crate::clustering::ClusteringConfig;

/// Tunables for the ingestion phases. Defaults match the original indexing
/// behavior; everything that used to be an inline constant lives here.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Seconds between extracted video frames.
    pub frame_interval_secs: f64,

    /// Width frames are scaled to before OCR/VLM.
    pub frame_width: u32,

    /// Every Nth frame is sent for vision-model description; the rest keep
    /// OCR-only evidence.
    pub vlm_stride: usize,

    /// Batch size passed to the embedding service.
    pub embedding_batch_size: usize,

    /// Concurrency limit for per-segment transcription calls.
    pub transcription_concurrency: usize,

    /// Run VAD over the mic and system sources concurrently. Off by default:
    /// both sources usually share one local inference server.
    pub parallel_audio_sources: bool,

    /// Scratch directory for extracted frames.
    pub work_dir: PathBuf,

    pub clustering: ClusteringConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval_secs: 2.0,
            frame_width: 1024,
            vlm_stride: 5,
            embedding_batch_size: 16,
            transcription_concurrency: 4,
            parallel_audio_sources: false,
            work_dir: std::env::temp_dir().join("desklog"),
            clustering: ClusteringConfig::default(),
        }
    }
}
