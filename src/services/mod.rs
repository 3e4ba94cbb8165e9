//! Collaborator contracts for the external tools the pipeline fans out to.
//!
//! Implementations live outside this crate (subprocess wrappers, model
//! servers); the pipeline only depends on these traits, which keeps every
//! phase testable against mocks.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classification::Classification;

/// One speech segment produced by voice-activity detection, with offsets in
/// seconds from the start of the source audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub audio_path: String,
}

/// VAD output: the segments plus the scratch directory holding their audio.
/// The caller owns cleanup of `temp_dir`, even on failure.
#[derive(Debug, Clone)]
pub struct SpeechExtraction {
    pub segments: Vec<SpeechSegment>,
    pub temp_dir: PathBuf,
}

/// Runs VAD over a canonicalized audio file.
///
/// Must fail loudly if the underlying tool cannot run at all; returning zero
/// segments is a valid, non-error outcome (a silent source).
#[async_trait]
pub trait AudioPreprocessor: Send + Sync {
    async fn extract_speech_segments(
        &self,
        audio_path: &str,
        recording_id: &str,
    ) -> Result<SpeechExtraction>;

    async fn cleanup(&self, temp_dir: &Path) -> Result<()>;
}

/// Transcribes a single speech segment.
///
/// Returns an empty string on recoverable failure; a hard error means the
/// engine itself is broken and the segment should be counted as failed.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe_segment(&self, audio_path: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    pub image_path: String,
    pub timestamp_secs: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

/// Frame extraction and batch OCR over a finished screen recording.
#[async_trait]
pub trait VideoService: Send + Sync {
    async fn get_metadata(&self, video_path: &str) -> Result<VideoMetadata>;

    async fn extract_frames_at_interval(
        &self,
        video_path: &str,
        interval_secs: f64,
        width: u32,
        out_dir: &Path,
    ) -> Result<Vec<FrameInfo>>;

    /// One entry per input frame, in order. `None` marks a frame whose OCR
    /// failed recoverably; only an engine-level breakage returns `Err`.
    async fn run_ocr(&self, frames: &[FrameInfo]) -> Result<Vec<Option<String>>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRequest {
    pub image_path: String,
    pub timestamp_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedImage {
    pub timestamp_secs: f64,
    pub description: String,
}

/// Named signals extracted from a cluster's combined text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMetadata {
    pub apps: Vec<String>,
    pub urls: Vec<String>,
    pub projects: Vec<String>,
    pub topics: Vec<String>,
}

/// Vision/language model calls: frame description, text embeddings,
/// transcript classification and signal extraction.
#[async_trait]
pub trait IntelligenceService: Send + Sync {
    async fn describe_images(&self, items: &[DescribeRequest]) -> Result<Vec<DescribedImage>>;

    /// One vector per input text, in order; an empty vector marks a per-item
    /// failure. Implementations batch internally at `batch_size`.
    async fn embed_text(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>>;

    /// Precondition: `transcript` must be non-empty — calling this with no
    /// transcript is a caller bug and fails immediately.
    async fn classify(
        &self,
        transcript: &str,
        visual_log: Option<&str>,
    ) -> Result<Classification>;

    async fn extract_metadata(
        &self,
        text: &str,
        classification: &Classification,
    ) -> Result<SignalMetadata>;
}

/// Capability implemented by adapters that shell out to an external process,
/// so the resource sampler can poll CPU/RAM without adapter-specific
/// knowledge.
pub trait ResourceTrackable: Send + Sync {
    fn name(&self) -> &str;

    /// Current PID of the external process, if one is running.
    fn pid(&self) -> Option<u32>;
}
