//! Audio and visual ingestion: VAD, per-segment transcription, frame
//! extraction, OCR, strided VLM description and OCR-text embeddings.
//!
//! Per-item failures are isolated here (a bad segment or frame is logged and
//! counted, never fatal); only collaborator-level breakage propagates.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::executor::map_bounded;
use crate::models::{AudioKind, AudioObservation, AudioSource, Observation, Recording, VisualObservation};
use crate::pipeline::config::PipelineConfig;
use crate::services::{
    AudioPreprocessor, DescribeRequest, FrameInfo, IntelligenceService, SpeechExtraction,
    TranscriptionService, VideoService,
};
use crate::telemetry::ItemCounts;
use crate::log_warn;

const ENABLE_LOGS: bool = true;

/// VAD output for one audio source.
pub struct SourceExtraction {
    pub source: AudioSource,
    pub extraction: SpeechExtraction,
}

fn offset_from(base: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    base + Duration::milliseconds((secs * 1000.0).round() as i64)
}

/// Run VAD over every enabled audio source. Sources run concurrently when
/// `parallel` is set, strictly one at a time otherwise. A source yielding
/// zero segments is a valid outcome; a preprocessor error is phase-fatal.
pub async fn extract_speech(
    audio: Arc<dyn AudioPreprocessor>,
    recording: &Recording,
    parallel: bool,
) -> Result<Vec<SourceExtraction>> {
    let mut sources: Vec<(AudioSource, String)> = Vec::new();
    if let Some(path) = &recording.mic_audio_path {
        sources.push((AudioSource::Mic, path.clone()));
    }
    if let Some(path) = &recording.system_audio_path {
        sources.push((AudioSource::System, path.clone()));
    }
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let limit = if parallel { sources.len() } else { 1 };
    let recording_id = recording.id.clone();

    map_bounded(sources, limit, move |(source, path)| {
        let audio = Arc::clone(&audio);
        let recording_id = recording_id.clone();
        async move {
            let extraction = audio
                .extract_speech_segments(&path, &recording_id)
                .await
                .with_context(|| format!("vad failed for {} source", source.as_str()))?;
            Ok(SourceExtraction { source, extraction })
        }
    })
    .await
}

/// Transcription output: the assembled audio observations plus the
/// succeeded/failed segment counts for telemetry.
pub struct TranscriptionOutput {
    pub observations: Vec<Observation>,
    pub counts: ItemCounts,
}

struct SegmentJob {
    source: AudioSource,
    start_secs: f64,
    end_secs: f64,
    audio_path: String,
}

/// Transcribe every VAD segment with bounded concurrency. A failed or empty
/// transcription drops the segment and bumps the failed count; the phase
/// only fails if the engine itself is broken. Scratch directories from VAD
/// are cleaned up whether or not transcription succeeds.
pub async fn transcribe_extractions(
    audio: Arc<dyn AudioPreprocessor>,
    transcription: Arc<dyn TranscriptionService>,
    recording: &Recording,
    extractions: Vec<SourceExtraction>,
    concurrency: usize,
) -> Result<TranscriptionOutput> {
    let temp_dirs: Vec<PathBuf> = extractions
        .iter()
        .map(|e| e.extraction.temp_dir.clone())
        .collect();

    let result =
        transcribe_inner(transcription, recording, extractions, concurrency).await;

    for temp_dir in &temp_dirs {
        if let Err(err) = audio.cleanup(temp_dir).await {
            log_warn!("failed to clean up {}: {err:#}", temp_dir.display());
        }
    }

    result
}

async fn transcribe_inner(
    transcription: Arc<dyn TranscriptionService>,
    recording: &Recording,
    extractions: Vec<SourceExtraction>,
    concurrency: usize,
) -> Result<TranscriptionOutput> {
    let jobs: Vec<SegmentJob> = extractions
        .into_iter()
        .flat_map(|e| {
            e.extraction
                .segments
                .into_iter()
                .map(move |segment| SegmentJob {
                    source: e.source,
                    start_secs: segment.start_secs,
                    end_secs: segment.end_secs,
                    audio_path: segment.audio_path,
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let total = jobs.len();
    let recording_id = recording.id.clone();
    let captured_at = recording.captured_at;

    let transcribed: Vec<Option<AudioObservation>> =
        map_bounded(jobs, concurrency.max(1), move |job| {
            let transcription = Arc::clone(&transcription);
            let recording_id = recording_id.clone();
            async move {
                match transcription.transcribe_segment(&job.audio_path).await {
                    Ok(text) if !text.trim().is_empty() => Ok(Some(AudioObservation {
                        id: Uuid::new_v4().to_string(),
                        recording_id,
                        source: job.source,
                        kind: AudioKind::Speech,
                        start_time: offset_from(captured_at, job.start_secs),
                        end_time: offset_from(captured_at, job.end_secs),
                        text: text.trim().to_string(),
                    })),
                    Ok(_) => {
                        log_warn!("segment {} transcribed empty, skipping", job.audio_path);
                        Ok(None)
                    }
                    Err(err) => {
                        log_warn!("segment {} failed: {err:#}", job.audio_path);
                        Ok(None)
                    }
                }
            }
        })
        .await?;

    let observations: Vec<Observation> = transcribed
        .into_iter()
        .flatten()
        .map(Observation::Audio)
        .collect();
    let failed = total - observations.len();

    Ok(TranscriptionOutput {
        counts: ItemCounts::partial(total, failed),
        observations,
    })
}

/// Extract frames at the configured interval into a per-recording scratch
/// directory. A recording without video yields no frames.
pub async fn extract_frames(
    video: Arc<dyn VideoService>,
    recording: &Recording,
    config: &PipelineConfig,
) -> Result<Vec<FrameInfo>> {
    let Some(video_path) = &recording.video_path else {
        return Ok(Vec::new());
    };

    let out_dir = config.work_dir.join(format!("frames-{}", recording.id));
    tokio::fs::create_dir_all(&out_dir)
        .await
        .with_context(|| format!("failed to create frame directory {}", out_dir.display()))?;

    video
        .extract_frames_at_interval(
            video_path,
            config.frame_interval_secs,
            config.frame_width,
            &out_dir,
        )
        .await
        .with_context(|| "frame extraction failed")
}

/// Frame indices sent for VLM description: every `stride`th frame, always
/// including the first.
pub fn vlm_frame_indices(frame_count: usize, stride: usize) -> Vec<usize> {
    (0..frame_count).step_by(stride.max(1)).collect()
}

pub struct EnrichmentOutput {
    pub observations: Vec<Observation>,
    pub counts: ItemCounts,
}

/// VLM description for the strided subset, OCR-text embeddings for every
/// frame that has OCR text, then one visual observation per frame carrying
/// whichever evidence survived. A frame with no evidence at all is still a
/// valid observation.
pub async fn enrich_frames(
    intelligence: Arc<dyn IntelligenceService>,
    recording: &Recording,
    frames: &[FrameInfo],
    ocr_texts: &[Option<String>],
    config: &PipelineConfig,
) -> Result<EnrichmentOutput> {
    anyhow::ensure!(
        frames.len() == ocr_texts.len(),
        "ocr produced {} results for {} frames",
        ocr_texts.len(),
        frames.len()
    );

    let selected = vlm_frame_indices(frames.len(), config.vlm_stride);
    let requests: Vec<DescribeRequest> = selected
        .iter()
        .map(|&i| DescribeRequest {
            image_path: frames[i].image_path.clone(),
            timestamp_secs: frames[i].timestamp_secs,
        })
        .collect();

    let mut descriptions: Vec<Option<String>> = vec![None; frames.len()];
    if !requests.is_empty() {
        let described = intelligence
            .describe_images(&requests)
            .await
            .with_context(|| "vlm description failed")?;
        for (&index, described) in selected.iter().zip(described.into_iter()) {
            descriptions[index] = Some(described.description);
        }
    }

    // Embeddings only for frames whose OCR yielded text
    let embeddable: Vec<usize> = ocr_texts
        .iter()
        .enumerate()
        .filter_map(|(i, text)| text.as_ref().map(|_| i))
        .collect();
    let texts: Vec<String> = embeddable
        .iter()
        .map(|&i| ocr_texts[i].clone().unwrap_or_default())
        .collect();

    let mut embeddings: Vec<Option<Vec<f32>>> = vec![None; frames.len()];
    let mut embedding_failures = 0usize;
    if !texts.is_empty() {
        let vectors = intelligence
            .embed_text(&texts, config.embedding_batch_size)
            .await
            .with_context(|| "embedding generation failed")?;
        for (&index, vector) in embeddable.iter().zip(vectors.into_iter()) {
            if vector.is_empty() {
                embedding_failures += 1;
            } else {
                embeddings[index] = Some(vector);
            }
        }
    }

    let observations: Vec<Observation> = frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            Observation::Visual(VisualObservation {
                id: Uuid::new_v4().to_string(),
                recording_id: recording.id.clone(),
                timestamp: offset_from(recording.captured_at, frame.timestamp_secs),
                image_path: frame.image_path.clone(),
                ocr_text: ocr_texts[i].clone(),
                vlm_description: descriptions[i].take(),
                embedding: embeddings[i].take(),
            })
        })
        .collect();

    Ok(EnrichmentOutput {
        counts: ItemCounts::partial(frames.len(), embedding_failures),
        observations,
    })
}
