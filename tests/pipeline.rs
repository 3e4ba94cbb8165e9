//! End-to-end pipeline scenarios against mock collaborators and a
//! throwaway on-disk SQLite database.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use desklog::classification::Classification;
use desklog::models::{
    AudioKind, AudioObservation, AudioSource, Modality, Observation, PhaseOutcome,
    ProcessingStep, Recording, RecordingStatus, RunStatus, RunType,
};
use desklog::pipeline::{Pipeline, PipelineConfig, PipelineServices};
use desklog::services::{
    AudioPreprocessor, DescribeRequest, DescribedImage, FrameInfo, IntelligenceService,
    SignalMetadata, SpeechExtraction, SpeechSegment, TranscriptionService, VideoMetadata,
    VideoService,
};
use desklog::Database;

// ---------------------------------------------------------------- mocks

struct MockAudio {
    segments: Vec<SpeechSegment>,
    vad_calls: AtomicUsize,
    cleaned: Mutex<Vec<PathBuf>>,
}

impl MockAudio {
    fn with_segments(count: usize) -> Self {
        let segments = (0..count)
            .map(|i| SpeechSegment {
                start_secs: (i * 10) as f64,
                end_secs: (i * 10 + 5) as f64,
                audio_path: format!("/tmp/seg-{i}.wav"),
            })
            .collect();
        Self {
            segments,
            vad_calls: AtomicUsize::new(0),
            cleaned: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AudioPreprocessor for MockAudio {
    async fn extract_speech_segments(
        &self,
        _audio_path: &str,
        recording_id: &str,
    ) -> Result<SpeechExtraction> {
        self.vad_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SpeechExtraction {
            segments: self.segments.clone(),
            temp_dir: std::env::temp_dir().join(format!("desklog-vad-{recording_id}")),
        })
    }

    async fn cleanup(&self, temp_dir: &Path) -> Result<()> {
        self.cleaned.lock().unwrap().push(temp_dir.to_path_buf());
        Ok(())
    }
}

struct MockTranscription {
    failing_paths: HashSet<String>,
    calls: AtomicUsize,
}

impl MockTranscription {
    fn new(failing_paths: &[&str]) -> Self {
        Self {
            failing_paths: failing_paths.iter().map(|p| p.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TranscriptionService for MockTranscription {
    async fn transcribe_segment(&self, audio_path: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_paths.contains(audio_path) {
            return Err(anyhow!("whisper crashed on {audio_path}"));
        }
        Ok(format!("spoken words from {audio_path}"))
    }
}

struct MockVideo {
    frames: Vec<FrameInfo>,
    ocr_texts: Vec<Option<String>>,
}

impl MockVideo {
    fn with_frames(count: usize) -> Self {
        let frames = (0..count)
            .map(|i| FrameInfo {
                image_path: format!("/tmp/frame-{i}.jpg"),
                timestamp_secs: (i * 2) as f64,
            })
            .collect();
        let ocr_texts = (0..count)
            .map(|i| Some(format!("terminal output line {i}")))
            .collect();
        Self { frames, ocr_texts }
    }

    fn empty() -> Self {
        Self {
            frames: Vec::new(),
            ocr_texts: Vec::new(),
        }
    }
}

#[async_trait]
impl VideoService for MockVideo {
    async fn get_metadata(&self, _video_path: &str) -> Result<VideoMetadata> {
        Ok(VideoMetadata {
            duration_secs: 60.0,
            width: 1920,
            height: 1080,
        })
    }

    async fn extract_frames_at_interval(
        &self,
        _video_path: &str,
        _interval_secs: f64,
        _width: u32,
        _out_dir: &Path,
    ) -> Result<Vec<FrameInfo>> {
        Ok(self.frames.clone())
    }

    async fn run_ocr(&self, _frames: &[FrameInfo]) -> Result<Vec<Option<String>>> {
        Ok(self.ocr_texts.clone())
    }
}

struct MockIntelligence;

#[async_trait]
impl IntelligenceService for MockIntelligence {
    async fn describe_images(&self, items: &[DescribeRequest]) -> Result<Vec<DescribedImage>> {
        Ok(items
            .iter()
            .map(|item| DescribedImage {
                timestamp_secs: item.timestamp_secs,
                description: "code editor with a failing test".to_string(),
            })
            .collect())
    }

    async fn embed_text(&self, texts: &[String], _batch_size: usize) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }

    async fn classify(
        &self,
        _transcript: &str,
        _visual_log: Option<&str>,
    ) -> Result<Classification> {
        Ok(Classification {
            working: 70,
            ..Classification::default()
        })
    }

    async fn extract_metadata(
        &self,
        _text: &str,
        _classification: &Classification,
    ) -> Result<SignalMetadata> {
        Ok(SignalMetadata {
            apps: vec!["Terminal".to_string()],
            urls: Vec::new(),
            projects: vec!["desklog".to_string()],
            topics: vec!["implementing the parser".to_string()],
        })
    }
}

// -------------------------------------------------------------- helpers

fn temp_db() -> Database {
    let path = std::env::temp_dir().join(format!("desklog-it-{}.db", Uuid::new_v4()));
    Database::new(path).unwrap()
}

fn raw_recording(id: &str, mic: bool, video: bool) -> Recording {
    let now = Utc::now();
    Recording {
        id: id.to_string(),
        status: RecordingStatus::Raw,
        processing_step: None,
        error_message: None,
        video_path: video.then(|| "/tmp/screen.mp4".to_string()),
        mic_audio_path: mic.then(|| "/tmp/mic.wav".to_string()),
        system_audio_path: None,
        duration_secs: 600,
        captured_at: now,
        created_at: now,
        updated_at: now,
    }
}

struct Harness {
    db: Database,
    pipeline: Pipeline,
    audio: Arc<MockAudio>,
    transcription: Arc<MockTranscription>,
}

fn harness(audio: MockAudio, transcription: MockTranscription, video: MockVideo) -> Harness {
    let db = temp_db();
    let audio = Arc::new(audio);
    let transcription = Arc::new(transcription);
    let services = PipelineServices {
        audio: audio.clone(),
        transcription: transcription.clone(),
        video: Arc::new(video),
        intelligence: Arc::new(MockIntelligence),
    };
    let pipeline = Pipeline::new(db.clone(), services, PipelineConfig::default());
    Harness {
        db,
        pipeline,
        audio,
        transcription,
    }
}

// ---------------------------------------------------------------- tests

#[tokio::test]
async fn per_segment_failure_is_isolated_and_counted() {
    let h = harness(
        MockAudio::with_segments(5),
        MockTranscription::new(&["/tmp/seg-2.wav"]),
        MockVideo::empty(),
    );
    h.db.insert_recording(&raw_recording("rec-iso", true, false))
        .await
        .unwrap();

    let done = h.pipeline.process_recording("rec-iso", false).await.unwrap();
    assert_eq!(done.status, RecordingStatus::Processed);

    let audio_count = h
        .db
        .count_observations("rec-iso", Modality::Audio)
        .await
        .unwrap();
    assert_eq!(audio_count, 4);

    let runs = h.db.get_runs_for_recording("rec-iso").await.unwrap();
    assert_eq!(runs.len(), 1);
    let stats = h.db.get_phase_stats_for_run(&runs[0].id).await.unwrap();
    let transcription_stat = stats
        .iter()
        .find(|s| s.step == ProcessingStep::Transcription)
        .unwrap();
    assert_eq!(transcription_stat.items_total, 5);
    assert_eq!(transcription_stat.items_succeeded, 4);
    assert_eq!(transcription_stat.items_failed, 1);

    // VAD scratch space was released despite the failed segment
    assert_eq!(h.audio.cleaned.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn mic_only_recording_produces_audio_observations_and_blocks() {
    let h = harness(
        MockAudio::with_segments(3),
        MockTranscription::new(&["/tmp/seg-1.wav"]),
        MockVideo::empty(),
    );
    h.db.insert_recording(&raw_recording("rec-mic", true, false))
        .await
        .unwrap();

    let done = h.pipeline.process_recording("rec-mic", false).await.unwrap();
    assert_eq!(done.status, RecordingStatus::Processed);
    assert_eq!(done.processing_step, None);

    assert_eq!(
        h.db.count_observations("rec-mic", Modality::Audio)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        h.db.count_clusters("rec-mic", Modality::Visual)
            .await
            .unwrap(),
        0
    );
    // 0-5s and 10-15s sit within the 30s gap, so one audio cluster
    assert_eq!(
        h.db.count_clusters("rec-mic", Modality::Audio)
            .await
            .unwrap(),
        1
    );

    let blocks = h
        .db
        .get_topic_blocks_for_recording("rec-mic")
        .await
        .unwrap();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].classification.scores.working > 0);
    assert!(!blocks[0].context_ids.is_empty());
}

#[tokio::test]
async fn recording_without_any_content_fails_explicitly() {
    let h = harness(
        MockAudio::with_segments(0),
        MockTranscription::new(&[]),
        MockVideo::empty(),
    );
    h.db.insert_recording(&raw_recording("rec-empty", false, false))
        .await
        .unwrap();

    let err = h
        .pipeline
        .process_recording("rec-empty", false)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("no content"));

    let rec = h.db.get_recording("rec-empty").await.unwrap().unwrap();
    assert_eq!(rec.status, RecordingStatus::Error);
    assert!(rec.error_message.unwrap().contains("no content"));
    // The failed step is retained so a later run can resume
    assert!(rec.processing_step.is_some());

    let runs = h.db.get_runs_for_recording("rec-empty").await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn resume_from_ocr_does_not_rerun_audio_phases() {
    let h = harness(
        MockAudio::with_segments(3),
        MockTranscription::new(&[]),
        MockVideo::with_frames(4),
    );

    // A previous run failed at ocr_processing after committing its audio batch.
    let mut rec = raw_recording("rec-resume", true, true);
    rec.status = RecordingStatus::Error;
    rec.processing_step = Some(ProcessingStep::OcrProcessing);
    rec.error_message = Some("ocr engine died".to_string());
    h.db.insert_recording(&rec).await.unwrap();

    let captured_at = rec.captured_at;
    let prior_audio: Vec<Observation> = (0..2)
        .map(|i| {
            Observation::Audio(AudioObservation {
                id: format!("prior-{i}"),
                recording_id: "rec-resume".to_string(),
                source: AudioSource::Mic,
                kind: AudioKind::Speech,
                start_time: captured_at + chrono::Duration::seconds(i * 10),
                end_time: captured_at + chrono::Duration::seconds(i * 10 + 5),
                text: format!("previously transcribed {i}"),
            })
        })
        .collect();
    h.db.insert_observations(&prior_audio).await.unwrap();

    let done = h
        .pipeline
        .process_recording("rec-resume", false)
        .await
        .unwrap();
    assert_eq!(done.status, RecordingStatus::Processed);

    // Audio phases never ran again
    assert_eq!(h.audio.vad_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.transcription.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.db.count_observations("rec-resume", Modality::Audio)
            .await
            .unwrap(),
        2
    );
    // The visual group did run
    assert_eq!(
        h.db.count_observations("rec-resume", Modality::Visual)
            .await
            .unwrap(),
        4
    );

    let runs = h.db.get_runs_for_recording("rec-resume").await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_type, RunType::Resume);
    let stats = h.db.get_phase_stats_for_run(&runs[0].id).await.unwrap();
    let vad_stat = stats
        .iter()
        .find(|s| s.step == ProcessingStep::Vad)
        .unwrap();
    assert_eq!(vad_stat.outcome, PhaseOutcome::Skipped);
}

#[tokio::test]
async fn force_reprocessing_regenerates_all_derived_rows() {
    let h = harness(
        MockAudio::with_segments(2),
        MockTranscription::new(&[]),
        MockVideo::empty(),
    );
    h.db.insert_recording(&raw_recording("rec-force", true, false))
        .await
        .unwrap();

    h.pipeline
        .process_recording("rec-force", false)
        .await
        .unwrap();
    let first_ids: HashSet<String> = h
        .db
        .get_observations_for_recording("rec-force")
        .await
        .unwrap()
        .iter()
        .map(|o| o.id().to_string())
        .collect();
    assert_eq!(first_ids.len(), 2);

    h.pipeline
        .process_recording("rec-force", true)
        .await
        .unwrap();
    let second_ids: HashSet<String> = h
        .db
        .get_observations_for_recording("rec-force")
        .await
        .unwrap()
        .iter()
        .map(|o| o.id().to_string())
        .collect();

    assert_eq!(second_ids.len(), 2);
    assert!(first_ids.is_disjoint(&second_ids));
    assert_eq!(
        h.db.get_topic_blocks_for_recording("rec-force")
            .await
            .unwrap()
            .len(),
        1
    );

    let runs = h.db.get_runs_for_recording("rec-force").await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run_type, RunType::Initial);
    assert_eq!(runs[1].run_type, RunType::Force);
}

#[tokio::test]
async fn pre_cancelled_run_is_recorded_as_cancelled() {
    let h = harness(
        MockAudio::with_segments(2),
        MockTranscription::new(&[]),
        MockVideo::empty(),
    );
    h.db.insert_recording(&raw_recording("rec-cancel", true, false))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h
        .pipeline
        .process("rec-cancel", false, cancel)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("cancelled"));

    let runs = h.db.get_runs_for_recording("rec-cancel").await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Cancelled);
    // Nothing was transcribed and nothing derived was written
    assert_eq!(h.transcription.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.db.count_observations("rec-cancel", Modality::Audio)
            .await
            .unwrap(),
        0
    );
}
