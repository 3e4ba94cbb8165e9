use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Raw,
    Processing,
    Processed,
    Error,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Raw => "raw",
            RecordingStatus::Processing => "processing",
            RecordingStatus::Processed => "processed",
            RecordingStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "raw" => Ok(RecordingStatus::Raw),
            "processing" => Ok(RecordingStatus::Processing),
            "processed" => Ok(RecordingStatus::Processed),
            "error" => Ok(RecordingStatus::Error),
            other => Err(anyhow!("unknown recording status '{other}'")),
        }
    }
}

/// Pipeline phases in execution order. The persisted step is the durable
/// resume point: it is advanced *before* a phase's side-effecting work, so a
/// crash mid-phase re-runs that phase on the next attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    Vad,
    Transcription,
    FrameExtraction,
    OcrProcessing,
    VlmEnrichment,
    Clustering,
    ContextCreation,
    BlockFormation,
    Complete,
}

impl ProcessingStep {
    pub const ORDERED: [ProcessingStep; 9] = [
        ProcessingStep::Vad,
        ProcessingStep::Transcription,
        ProcessingStep::FrameExtraction,
        ProcessingStep::OcrProcessing,
        ProcessingStep::VlmEnrichment,
        ProcessingStep::Clustering,
        ProcessingStep::ContextCreation,
        ProcessingStep::BlockFormation,
        ProcessingStep::Complete,
    ];

    pub fn first() -> ProcessingStep {
        ProcessingStep::Vad
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::Vad => "vad",
            ProcessingStep::Transcription => "transcription",
            ProcessingStep::FrameExtraction => "frame_extraction",
            ProcessingStep::OcrProcessing => "ocr_processing",
            ProcessingStep::VlmEnrichment => "vlm_enrichment",
            ProcessingStep::Clustering => "clustering",
            ProcessingStep::ContextCreation => "context_creation",
            ProcessingStep::BlockFormation => "block_formation",
            ProcessingStep::Complete => "complete",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "vad" => Ok(ProcessingStep::Vad),
            "transcription" => Ok(ProcessingStep::Transcription),
            "frame_extraction" => Ok(ProcessingStep::FrameExtraction),
            "ocr_processing" => Ok(ProcessingStep::OcrProcessing),
            "vlm_enrichment" => Ok(ProcessingStep::VlmEnrichment),
            "clustering" => Ok(ProcessingStep::Clustering),
            "context_creation" => Ok(ProcessingStep::ContextCreation),
            "block_formation" => Ok(ProcessingStep::BlockFormation),
            "complete" => Ok(ProcessingStep::Complete),
            other => Err(anyhow!("unknown processing step '{other}'")),
        }
    }
}

/// One captured session and its processing lifecycle.
///
/// Owned exclusively by the pipeline; the four transition methods are the
/// only sanctioned mutations, and each returns a new value that must be
/// persisted immediately (the persisted row, not memory, drives resume).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub status: RecordingStatus,
    pub processing_step: Option<ProcessingStep>,
    pub error_message: Option<String>,
    pub video_path: Option<String>,
    pub mic_audio_path: Option<String>,
    pub system_audio_path: Option<String>,
    pub duration_secs: i64,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recording {
    pub fn has_audio(&self) -> bool {
        self.mic_audio_path.is_some() || self.system_audio_path.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_path.is_some()
    }

    /// Begin (or restart) processing from the earliest phase.
    pub fn start_processing(mut self) -> Recording {
        self.status = RecordingStatus::Processing;
        self.processing_step = Some(ProcessingStep::first());
        self.error_message = None;
        self.updated_at = Utc::now();
        self
    }

    /// Record entry into a phase; status is untouched.
    pub fn advance_step(mut self, step: ProcessingStep) -> Recording {
        self.processing_step = Some(step);
        self.updated_at = Utc::now();
        self
    }

    pub fn complete_processing(mut self) -> Recording {
        self.status = RecordingStatus::Processed;
        self.processing_step = None;
        self.error_message = None;
        self.updated_at = Utc::now();
        self
    }

    /// Mark failure. The step is retained so a later run can resume from the
    /// phase that failed; `start_processing` is what clears the error.
    pub fn fail_processing(mut self, message: impl Into<String>) -> Recording {
        self.status = RecordingStatus::Error;
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
        self
    }
}
