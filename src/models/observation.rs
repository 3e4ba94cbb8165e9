use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cluster::Modality;
use crate::time_range::TimeRange;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AudioSource {
    Mic,
    System,
}

impl AudioSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioSource::Mic => "mic",
            AudioSource::System => "system",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "mic" => Ok(AudioSource::Mic),
            "system" => Ok(AudioSource::System),
            other => Err(anyhow!("unknown audio source '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioKind {
    Speech,
    Music,
    Silence,
}

impl AudioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioKind::Speech => "speech",
            AudioKind::Music => "music",
            AudioKind::Silence => "silence",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "speech" => Ok(AudioKind::Speech),
            "music" => Ok(AudioKind::Music),
            "silence" => Ok(AudioKind::Silence),
            other => Err(anyhow!("unknown audio kind '{other}'")),
        }
    }
}

/// A transcribed speech segment from one audio source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioObservation {
    pub id: String,
    pub recording_id: String,
    pub source: AudioSource,
    pub kind: AudioKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub text: String,
}

/// A single extracted frame with whichever evidence survived enrichment.
/// `ocr_text`, `vlm_description` and `embedding` are each optional; a frame
/// with none of them is still a valid observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualObservation {
    pub id: String,
    pub recording_id: String,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub ocr_text: Option<String>,
    pub vlm_description: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "lowercase")]
pub enum Observation {
    Audio(AudioObservation),
    Visual(VisualObservation),
}

impl Observation {
    pub fn id(&self) -> &str {
        match self {
            Observation::Audio(o) => &o.id,
            Observation::Visual(o) => &o.id,
        }
    }

    pub fn recording_id(&self) -> &str {
        match self {
            Observation::Audio(o) => &o.recording_id,
            Observation::Visual(o) => &o.recording_id,
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            Observation::Audio(_) => Modality::Audio,
            Observation::Visual(_) => Modality::Visual,
        }
    }

    /// Visual observations are instants; their range is zero-length.
    pub fn time_range(&self) -> TimeRange {
        match self {
            Observation::Audio(o) => TimeRange::new(o.start_time, o.end_time),
            Observation::Visual(o) => TimeRange::new(o.timestamp, o.timestamp),
        }
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        match self {
            Observation::Audio(_) => None,
            Observation::Visual(o) => o.embedding.as_deref().filter(|e| !e.is_empty()),
        }
    }

    /// Text evidence used by merge scoring: transcript for audio, OCR text
    /// (falling back to the VLM description) for visual.
    pub fn text(&self) -> Option<&str> {
        match self {
            Observation::Audio(o) => Some(o.text.as_str()),
            Observation::Visual(o) => o.ocr_text.as_deref().or(o.vlm_description.as_deref()),
        }
    }
}
