//! desklog: a resumable processing pipeline that turns a finished
//! screen/audio recording into transcripts, visual observations, clusters
//! and classified topic blocks, persisted in SQLite.
//!
//! External tools (VAD, transcription, OCR, vision models) sit behind the
//! traits in [`services`]; the pipeline in [`pipeline`] orchestrates them
//! with bounded concurrency and per-item failure isolation, and resumes a
//! failed recording from its last-entered phase.

pub mod classification;
pub mod clustering;
pub mod db;
pub mod executor;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod telemetry;
pub mod time_range;
pub mod utils;

pub use classification::{aggregate, ActivityKind, Classification, DEFAULT_SCORE_THRESHOLD};
pub use db::Database;
pub use executor::map_bounded;
pub use pipeline::{Pipeline, PipelineConfig, PipelineServices};
pub use telemetry::{ResourceSampler, Telemetry};
pub use time_range::TimeRange;
