//! The recording processing pipeline: a resumable, multi-phase batch job
//! over one finished recording.
//!
//! Phases run in a fixed order (VAD → transcription → frame extraction →
//! OCR → VLM enrichment → clustering → context creation → block formation).
//! The recording row's `processing_step` is advanced and persisted before
//! each phase's side-effecting work, so a crash mid-phase re-runs that
//! phase's group on the next attempt. The store is the only hand-off between
//! phase groups; each phase reads its input back from SQLite and persists
//! its output before the next phase starts.

pub mod blocks;
pub mod config;
pub mod context;
pub mod ingestion;

pub use config::PipelineConfig;
pub use context::RunContext;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio_util::sync::CancellationToken;

use crate::clustering::{cluster_observations, merge_audio_into_visual};
use crate::db::Database;
use crate::models::{
    Cluster, ContextType, Modality, Observation, PhaseOutcome, ProcessingStep, Recording,
    RunStatus, RunType, TopicBlock,
};
use crate::services::{
    AudioPreprocessor, FrameInfo, IntelligenceService, TranscriptionService, VideoService,
};
use crate::telemetry::{ItemCounts, Telemetry};
use crate::{log_error, log_info};

const ENABLE_LOGS: bool = true;

/// The external collaborators every run fans out to.
pub struct PipelineServices {
    pub audio: Arc<dyn AudioPreprocessor>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub video: Arc<dyn VideoService>,
    pub intelligence: Arc<dyn IntelligenceService>,
}

pub struct Pipeline {
    db: Database,
    services: PipelineServices,
    config: PipelineConfig,
    telemetry: Telemetry,
}

/// Where a stored step re-enters the phase order. Steps whose input only
/// lives in memory (segment audio, extracted frames) re-enter at the start
/// of their modality group; everything later re-enters exactly where it
/// stopped, because its input is already persisted.
fn resume_entry(step: ProcessingStep) -> ProcessingStep {
    match step {
        ProcessingStep::Vad | ProcessingStep::Transcription => ProcessingStep::Vad,
        ProcessingStep::FrameExtraction
        | ProcessingStep::OcrProcessing
        | ProcessingStep::VlmEnrichment => ProcessingStep::FrameExtraction,
        other => other,
    }
}

impl Pipeline {
    pub fn new(db: Database, services: PipelineServices, config: PipelineConfig) -> Self {
        let telemetry = Telemetry::new(db.clone());
        Self {
            db,
            services,
            config,
            telemetry,
        }
    }

    /// Telemetry handle, exposed so adapters can register their external
    /// processes with the resource sampler.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub async fn process_recording(&self, recording_id: &str, force: bool) -> Result<Recording> {
        self.process(recording_id, force, CancellationToken::new())
            .await
    }

    /// Run the pipeline over one recording. Without `force`, a recording
    /// with a stored step resumes from it; `force` deletes all derived rows
    /// and restarts from the first phase. Cancellation is cooperative,
    /// checked between phases; a cancelled run leaves the recording
    /// resumable at its last-entered step.
    pub async fn process(
        &self,
        recording_id: &str,
        force: bool,
        cancel: CancellationToken,
    ) -> Result<Recording> {
        let recording = self
            .db
            .get_recording(recording_id)
            .await?
            .ok_or_else(|| anyhow!("recording {recording_id} not found"))?;

        let run_type = if force {
            RunType::Force
        } else if recording.processing_step.is_some() {
            RunType::Resume
        } else {
            RunType::Initial
        };

        if force {
            self.clear_derived_state(recording_id).await?;
        }

        let entry = match run_type {
            RunType::Resume => resume_entry(
                recording
                    .processing_step
                    .unwrap_or_else(ProcessingStep::first),
            ),
            _ => ProcessingStep::first(),
        };

        let run = self.telemetry.run_started(recording_id, run_type).await?;
        let ctx = RunContext {
            run,
            recording_id: recording_id.to_string(),
            cancel,
            telemetry: self.telemetry.clone(),
        };

        let mut rec = recording.start_processing();
        if run_type == RunType::Resume {
            rec = rec.advance_step(entry);
        }
        self.db.update_recording_state(&rec).await?;

        match self.execute_phases(rec.clone(), &ctx, entry).await {
            Ok(done) => {
                self.telemetry
                    .run_finished(&ctx.run, RunStatus::Completed)
                    .await;
                Ok(done)
            }
            Err(err) if ctx.is_cancelled() => {
                // Step stays at the last-entered phase; status is left as-is
                // so a later run resumes instead of restarting.
                self.telemetry
                    .run_finished(&ctx.run, RunStatus::Cancelled)
                    .await;
                Err(err)
            }
            Err(err) => {
                let latest = match self.db.get_recording(recording_id).await {
                    Ok(Some(latest)) => latest,
                    _ => rec,
                };
                let failed = latest.fail_processing(format!("{err:#}"));
                if let Err(persist_err) = self.db.update_recording_state(&failed).await {
                    log_error!(
                        "failed to persist error state for {recording_id}: {persist_err:#}"
                    );
                }
                self.telemetry
                    .run_finished(&ctx.run, RunStatus::Failed)
                    .await;
                Err(err)
            }
        }
    }

    /// `force` cleanup: every derived row for the recording. Context links
    /// cascade with their observations; contexts themselves are shared and
    /// stay.
    async fn clear_derived_state(&self, recording_id: &str) -> Result<()> {
        let blocks = self.db.delete_topic_blocks_for_recording(recording_id).await?;
        let clusters = self.db.delete_clusters_for_recording(recording_id).await?;
        let observations = self
            .db
            .delete_observations_for_recording(recording_id)
            .await?;
        log_info!(
            "force reprocess of {recording_id}: dropped {blocks} blocks, {clusters} clusters, {observations} observations"
        );
        Ok(())
    }

    /// Advance the step, open the telemetry window, run the body, close the
    /// window with the body's counts. The advance is persisted before the
    /// body so a crash mid-phase resumes at this phase's group.
    async fn run_phase<T, Fut>(
        &self,
        ctx: &RunContext,
        rec: &mut Recording,
        step: ProcessingStep,
        body: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<(T, ItemCounts)>>,
    {
        if ctx.is_cancelled() {
            bail!("processing cancelled before {}", step.as_str());
        }

        *rec = rec.clone().advance_step(step);
        self.db.update_recording_state(rec).await?;

        let window = ctx.telemetry.phase_started(&ctx.run.id, step);
        match body.await {
            Ok((value, counts)) => {
                ctx.telemetry
                    .phase_finished(window, PhaseOutcome::Success, counts)
                    .await;
                Ok(value)
            }
            Err(err) => {
                let outcome = if ctx.is_cancelled() {
                    PhaseOutcome::Cancelled
                } else {
                    PhaseOutcome::Failed
                };
                ctx.telemetry
                    .phase_finished(window, outcome, ItemCounts::default())
                    .await;
                Err(err)
            }
        }
    }

    async fn execute_phases(
        &self,
        mut rec: Recording,
        ctx: &RunContext,
        entry: ProcessingStep,
    ) -> Result<Recording> {
        // Phases before the resume entry are on the ledger as skipped.
        for step in ProcessingStep::ORDERED {
            if step < entry && step != ProcessingStep::Complete {
                ctx.telemetry.phase_skipped(&ctx.run.id, step).await;
            }
        }

        // -- audio group -----------------------------------------------
        let mut extractions = Vec::new();
        if entry <= ProcessingStep::Vad {
            if rec.has_audio() {
                let snapshot = rec.clone();
                let audio = Arc::clone(&self.services.audio);
                let parallel = self.config.parallel_audio_sources;
                extractions = self
                    .run_phase(ctx, &mut rec, ProcessingStep::Vad, async move {
                        let extractions =
                            ingestion::extract_speech(audio, &snapshot, parallel).await?;
                        let sources = extractions.len();
                        Ok((extractions, ItemCounts::all_succeeded(sources)))
                    })
                    .await?;
            } else {
                ctx.telemetry
                    .phase_skipped(&ctx.run.id, ProcessingStep::Vad)
                    .await;
            }
        }

        if entry <= ProcessingStep::Transcription {
            if rec.has_audio() {
                let snapshot = rec.clone();
                let audio = Arc::clone(&self.services.audio);
                let transcription = Arc::clone(&self.services.transcription);
                let concurrency = self.config.transcription_concurrency;
                let db = self.db.clone();
                self.run_phase(ctx, &mut rec, ProcessingStep::Transcription, async move {
                    let output = ingestion::transcribe_extractions(
                        audio,
                        transcription,
                        &snapshot,
                        extractions,
                        concurrency,
                    )
                    .await?;
                    // Rebuild the audio batch from scratch; a previous
                    // attempt of this phase may have committed already.
                    db.delete_observations_by_modality(&snapshot.id, Modality::Audio)
                        .await?;
                    if !output.observations.is_empty() {
                        db.insert_observations(&output.observations).await?;
                    }
                    Ok(((), output.counts))
                })
                .await?;
            } else {
                ctx.telemetry
                    .phase_skipped(&ctx.run.id, ProcessingStep::Transcription)
                    .await;
            }
        }

        // -- visual group ----------------------------------------------
        let mut frames: Vec<FrameInfo> = Vec::new();
        if entry <= ProcessingStep::FrameExtraction {
            if rec.has_video() {
                let snapshot = rec.clone();
                let video = Arc::clone(&self.services.video);
                let config = self.config.clone();
                frames = self
                    .run_phase(ctx, &mut rec, ProcessingStep::FrameExtraction, async move {
                        let frames =
                            ingestion::extract_frames(video, &snapshot, &config).await?;
                        let count = frames.len();
                        Ok((frames, ItemCounts::all_succeeded(count)))
                    })
                    .await?;
            } else {
                ctx.telemetry
                    .phase_skipped(&ctx.run.id, ProcessingStep::FrameExtraction)
                    .await;
            }

            if !rec.has_audio() && frames.is_empty() {
                bail!("no content: recording has no audio sources and no extracted frames");
            }

            if frames.is_empty() {
                ctx.telemetry
                    .phase_skipped(&ctx.run.id, ProcessingStep::OcrProcessing)
                    .await;
                ctx.telemetry
                    .phase_skipped(&ctx.run.id, ProcessingStep::VlmEnrichment)
                    .await;
            } else {
                let video = Arc::clone(&self.services.video);
                let ocr_frames = frames.clone();
                let ocr_texts = self
                    .run_phase(ctx, &mut rec, ProcessingStep::OcrProcessing, async move {
                        let texts = video.run_ocr(&ocr_frames).await?;
                        let failed = texts.iter().filter(|t| t.is_none()).count();
                        let counts = ItemCounts::partial(texts.len(), failed);
                        Ok((texts, counts))
                    })
                    .await?;

                let snapshot = rec.clone();
                let intelligence = Arc::clone(&self.services.intelligence);
                let config = self.config.clone();
                let db = self.db.clone();
                let enrich_frames = frames.clone();
                self.run_phase(ctx, &mut rec, ProcessingStep::VlmEnrichment, async move {
                    let output = ingestion::enrich_frames(
                        intelligence,
                        &snapshot,
                        &enrich_frames,
                        &ocr_texts,
                        &config,
                    )
                    .await?;
                    db.delete_observations_by_modality(&snapshot.id, Modality::Visual)
                        .await?;
                    if !output.observations.is_empty() {
                        db.insert_observations(&output.observations).await?;
                    }
                    Ok(((), output.counts))
                })
                .await?;
            }
        }

        // -- derived phases (store-fed from here on) -------------------
        if entry <= ProcessingStep::Clustering {
            let recording_id = rec.id.clone();
            let db = self.db.clone();
            let clustering = self.config.clustering.clone();
            self.run_phase(ctx, &mut rec, ProcessingStep::Clustering, async move {
                let observations = db.get_observations_for_recording(&recording_id).await?;

                let audio_clusters = cluster_observations(
                    &recording_id,
                    &observations,
                    Modality::Audio,
                    &clustering,
                );
                let visual_clusters = cluster_observations(
                    &recording_id,
                    &observations,
                    Modality::Visual,
                    &clustering,
                );

                let cluster_texts = combined_cluster_texts(
                    audio_clusters.iter().chain(visual_clusters.iter()),
                    &observations,
                );
                let merges = merge_audio_into_visual(
                    &recording_id,
                    &audio_clusters,
                    &visual_clusters,
                    &cluster_texts,
                    &clustering,
                );

                let mut all = audio_clusters;
                all.extend(visual_clusters);
                let total = all.len();
                db.replace_clusters(&recording_id, &all, &merges).await?;
                Ok(((), ItemCounts::all_succeeded(total)))
            })
            .await?;
        }

        if entry <= ProcessingStep::ContextCreation {
            let recording_id = rec.id.clone();
            let db = self.db.clone();
            let intelligence = Arc::clone(&self.services.intelligence);
            self.run_phase(ctx, &mut rec, ProcessingStep::ContextCreation, async move {
                let counts =
                    create_contexts_for_clusters(&db, intelligence, &recording_id).await?;
                Ok(((), counts))
            })
            .await?;
        }

        if entry <= ProcessingStep::BlockFormation {
            let recording_id = rec.id.clone();
            let db = self.db.clone();
            self.run_phase(ctx, &mut rec, ProcessingStep::BlockFormation, async move {
                let counts = form_topic_blocks(&db, &recording_id).await?;
                Ok(((), counts))
            })
            .await?;
        }

        rec = rec.advance_step(ProcessingStep::Complete);
        self.db.update_recording_state(&rec).await?;
        rec = rec.complete_processing();
        self.db.update_recording_state(&rec).await?;
        log_info!("recording {} processed", rec.id);
        Ok(rec)
    }
}

/// Concatenated text evidence per cluster, keyed by cluster id. Fed to the
/// merge scorer.
fn combined_cluster_texts<'a>(
    clusters: impl Iterator<Item = &'a Cluster>,
    observations: &[Observation],
) -> HashMap<String, String> {
    let by_id: HashMap<&str, &Observation> =
        observations.iter().map(|o| (o.id(), o)).collect();

    clusters
        .map(|cluster| {
            let text = cluster
                .observation_ids
                .iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .filter_map(|o| o.text())
                .collect::<Vec<_>>()
                .join(" ");
            (cluster.id.clone(), text)
        })
        .collect()
}

/// Classify each cluster with text evidence, extract its named signals, and
/// persist contexts plus links to every member observation. Clusters with no
/// text at all are skipped.
async fn create_contexts_for_clusters(
    db: &Database,
    intelligence: Arc<dyn IntelligenceService>,
    recording_id: &str,
) -> Result<ItemCounts> {
    let observations = db.get_observations_for_recording(recording_id).await?;
    let clusters = db.get_clusters_for_recording(recording_id).await?;
    let by_id: HashMap<&str, &Observation> =
        observations.iter().map(|o| (o.id(), o)).collect();

    let total = clusters.len();
    for cluster in &clusters {
        let members: Vec<&Observation> = cluster
            .observation_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();

        let audio_text = members
            .iter()
            .filter(|o| o.modality() == Modality::Audio)
            .filter_map(|o| o.text())
            .collect::<Vec<_>>()
            .join(" ");
        let visual_text = members
            .iter()
            .filter(|o| o.modality() == Modality::Visual)
            .filter_map(|o| o.text())
            .collect::<Vec<_>>()
            .join(" ");

        let combined = [audio_text.as_str(), visual_text.as_str()]
            .iter()
            .filter(|t| !t.trim().is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if combined.trim().is_empty() {
            continue;
        }

        // classify requires a non-empty transcript; fall back to the visual
        // text when the cluster carries no speech.
        let transcript = if audio_text.trim().is_empty() {
            visual_text.as_str()
        } else {
            audio_text.as_str()
        };
        let visual_log = if visual_text.trim().is_empty() {
            None
        } else {
            Some(visual_text.as_str())
        };

        let classification = intelligence.classify(transcript, visual_log).await?;
        db.update_cluster_classification(&cluster.id, &classification)
            .await?;

        let metadata = intelligence
            .extract_metadata(&combined, &classification)
            .await?;
        let signals: [(ContextType, &Vec<String>); 4] = [
            (ContextType::App, &metadata.apps),
            (ContextType::Url, &metadata.urls),
            (ContextType::Project, &metadata.projects),
            (ContextType::Topic, &metadata.topics),
        ];
        for (context_type, names) in signals {
            for name in names {
                if name.trim().is_empty() {
                    continue;
                }
                let context = db.get_or_create_context(context_type, name).await?;
                db.link_context_to_observations(&context.id, &cluster.observation_ids)
                    .await?;
            }
        }
    }

    Ok(ItemCounts::all_succeeded(total))
}

/// Rebuild the recording's topic blocks from persisted clusters, merges and
/// context links. Delete-and-recreate, like clustering.
async fn form_topic_blocks(db: &Database, recording_id: &str) -> Result<ItemCounts> {
    let clusters = db.get_clusters_for_recording(recording_id).await?;
    let merges = db.get_merges_for_recording(recording_id).await?;
    let groups = blocks::group_clusters(&clusters, &merges);

    db.delete_topic_blocks_for_recording(recording_id).await?;

    let mut topic_blocks: Vec<TopicBlock> = Vec::with_capacity(groups.len());
    for group in &groups {
        let observation_ids = group.all_observation_ids();
        let contexts = db.get_contexts_for_observations(&observation_ids).await?;
        let topics: Vec<String> = contexts
            .iter()
            .filter(|c| c.context_type == ContextType::Topic)
            .map(|c| c.name.clone())
            .collect();
        let context_ids: Vec<String> = contexts.iter().map(|c| c.id.clone()).collect();
        topic_blocks.push(blocks::build_block(
            recording_id,
            group,
            context_ids,
            &topics,
        ));
    }

    if !topic_blocks.is_empty() {
        db.insert_topic_blocks(&topic_blocks).await?;
    }
    Ok(ItemCounts::all_succeeded(topic_blocks.len()))
}
