mod cluster;
mod context;
mod observation;
mod recording;
mod run;
mod topic_block;

pub use cluster::{Cluster, ClusterMerge, Modality};
pub use context::{Context, ContextType};
pub use observation::{AudioKind, AudioObservation, AudioSource, Observation, VisualObservation};
pub use recording::{ProcessingStep, Recording, RecordingStatus};
pub use run::{PhaseOutcome, PhaseStat, ProcessingRun, RunStatus, RunType};
pub use topic_block::{BlockClassification, TopicBlock};
