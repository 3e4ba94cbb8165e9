pub mod algorithm;
pub mod config;
pub mod merge;

pub use algorithm::{cluster_observations, cosine_similarity, mean_embedding};
pub use config::ClusteringConfig;
pub use merge::merge_audio_into_visual;
