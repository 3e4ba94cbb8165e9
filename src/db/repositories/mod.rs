mod clusters;
mod contexts;
mod observations;
mod recordings;
mod runs;
mod topic_blocks;
