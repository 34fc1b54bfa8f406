//! Submit MRIQC participant and group jobs to a cluster, skipping work that is
//! already done or already queued

/// Discover work units in a BIDS directory and check their existing output
pub mod bids;
/// Immutable run configuration assembled from the command line
pub mod config;
/// Drive a single pass over all work units
pub mod orchestrate;
/// Spawn external commands (scheduler, QC tool) behind a swappable trait
pub mod process;
/// Job descriptions, backend profiles, running-job queries and submission
pub mod scheduler;
