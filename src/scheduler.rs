//! Turn work units into cluster jobs and hand them to the resource manager

/// Resource manager profiles (slurm, torque)
pub mod backend;
/// Backend-agnostic job descriptions, built from a work unit and the run configuration
pub mod job;
/// Point-in-time view of jobs that are already queued or running
pub mod registry;
/// Render job scripts with TinyTemplate
pub mod template;
/// Submit, run locally or just report a job
pub mod submit;
