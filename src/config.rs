use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::bids::unit::WorkUnit;
use crate::scheduler::backend::Backend;

/// Errors that stop a run before any work unit is looked at
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("BIDS directory not found: {}", .0.display())]
    MissingBidsDir(PathBuf),
    #[error("BIDS path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("Can't read BIDS directory {}: {source}", .path.display())]
    UnreadableBidsDir { path: PathBuf, source: std::io::Error },
    #[error("Invalid file pattern: {0}")]
    InvalidPattern(#[from] globset::Error),
}

/// Which MRIQC analysis level a run submits
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Participant,
    Group,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Level::Participant => write!(f, "participant"),
            Level::Group => write!(f, "group"),
        }
    }
}

/// What to do with a job once it is built
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Hand the job to the resource manager
    Submit,
    /// Run the job body here and now, without the resource manager
    LocalRun,
    /// Only print what would be submitted (or run, if `local`)
    DryRun { local: bool },
}

impl Mode {
    pub fn is_local(&self) -> bool {
        matches!(self, Mode::LocalRun | Mode::DryRun { local: true })
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, Mode::DryRun { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRequest {
    pub mem_gb: u32,
    pub walltime_minutes: u32,
    pub scratch_gb: Option<u32>,
}

impl ResourceRequest {
    pub const PARTICIPANT: ResourceRequest = ResourceRequest { mem_gb: 18, walltime_minutes: 8 * 60, scratch_gb: Some(50) };
    /// group jobs only aggregate existing metrics
    pub const GROUP: ResourceRequest = ResourceRequest { mem_gb: 1, walltime_minutes: 10, scratch_gb: None };
}

/// Everything a run needs to know, built once in `main` and never modified
#[derive(Clone, Debug)]
pub struct Config {
    pub level: Level,
    pub bids_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Persistent working directory root, scratch space is used if unset
    pub work_root: Option<PathBuf>,
    /// Explicit `sub-*/ses-*` entries, empty means everything
    pub selection: Vec<String>,
    pub force: bool,
    pub skip_running: bool,
    pub resources: ResourceRequest,
    /// Command that starts the QC tool (e.g. a container run prefix)
    pub tool: String,
    pub tool_args: String,
    pub scheduler_args: String,
    pub mode: Mode,
    pub backend: Backend,
    pub job_prefix: String,
    /// Directory jobs change into before running
    pub submit_dir: PathBuf,
    /// Scratch root for local runs
    pub local_scratch: PathBuf,
    /// Suffix that keeps ephemeral working directories of this invocation apart
    pub invocation_id: String,
}

impl Config {
    /// Defaults for a level, output goes to `<bids_dir>/derivatives/mriqc`
    pub fn new(level: Level, bids_dir: PathBuf, submit_dir: PathBuf) -> Config {
        let resources = match level {
            Level::Participant => ResourceRequest::PARTICIPANT,
            Level::Group => ResourceRequest::GROUP,
        };
        let invocation_id = format!("{}_{}", Utc::now().format("%Y%m%dT%H%M%S"), std::process::id());
        Config {
            level,
            output_dir: bids_dir.join("derivatives").join("mriqc"),
            bids_dir,
            work_root: None,
            selection: Vec::new(),
            force: false,
            skip_running: true,
            resources,
            tool: "mriqc".to_string(),
            tool_args: String::new(),
            scheduler_args: String::new(),
            mode: Mode::Submit,
            backend: Backend::Slurm,
            job_prefix: "qc".to_string(),
            submit_dir,
            local_scratch: std::env::temp_dir(),
            invocation_id,
        }
    }

    /// Check the dataset root before any unit is enumerated
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.bids_dir.exists() {
            return Err(ConfigError::MissingBidsDir(self.bids_dir.clone()));
        }
        if !self.bids_dir.is_dir() {
            return Err(ConfigError::NotADirectory(self.bids_dir.clone()));
        }
        Ok(())
    }

    /// `<prefix>_<label>`, e.g. `qc_sub-01_ses-1` or `qc_group`
    pub fn job_name(&self, unit: &WorkUnit) -> String {
        format!("{}_{}", self.job_prefix, unit.label())
    }

    /// Job name prefix of the jobs this pass has to know about
    ///
    /// Participant passes only care about participant jobs, the group level also
    /// waits for participants that are still in flight.
    pub fn running_prefix(&self) -> String {
        match self.level {
            Level::Participant => format!("{}_sub-", self.job_prefix),
            Level::Group => format!("{}_", self.job_prefix),
        }
    }
}
