//! One pass over all work units: check completion, check the queue, build, submit
//!
//! Units are processed strictly one after another. The running-job snapshot is
//! taken once, before the first unit, and is not refreshed during the pass.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::bids::completion::CompletionOracle;
use crate::bids::enumerate::Enumerator;
use crate::bids::unit::WorkUnit;
use crate::config::{Config, ConfigError, Level, Mode};
use crate::process::CommandRunner;
use crate::scheduler::backend::Backend;
use crate::scheduler::job::{self, JobDescription};
use crate::scheduler::registry::{RunningJobRegistry, RunningJobSet};
use crate::scheduler::submit::{Outcome, SkipReason, SubmissionResult, Submitter};

pub struct Orchestrator<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn CommandRunner) -> Orchestrator<'a> {
        Orchestrator { config, runner }
    }

    /// Enumerate, snapshot the queue once, then process every unit
    ///
    /// Only configuration problems are returned as errors, failures of single
    /// units end up in the report.
    pub fn run(&self) -> Result<Report, ConfigError> {
        let config = self.config;
        config.validate()?;
        let oracle = CompletionOracle::new(&config.output_dir)?;
        let enumerator = Enumerator::new(&config.bids_dir, &oracle);

        let units = match config.level {
            Level::Participant => enumerator.participants(&config.selection)
                .map_err(|source| ConfigError::UnreadableBidsDir { path: config.bids_dir.clone(), source })?,
            Level::Group => enumerator.group().into_iter().collect(),
        };

        let running = if config.skip_running {
            RunningJobRegistry::new(config.backend, self.runner).snapshot(&config.running_prefix())
        } else {
            info!("Ignoring already running or scheduled jobs");
            RunningJobSet::default()
        };

        let results = self.process(&units, &oracle, &running);
        Ok(Report { level: config.level, mode: config.mode, backend: config.backend, results })
    }

    /// Process units in order against a fixed running-job snapshot
    pub fn process(&self, units: &[WorkUnit], oracle: &CompletionOracle, running: &RunningJobSet) -> Vec<SubmissionResult> {
        let submitter = Submitter::new(self.config.backend, self.config.mode, self.runner);
        let total = units.len();
        units.iter()
            .enumerate()
            .map(|(n, unit)| self.process_unit(unit, (n + 1, total), oracle, running, &submitter))
            .collect()
    }

    fn process_unit(
        &self,
        unit: &WorkUnit,
        (n, total): (usize, usize),
        oracle: &CompletionOracle,
        running: &RunningJobSet,
        submitter: &Submitter,
    ) -> SubmissionResult {
        let config = self.config;
        let status = oracle.status(unit);
        info!(">>> Found {}/{} existing MRIQC-reports for: {}", status.found, status.expected, unit);

        if status.is_complete && !config.force {
            info!("--> Nothing to do for job ({n}/{total}): {unit}");
            return SubmissionResult::skipped(unit, config.job_name(unit), SkipReason::AlreadyComplete);
        }

        let job = job::build(unit, config);
        if config.force {
            self.clean(unit, &job, oracle);
        }

        if config.skip_running {
            if running.contains(&job.name) {
                info!("--> Skipping already running / scheduled job ({n}/{total}): {}", job.name);
                return SubmissionResult::skipped(unit, job.name, SkipReason::AlreadyRunning);
            }
            if unit.is_group() && !running.is_empty() {
                info!("--> Skipping {} because {} participant jobs are still running / scheduled", job.name, running.len());
                return SubmissionResult::skipped(unit, job.name, SkipReason::ParticipantsRunning);
            }
        }

        let action = match config.mode {
            Mode::Submit => "Submitting",
            Mode::LocalRun => "Running",
            Mode::DryRun { .. } => "Would submit",
        };
        info!("--> {action} job ({n}/{total}): {}", job.name);
        submitter.submit(unit, &job)
    }

    /// Remove the working directory and reports of a unit before forced reprocessing
    ///
    /// Failures are logged and otherwise ignored. Nothing is removed in a dry run.
    fn clean(&self, unit: &WorkUnit, job: &JobDescription, oracle: &CompletionOracle) {
        let dry_run = self.config.mode.is_dry_run();
        if job.working_directory.is_dir() {
            info!("Cleaning: {}", job.working_directory.display());
            if !dry_run {
                if let Err(err) = fs::remove_dir_all(&job.working_directory) {
                    warn!("Can't remove {}: {}", job.working_directory.display(), err);
                }
            }
        }
        for report in oracle.reports(unit) {
            info!("Cleaning: {}", report.display());
            if !dry_run {
                if let Err(err) = fs::remove_file(&report) {
                    warn!("Can't remove {}: {}", report.display(), err);
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub skipped: usize,
    pub submitted: usize,
    pub failed: usize,
}

/// Results of one pass, in processing order
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub level: Level,
    pub mode: Mode,
    pub backend: Backend,
    pub results: Vec<SubmissionResult>,
}

impl Report {
    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for result in &self.results {
            match result.outcome {
                Outcome::Skipped(_) => counts.skipped += 1,
                Outcome::Submitted => counts.submitted += 1,
                Outcome::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Human readable summary with the command text of every job that was
    /// (or would have been) submitted, and a hint for what to do next
    pub fn summary(&self, config: &Config) -> String {
        let counts = self.counts();
        let mut text = String::from("\n----------------\n");

        if self.results.is_empty() {
            match self.level {
                Level::Participant => text.push_str(&format!("No BIDS subject/session folders found in {}\n", config.bids_dir.display())),
                Level::Group => text.push_str(&format!("No participant reports found in {}\n", config.output_dir.display())),
            }
            return text;
        }

        text.push_str(&format!(
            "{} {} units: {} skipped, {} submitted, {} failed\n",
            self.results.len(), self.level, counts.skipped, counts.submitted, counts.failed
        ));
        for result in &self.results {
            text.push_str(&format!("  {}: {}\n", result.unit, result.outcome));
            if let Some(command) = &result.command {
                text.push_str(&format!("{command}\n"));
            }
            if result.outcome == Outcome::Failed && !result.stderr.trim().is_empty() {
                text.push_str(&format!("ERROR {:?}: {}\n", result.exit_code, result.stderr.trim()));
            }
        }
        text.push('\n');

        if counts.failed > 0 {
            text.push_str(&format!("Done, but {} jobs failed. The commands above can be rerun by hand\n", counts.failed));
            return text;
        }

        match self.mode {
            Mode::DryRun { .. } => text.push_str("Done! NB: The printed jobs were not actually submitted\n"),
            Mode::LocalRun => {
                text.push_str("Done!\n");
                if self.level == Level::Participant && counts.submitted > 0 {
                    text.push_str(&group_hint(config));
                }
            }
            Mode::Submit => {
                if counts.submitted > 0 {
                    let pattern = match self.level {
                        Level::Participant => format!("{}_sub", config.job_prefix),
                        Level::Group => format!("{}_group", config.job_prefix),
                    };
                    text.push_str(&format!(
                        "Done! Now wait for the jobs to finish... Check that e.g. with this command:\n\n  {}\n\n",
                        self.backend.monitor_command(&pattern)
                    ));
                    if self.level == Level::Participant {
                        text.push_str(&group_hint(config));
                    }
                } else {
                    text.push_str("Done! Nothing was submitted\n");
                }
            }
        }
        text
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        info!("Writing summary to {}", path.display());
        fs::write(path, json).with_context(|| format!("Can't write summary to {}", path.display()))
    }
}

/// The group level depends on all participants, but nothing enforces the order
fn group_hint(config: &Config) -> String {
    format!(
        "When finished you can run e.g. a group-level QC analysis like this:\n\n  mriqc-sub group {}\n\n",
        config.bids_dir.display()
    )
}
