use std::fmt;
use std::fs;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::bids::unit::WorkUnit;
use crate::config::Mode;
use crate::process::{CommandOutput, CommandRunner, Invocation};
use crate::scheduler::backend::Backend;
use crate::scheduler::job::JobDescription;
use crate::scheduler::template;

/// Why a work unit was not submitted
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyComplete,
    AlreadyRunning,
    /// group level only: participant jobs of the same family are still in flight
    ParticipantsRunning,
    DryRun,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::AlreadyComplete => write!(f, "already complete"),
            SkipReason::AlreadyRunning => write!(f, "already running/queued"),
            SkipReason::ParticipantsRunning => write!(f, "participant jobs still running/queued"),
            SkipReason::DryRun => write!(f, "dry run"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Skipped(SkipReason),
    Submitted,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            Outcome::Submitted => write!(f, "submitted"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// What happened to one work unit in this pass
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmissionResult {
    pub unit: WorkUnit,
    pub job_name: String,
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    /// scheduler reply, e.g. the job id
    pub stdout: String,
    pub stderr: String,
    /// exact command text, for reproducing a submission by hand
    pub command: Option<String>,
}

impl SubmissionResult {
    pub fn skipped(unit: &WorkUnit, job_name: String, reason: SkipReason) -> SubmissionResult {
        SubmissionResult {
            unit: unit.clone(),
            job_name,
            outcome: Outcome::Skipped(reason),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            command: None,
        }
    }

    fn failed(unit: &WorkUnit, job: &JobDescription, command: Option<String>, stderr: String) -> SubmissionResult {
        SubmissionResult {
            unit: unit.clone(),
            job_name: job.name.clone(),
            outcome: Outcome::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr,
            command,
        }
    }
}

/// Hands jobs to a backend, runs them locally or only reports them
pub struct Submitter<'a> {
    backend: Backend,
    mode: Mode,
    runner: &'a dyn CommandRunner,
}

impl<'a> Submitter<'a> {
    pub fn new(backend: Backend, mode: Mode, runner: &'a dyn CommandRunner) -> Submitter<'a> {
        Submitter { backend, mode, runner }
    }

    /// The command that submits (or locally runs) the job
    ///
    /// Scheduler submissions get the full script (directives + body) on stdin,
    /// local runs feed only the body to bash.
    pub fn invocation(&self, job: &JobDescription, time_now: DateTime<Utc>) -> Result<Invocation, tinytemplate::error::Error> {
        let body = template::render_body(job)?;
        if self.mode.is_local() {
            Ok(Invocation::new("bash").stdin(body))
        } else {
            let header = self.backend.render_header(job, time_now)?;
            Ok(self.backend.submit_invocation(header + &body, &job.extra_scheduler_args))
        }
    }

    pub fn submit(&self, unit: &WorkUnit, job: &JobDescription) -> SubmissionResult {
        let invocation = match self.invocation(job, Utc::now()) {
            Ok(invocation) => invocation,
            Err(err) => {
                warn!("Can't render job script for {}: {}", job.name, err);
                return SubmissionResult::failed(unit, job, None, err.to_string());
            }
        };
        let command = invocation.to_string();

        match self.mode {
            Mode::DryRun { .. } => SubmissionResult {
                command: Some(command),
                ..SubmissionResult::skipped(unit, job.name.clone(), SkipReason::DryRun)
            },
            Mode::Submit => self.execute(unit, job, &invocation, command),
            Mode::LocalRun => {
                if let Err(err) = fs::create_dir_all(&job.working_directory) {
                    warn!("Can't create working directory {}: {}", job.working_directory.display(), err);
                    return SubmissionResult::failed(unit, job, Some(command), err.to_string());
                }
                let result = self.execute(unit, job, &invocation, command);
                if job.ephemeral {
                    remove_scratch(job);
                }
                result
            }
        }
    }

    fn execute(&self, unit: &WorkUnit, job: &JobDescription, invocation: &Invocation, command: String) -> SubmissionResult {
        match self.runner.run(invocation) {
            Ok(output) => into_result(unit, job, output, command),
            Err(err) => {
                warn!("Can't run {} for {}: {}", invocation.program, job.name, err);
                SubmissionResult::failed(unit, job, Some(command), err.to_string())
            }
        }
    }
}

/// Anything on stderr counts as a failure, as does a non-zero exit code
fn into_result(unit: &WorkUnit, job: &JobDescription, output: CommandOutput, command: String) -> SubmissionResult {
    let outcome = if output.success() && output.stderr.trim().is_empty() {
        let reply = output.stdout.trim();
        if !reply.is_empty() {
            info!("{}: {}", job.name, reply);
        }
        Outcome::Submitted
    } else {
        warn!("Job {} failed with exit code {:?}\n{}", job.name, output.code, output.stderr.trim());
        Outcome::Failed
    };
    SubmissionResult {
        unit: unit.clone(),
        job_name: job.name.clone(),
        outcome,
        exit_code: output.code,
        stdout: output.stdout,
        stderr: output.stderr,
        command: Some(command),
    }
}

/// Best effort, a leftover scratch directory is only worth a warning
fn remove_scratch(job: &JobDescription) {
    info!("Removing scratch directory {}", job.working_directory.display());
    if let Err(err) = fs::remove_dir_all(&job.working_directory) {
        warn!("Can't remove {}: {}", job.working_directory.display(), err);
    }
}
