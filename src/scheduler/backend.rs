use std::fmt;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;

use crate::process::{CommandOutput, CommandRunner, Invocation};
use crate::scheduler::job::JobDescription;
use crate::scheduler::template::{self, HeaderContext};

/// Supported resource managers
///
/// Everything that differs between schedulers lives in the methods below: the job
/// script header, the submit command, the queue query and its parser.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Slurm,
    Torque,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Backend::Slurm => write!(f, "slurm"),
            Backend::Torque => write!(f, "torque"),
        }
    }
}

impl Backend {
    /// Pick slurm if it's on the `PATH`, otherwise assume torque
    pub fn detect(path_var: &str) -> Backend {
        if path_var.contains("slurm") {
            Backend::Slurm
        } else {
            Backend::Torque
        }
    }

    /// Render the scheduler directives for a job (name, memory, walltime, scratch)
    pub fn render_header(&self, job: &JobDescription, time_now: DateTime<Utc>) -> Result<String, tinytemplate::error::Error> {
        let context = HeaderContext::new(job, time_now);
        match self {
            Backend::Slurm => template::render_slurm_header(&context),
            Backend::Torque => template::render_torque_header(&context),
        }
    }

    /// Submission command with the complete job script on stdin
    ///
    /// Extra scheduler arguments are passed through verbatim, split on whitespace.
    pub fn submit_invocation(&self, script: String, extra_args: &str) -> Invocation {
        let program = match self {
            Backend::Slurm => "sbatch",
            Backend::Torque => "qsub",
        };
        Invocation::new(program)
            .args(extra_args.split_whitespace())
            .stdin(script)
    }

    /// Names of all running, queued and held jobs visible to the scheduler
    pub fn list_jobs(&self, runner: &dyn CommandRunner) -> Result<Vec<String>> {
        match self {
            Backend::Slurm => {
                let squeue = Invocation::new("squeue").args(["-h", "-o", "%j"]);
                let output = checked(runner, &squeue)?;
                Ok(parse_squeue(&output.stdout))
            }
            Backend::Torque => {
                let qselect = Invocation::new("qselect").args(["-s", "RQH"]);
                let ids: Vec<String> = checked(runner, &qselect)?.stdout
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let qstat = Invocation::new("qstat").arg("-f").args(ids);
                let output = checked(runner, &qstat)?;
                Ok(parse_qstat(&output.stdout))
            }
        }
    }

    /// Command a user can run to follow jobs whose name contains `pattern`
    pub fn monitor_command(&self, pattern: &str) -> String {
        match self {
            Backend::Slurm => format!("squeue -u $USER | grep {pattern}"),
            Backend::Torque => format!("qstat -a $(qselect -s RQ) | grep {pattern}"),
        }
    }
}

fn checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<CommandOutput> {
    let output = runner.run(invocation)
        .map_err(|err| anyhow!("can't run {}: {}", invocation.program, err))?;
    if output.success() {
        Ok(output)
    } else {
        Err(anyhow!("{} exited with {:?}: {}", invocation.program, output.code, output.stderr.trim()))
    }
}

/// `squeue -h -o %j` prints one job name per line
fn parse_squeue(stdout: &str) -> Vec<String> {
    stdout.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `qstat -f` prints `Job_Name = <name>` inside each job block
fn parse_qstat(stdout: &str) -> Vec<String> {
    stdout.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key.trim() == "Job_Name").then(|| value.trim().to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_slurm_from_path() {
        assert_eq!(Backend::detect("/usr/bin:/opt/slurm/bin"), Backend::Slurm);
        assert_eq!(Backend::detect("/usr/bin:/opt/torque/bin"), Backend::Torque);
    }

    #[test]
    fn parses_squeue_names() {
        let names = parse_squeue("qc_sub-01_ses-1\n  qc_sub-02_ses-1 \n\n");
        assert_eq!(names, vec!["qc_sub-01_ses-1", "qc_sub-02_ses-1"]);
    }

    #[test]
    fn parses_qstat_job_names() {
        let stdout = "Job Id: 123.dccn-l029\n    Job_Name = qc_sub-01_ses-1\n    Job_Owner = user@host\n\
                      \nJob Id: 124.dccn-l029\n    Job_Name = qc_group\n    job_state = Q\n";
        assert_eq!(parse_qstat(stdout), vec!["qc_sub-01_ses-1", "qc_group"]);
    }

    #[test]
    fn submit_passes_extra_arguments() {
        let invocation = Backend::Slurm.submit_invocation("#!/bin/bash\n".to_string(), " --partition=batch  --qos=low ");
        assert_eq!(invocation.program, "sbatch");
        assert_eq!(invocation.args, vec!["--partition=batch", "--qos=low"]);
        assert_eq!(invocation.stdin.as_deref(), Some("#!/bin/bash\n"));
    }
}
