use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::bids::unit::WorkUnit;
use crate::config::{Config, Level};

/// Resource request of a single job
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub mem_gb: u32,
    pub walltime_minutes: u32,
    /// Local node storage, only requested for ephemeral working directories
    pub scratch_gb: Option<u32>,
}

impl Resources {
    /// Walltime as `HH:MM:SS`
    pub fn walltime(&self) -> String {
        format!("{:02}:{:02}:00", self.walltime_minutes / 60, self.walltime_minutes % 60)
    }
}

/// Everything needed to run one work unit, independent of the resource manager
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobDescription {
    /// Scheduler job name, unique per work unit
    pub name: String,
    pub resources: Resources,
    pub working_directory: PathBuf,
    /// Scratch directories are removed after a local run, persistent ones never are
    pub ephemeral: bool,
    /// Directory the job changes into before running the QC tool
    pub submit_directory: PathBuf,
    pub command_line: String,
    pub extra_scheduler_args: String,
}

/// Describe the job for a work unit
///
/// Pure: no filesystem access, no processes, the same inputs give the same job.
pub fn build(unit: &WorkUnit, config: &Config) -> JobDescription {
    let (working_directory, ephemeral) = working_directory(unit, config);

    let scratch_gb = match config.resources.scratch_gb {
        Some(gb) if ephemeral && !config.mode.is_local() => Some(gb),
        _ => None,
    };
    let resources = Resources {
        mem_gb: config.resources.mem_gb,
        walltime_minutes: config.resources.walltime_minutes,
        scratch_gb,
    };

    JobDescription {
        name: config.job_name(unit),
        resources,
        command_line: command_line(unit, config, &working_directory),
        working_directory,
        ephemeral,
        submit_directory: config.submit_dir.clone(),
        extra_scheduler_args: config.scheduler_args.trim().to_string(),
    }
}

/// `<work_root>/<label>` if a work root is given, otherwise a scratch directory
/// with the invocation suffix so concurrent submissions never share one
fn working_directory(unit: &WorkUnit, config: &Config) -> (PathBuf, bool) {
    match &config.work_root {
        Some(root) => (root.join(unit.label()), false),
        None => {
            let scratch = if config.mode.is_local() {
                config.local_scratch.clone()
            } else {
                // expanded by the shell on the compute node
                PathBuf::from("$TMPDIR")
            };
            (scratch.join(format!("{}_{}", unit.label(), config.invocation_id)), true)
        }
    }
}

fn command_line(unit: &WorkUnit, config: &Config, working_directory: &Path) -> String {
    let mut words = vec![
        config.tool.clone(),
        shell_word(&config.bids_dir),
        shell_word(&config.output_dir),
        config.level.to_string(),
        "-w".to_string(),
        shell_word(working_directory),
    ];

    if let Some(subject) = unit.subject_id() {
        words.push("--participant-label".to_string());
        words.push(subject.trim_start_matches("sub-").to_string());
    }
    if let Some(session) = unit.session_id() {
        words.push("--session-id".to_string());
        words.push(session.trim_start_matches("ses-").to_string());
    }
    if config.level == Level::Participant {
        words.extend(["--verbose-reports", "--ants-nthreads", "1"].map(str::to_string));
    }
    words.extend(["--mem_gb".to_string(), config.resources.mem_gb.to_string(), "--nprocs".to_string(), "1".to_string()]);

    // last, so the tool's own precedence lets them override the flags above
    let extra = config.tool_args.trim();
    if !extra.is_empty() {
        words.push(extra.to_string());
    }

    words.join(" ")
}

/// Double quote paths with whitespace, double quotes keep `$TMPDIR` expandable
fn shell_word(path: &Path) -> String {
    let text = path.display().to_string();
    if text.chars().any(char::is_whitespace) {
        format!("\"{text}\"")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn config(level: Level) -> Config {
        let mut config = Config::new(level, PathBuf::from("/project/bids"), PathBuf::from("/home/user"));
        config.invocation_id = "20230601T120000_42".to_string();
        config.local_scratch = PathBuf::from("/tmp");
        config
    }

    fn unit() -> WorkUnit {
        let root = Path::new("/project/bids");
        WorkUnit::from_session_dir(root, &root.join("sub-01/ses-1"), 3).unwrap()
    }

    #[test]
    fn build_is_deterministic() {
        let config = config(Level::Participant);
        assert_eq!(build(&unit(), &config), build(&unit(), &config));
    }

    #[test]
    fn participant_job_on_cluster_scratch() {
        let job = build(&unit(), &config(Level::Participant));
        assert_eq!(job.name, "qc_sub-01_ses-1");
        assert_eq!(job.working_directory, PathBuf::from("$TMPDIR/sub-01_ses-1_20230601T120000_42"));
        assert!(job.ephemeral);
        assert_eq!(job.resources, Resources { mem_gb: 18, walltime_minutes: 480, scratch_gb: Some(50) });
        assert_eq!(
            job.command_line,
            "mriqc /project/bids /project/bids/derivatives/mriqc participant -w $TMPDIR/sub-01_ses-1_20230601T120000_42 \
             --participant-label 01 --session-id 1 --verbose-reports --ants-nthreads 1 --mem_gb 18 --nprocs 1"
        );
    }

    #[test]
    fn persistent_work_root_is_reused_without_scratch() {
        let mut config = config(Level::Participant);
        config.work_root = Some(PathBuf::from("/project/work"));
        let job = build(&unit(), &config);
        assert_eq!(job.working_directory, PathBuf::from("/project/work/sub-01_ses-1"));
        assert!(!job.ephemeral);
        assert_eq!(job.resources.scratch_gb, None);
    }

    #[test]
    fn local_runs_use_local_scratch() {
        let mut config = config(Level::Participant);
        config.mode = Mode::LocalRun;
        let job = build(&unit(), &config);
        assert_eq!(job.working_directory, PathBuf::from("/tmp/sub-01_ses-1_20230601T120000_42"));
        assert_eq!(job.resources.scratch_gb, None);
    }

    #[test]
    fn extra_arguments_come_last() {
        let mut config = config(Level::Participant);
        config.tool_args = " --fft-spikes-detector --nprocs 4 ".to_string();
        config.scheduler_args = " --partition=batch ".to_string();
        let job = build(&unit(), &config);
        assert!(job.command_line.ends_with("--nprocs 1 --fft-spikes-detector --nprocs 4"));
        assert_eq!(job.extra_scheduler_args, "--partition=batch");
    }

    #[test]
    fn group_job_is_short_and_unlabelled() {
        let config = config(Level::Group);
        let job = build(&WorkUnit::group(Path::new("/project/bids"), 1), &config);
        assert_eq!(job.name, "qc_group");
        assert_eq!(job.resources.walltime(), "00:10:00");
        assert_eq!(job.resources.mem_gb, 1);
        assert!(!job.command_line.contains("--participant-label"));
        assert!(job.command_line.contains(" group -w "));
    }

    #[test]
    fn paths_with_spaces_are_quoted() {
        let mut config = config(Level::Participant);
        config.output_dir = PathBuf::from("/project/qc out");
        let job = build(&unit(), &config);
        assert!(job.command_line.contains(" \"/project/qc out\" participant "));
    }
}
