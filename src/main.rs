//! Query a BIDS directory for new sessions and run MRIQC on them on the compute cluster
//!
//! `mriqc-sub participant` submits one job per subject/session that doesn't have a
//! complete set of reports yet. Once all participant jobs have finished,
//! `mriqc-sub group` submits the group-level job that writes the group reports
//! and feature tables.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};

use mriqc_sub::config::{Config, Level, Mode};
use mriqc_sub::orchestrate::Orchestrator;
use mriqc_sub::process::SystemRunner;
use mriqc_sub::scheduler::backend::Backend;

/// One year, far beyond any queue limit and well within minutes in a `u32`
const MAX_WALLTIME_HOURS: i64 = 24 * 366;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit participant-level jobs for new sessions
    Participant(ParticipantArgs),
    /// Submit the group-level job
    Group(CommonArgs),
}

#[derive(Args, Debug)]
struct ParticipantArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Selected sub-#/ses-# folders to process, otherwise all sessions in the BIDS directory
    #[arg(short, long, num_args = 1..)]
    sessions: Vec<String>,
    /// Required walltime in hours
    #[arg(short, long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..=MAX_WALLTIME_HOURS))]
    time: u32,
    /// Required free disk space of the local temporary working directory (in GB)
    #[arg(short, long, default_value_t = 50)]
    local_gb: u32,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// The BIDS directory with the subject data
    bids_dir: PathBuf,
    /// Where MRIQC writes the html reports (default: BIDS_DIR/derivatives/mriqc)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Persistent working directory root (default: a temporary directory)
    #[arg(short, long)]
    workdir: Option<PathBuf>,
    /// Reprocess with a clean working directory, even if reports exist
    #[arg(short, long)]
    force: bool,
    /// Submit even if a job with the same name is already running or scheduled
    #[arg(short, long)]
    ignore: bool,
    /// Required amount of memory in GB (default: 18 for participants, 1 for group)
    #[arg(short, long)]
    mem_gb: Option<u32>,
    /// Additional (opaque) arguments passed to MRIQC
    #[arg(short, long, default_value = "", allow_hyphen_values = true)]
    args: String,
    /// Additional (opaque) arguments passed to the resource manager
    #[arg(short, long, default_value = "", allow_hyphen_values = true)]
    qargs: String,
    /// Run the jobs locally, without submitting them
    #[arg(short, long)]
    nosub: bool,
    /// Only print the jobs, don't submit or run anything
    #[arg(short, long)]
    dryrun: bool,
    /// Resource manager (default: slurm if it's on the PATH, otherwise torque)
    #[arg(long, value_enum)]
    backend: Option<Backend>,
    /// Command that starts MRIQC, e.g. a container run prefix
    #[arg(long, default_value = "mriqc")]
    tool: String,
    /// Prefix of the scheduler job names
    #[arg(long, default_value = "qc")]
    job_prefix: String,
    /// Write all results as JSON to this file
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("starting up");

    let cli = Cli::parse();
    let submit_dir = env::current_dir()?;
    let (config, summary) = match cli.command {
        Commands::Participant(args) => {
            let mut config = config(Level::Participant, &args.common, &submit_dir);
            config.selection = args.sessions;
            config.resources.walltime_minutes = args.time * 60;
            config.resources.scratch_gb = Some(args.local_gb);
            (config, args.common.summary)
        }
        Commands::Group(args) => (config(Level::Group, &args, &submit_dir), args.summary),
    };
    info!("Using {} backend, output in {}", config.backend, config.output_dir.display());

    let report = Orchestrator::new(&config, &SystemRunner).run()?;
    println!("{}", report.summary(&config));

    if let Some(path) = summary {
        if let Err(err) = report.write_json(&path) {
            warn!("{:#}", err);
        }
    }

    Ok(())
}

/// Fold the command line and environment into one immutable configuration
fn config(level: Level, args: &CommonArgs, submit_dir: &Path) -> Config {
    let bids_dir = submit_dir.join(&args.bids_dir);
    let mut config = Config::new(level, bids_dir, submit_dir.to_path_buf());

    if let Some(output_dir) = &args.output_dir {
        config.output_dir = submit_dir.join(output_dir);
    }
    config.work_root = args.workdir.as_ref().map(|workdir| submit_dir.join(workdir));
    config.force = args.force;
    config.skip_running = !args.ignore;
    if let Some(mem_gb) = args.mem_gb {
        config.resources.mem_gb = mem_gb;
    }
    config.tool = args.tool.clone();
    config.tool_args = args.args.clone();
    config.scheduler_args = args.qargs.clone();
    config.mode = match (args.dryrun, args.nosub) {
        (true, local) => Mode::DryRun { local },
        (false, true) => Mode::LocalRun,
        (false, false) => Mode::Submit,
    };
    config.backend = args.backend
        .unwrap_or_else(|| Backend::detect(&env::var("PATH").unwrap_or_default()));
    config.job_prefix = args.job_prefix.clone();
    config
}
