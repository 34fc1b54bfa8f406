use chrono::{DateTime, Utc};
use serde::Serialize;
use tinytemplate::error::Error;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::scheduler::job::JobDescription;

/// included header templates, one per backend
static SLURM_HEADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/slurm_header.txt"));
static TORQUE_HEADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/torque_header.txt"));
/// included job body template, shared by all backends and local runs
static JOB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/job.txt"));

/// Rendering context for scheduler directives
#[derive(Serialize)]
pub struct HeaderContext {
    name: String,
    mem_gb: u32,
    walltime: String,
    has_scratch: bool,
    scratch_gb: u32,
    time_now: String,
}

impl HeaderContext {
    pub fn new(job: &JobDescription, time_now: DateTime<Utc>) -> HeaderContext {
        HeaderContext {
            name: job.name.clone(),
            mem_gb: job.resources.mem_gb,
            walltime: job.resources.walltime(),
            has_scratch: job.resources.scratch_gb.is_some(),
            scratch_gb: job.resources.scratch_gb.unwrap_or_default(),
            time_now: time_now.to_string(),
        }
    }
}

/// Rendering context for the job body
#[derive(Serialize)]
struct BodyContext {
    submit_dir: String,
    command: String,
}

pub fn render_slurm_header(context: &HeaderContext) -> Result<String, Error> {
    render("slurm_header", SLURM_HEADER, context)
}

pub fn render_torque_header(context: &HeaderContext) -> Result<String, Error> {
    render("torque_header", TORQUE_HEADER, context)
}

/// Shell commands that run the QC tool from the submit directory
pub fn render_body(job: &JobDescription) -> Result<String, Error> {
    let context = BodyContext {
        submit_dir: job.submit_directory.display().to_string(),
        command: job.command_line.clone(),
    };
    render("job", JOB, &context)
}

fn render<C: Serialize>(name: &str, template: &str, context: &C) -> Result<String, Error> {
    let mut tt = TinyTemplate::new();
    // job scripts are shell, not HTML
    tt.set_default_formatter(&format_unescaped);
    tt.add_template(name, template)?;
    tt.render(name, context)
}
