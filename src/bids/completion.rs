use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use log::debug;
use serde::Serialize;

use crate::bids::unit::WorkUnit;

/// Existing versus expected reports for one work unit
///
/// Always derived from the current directory state, never cached between runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CompletionStatus {
    pub found: usize,
    pub expected: usize,
    pub is_complete: bool,
}

/// File names found in the data folders of a single session
#[derive(Clone, Debug, Default)]
pub struct InputListing {
    pub anat: Vec<String>,
    pub func: Vec<String>,
    pub extra_data: Vec<String>,
}

impl InputListing {
    /// Missing folders are treated as empty, most sessions have no `extra_data`
    pub fn read(session_dir: &Path) -> InputListing {
        InputListing {
            anat: list_names(&session_dir.join("anat")),
            func: list_names(&session_dir.join("func")),
            extra_data: list_names(&session_dir.join("extra_data")),
        }
    }
}

/// Decides whether the output directory already satisfies a work unit
///
/// A session is done if there is an html report for every anatomical (`*T?w.nii*`)
/// and functional (`*bold.nii*`) image in `anat`, `func` and `extra_data`. The
/// group level is done as soon as any `group_*.html` report exists.
pub struct CompletionOracle {
    output_dir: PathBuf,
    anatomical: GlobMatcher,
    functional: GlobMatcher,
    report: GlobMatcher,
    participant_report: GlobMatcher,
}

impl CompletionOracle {
    pub fn new(output_dir: &Path) -> Result<CompletionOracle, globset::Error> {
        Ok(CompletionOracle {
            output_dir: output_dir.to_path_buf(),
            anatomical: Glob::new("*T?w.nii*")?.compile_matcher(),
            functional: Glob::new("*bold.nii*")?.compile_matcher(),
            report: Glob::new("*.html")?.compile_matcher(),
            participant_report: Glob::new("sub-*.html")?.compile_matcher(),
        })
    }

    /// Count the input images of a session that should each produce one report
    pub fn expected_inputs(&self, prefix: &str, listing: &InputListing) -> usize {
        let anat = listing.anat.iter().chain(&listing.extra_data)
            .filter(|name| self.matches(&self.anatomical, prefix, name))
            .count();
        let func = listing.func.iter().chain(&listing.extra_data)
            .filter(|name| self.matches(&self.functional, prefix, name))
            .count();
        anat + func
    }

    /// Report file names in `outputs` that belong to the unit
    pub fn matching_reports<'a>(&self, unit: &WorkUnit, outputs: &'a [String]) -> Vec<&'a String> {
        let prefix = unit.file_prefix();
        outputs.iter()
            .filter(|name| self.matches(&self.report, &prefix, name))
            .collect()
    }

    /// Completion status given the file names currently in the output directory
    pub fn status_from_listing(&self, unit: &WorkUnit, outputs: &[String]) -> CompletionStatus {
        let found = self.matching_reports(unit, outputs).len();
        let expected = unit.expected_artifacts;
        let is_complete = if unit.is_group() {
            found > 0
        } else {
            // exact match: a grown input set must not look complete
            found == expected
        };
        CompletionStatus { found, expected, is_complete }
    }

    pub fn status(&self, unit: &WorkUnit) -> CompletionStatus {
        self.status_from_listing(unit, &self.output_names())
    }

    /// Paths of existing reports for the unit, removed before a forced rerun
    pub fn reports(&self, unit: &WorkUnit) -> Vec<PathBuf> {
        let outputs = self.output_names();
        self.matching_reports(unit, &outputs)
            .into_iter()
            .map(|name| self.output_dir.join(name))
            .collect()
    }

    /// Whether any participant has been processed, the gate for the group level
    pub fn participant_reports_exist(&self) -> bool {
        self.output_names().iter().any(|name| self.participant_report.is_match(name))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn output_names(&self) -> Vec<String> {
        list_names(&self.output_dir)
    }

    fn matches(&self, glob: &GlobMatcher, prefix: &str, name: &str) -> bool {
        name.strip_prefix(prefix).map_or(false, |rest| glob.is_match(rest))
    }
}

fn list_names(dir: &Path) -> Vec<String> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect(),
        Err(err) => {
            debug!("Can't list {}: {}", dir.display(), err);
            Vec::new()
        }
    }
}
