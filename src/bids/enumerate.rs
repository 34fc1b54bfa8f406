use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::bids::completion::{CompletionOracle, InputListing};
use crate::bids::unit::WorkUnit;

/// Finds the work units of a BIDS dataset
///
/// Units come out in directory-listing order, nothing is sorted.
pub struct Enumerator<'a> {
    bids_dir: &'a Path,
    oracle: &'a CompletionOracle,
}

impl<'a> Enumerator<'a> {
    pub fn new(bids_dir: &'a Path, oracle: &'a CompletionOracle) -> Enumerator<'a> {
        Enumerator { bids_dir, oracle }
    }

    /// Participant units for an explicit selection, or for every session in the dataset
    ///
    /// Selected entries (e.g. `sub-010/ses-mri01`) are resolved against the dataset
    /// root as given. Entries that don't exist are logged and produce no unit.
    pub fn participants(&self, selection: &[String]) -> io::Result<Vec<WorkUnit>> {
        let candidates = if selection.is_empty() {
            self.discover()?
        } else {
            selection.iter().map(|entry| self.bids_dir.join(entry)).collect()
        };

        let units = candidates.iter()
            .filter_map(|path| {
                if let Some(problem) = unusable(path) {
                    warn!("Skipping {}: {}", path.display(), problem);
                    return None;
                }
                let unit = self.unit(path);
                if unit.is_none() {
                    warn!("Not a BIDS subject or session directory: {}", path.display());
                }
                unit
            })
            .collect();

        Ok(units)
    }

    /// The single group unit, only once at least one participant has been processed
    pub fn group(&self) -> Option<WorkUnit> {
        if self.oracle.participant_reports_exist() {
            Some(WorkUnit::group(self.bids_dir, 1))
        } else {
            info!("No participant reports in {}, nothing to summarise at group level", self.oracle.output_dir().display());
            None
        }
    }

    fn unit(&self, path: &Path) -> Option<WorkUnit> {
        let unit = WorkUnit::from_session_dir(self.bids_dir, path, 0)?;
        let listing = InputListing::read(path);
        let expected_artifacts = self.oracle.expected_inputs(&unit.file_prefix(), &listing);
        Some(WorkUnit { expected_artifacts, ..unit })
    }

    /// All `sub-*/ses-*` directories, or `sub-*` when the dataset has no session folders
    fn discover(&self) -> io::Result<Vec<PathBuf>> {
        let subjects = subdirectories(self.bids_dir, "sub-")?;
        let mut sessions = Vec::new();
        for subject in &subjects {
            match subdirectories(subject, "ses-") {
                Ok(found) => sessions.extend(found),
                Err(err) => warn!("Can't list {}: {}", subject.display(), err),
            }
        }

        if sessions.is_empty() {
            info!("No session folders found, treating {} subject folders as single-session", subjects.len());
            Ok(subjects)
        } else {
            Ok(sessions)
        }
    }
}

/// Why a candidate can't be a unit directory, `None` if it can
fn unusable(path: &Path) -> Option<&'static str> {
    if path.is_dir() {
        None
    } else if path.exists() {
        Some("not a directory")
    } else {
        Some("directory does not exist")
    }
}

/// Directories in `dir` whose name starts with `prefix`, in listing order
fn subdirectories(dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path.file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with(prefix));
        if !matches {
            continue;
        }
        if path.is_dir() {
            found.push(path);
        } else {
            warn!("Skipping {}: not a directory", path.display());
        }
    }
    Ok(found)
}
