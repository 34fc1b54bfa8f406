use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

/// What a work unit covers
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitKind {
    ParticipantSession { subject: String, session: String },
    Participant { subject: String },
    Group,
}

/// One schedulable item, built once per enumeration pass and never mutated
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkUnit {
    pub kind: UnitKind,
    pub source_path: PathBuf,
    /// Number of reports this unit should eventually produce
    pub expected_artifacts: usize,
}

impl WorkUnit {
    /// Build a participant unit from a `sub-*[/ses-*]` directory
    ///
    /// The subject and session labels are taken from the path components below
    /// `bids_dir`, so both `sub-01/ses-1` and a bare `sub-01` resolve. Returns
    /// `None` if no component starts with `sub-`.
    pub fn from_session_dir(bids_dir: &Path, path: &Path, expected_artifacts: usize) -> Option<WorkUnit> {
        let relative = path.strip_prefix(bids_dir).unwrap_or(path);
        let subject = find_component(relative, "sub-")?;
        let kind = match find_component(relative, "ses-") {
            Some(session) => UnitKind::ParticipantSession { subject, session },
            None => UnitKind::Participant { subject },
        };
        Some(WorkUnit { kind, source_path: path.to_path_buf(), expected_artifacts })
    }

    pub fn group(bids_dir: &Path, expected_artifacts: usize) -> WorkUnit {
        WorkUnit { kind: UnitKind::Group, source_path: bids_dir.to_path_buf(), expected_artifacts }
    }

    pub fn subject_id(&self) -> Option<&str> {
        match &self.kind {
            UnitKind::ParticipantSession { subject, .. } | UnitKind::Participant { subject } => Some(subject.as_str()),
            UnitKind::Group => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.kind {
            UnitKind::ParticipantSession { session, .. } => Some(session.as_str()),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, UnitKind::Group)
    }

    /// Filename prefix shared by the unit's inputs and reports, e.g. `sub-01_ses-1_`
    /// or `sub-01_` for a subject without session folders
    pub fn file_prefix(&self) -> String {
        match &self.kind {
            UnitKind::ParticipantSession { subject, session } => format!("{subject}_{session}_"),
            UnitKind::Participant { subject } => format!("{subject}_"),
            UnitKind::Group => "group_".to_string(),
        }
    }

    /// Stable identity used in job names and persistent working directories
    pub fn label(&self) -> String {
        match &self.kind {
            UnitKind::ParticipantSession { subject, session } => format!("{subject}_{session}"),
            UnitKind::Participant { subject } => subject.clone(),
            UnitKind::Group => "group".to_string(),
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

fn find_component(path: &Path, prefix: &str) -> Option<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .find(|part| part.starts_with(prefix))
        .map(str::to_string)
}
