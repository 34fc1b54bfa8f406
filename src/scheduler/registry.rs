use std::collections::BTreeSet;

use log::{info, warn};
use serde::Serialize;

use crate::process::CommandRunner;
use crate::scheduler::backend::Backend;

/// Names of jobs that were running, queued or held when the scheduler was asked
///
/// A snapshot: jobs may start or finish between the query and any submission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunningJobSet {
    names: BTreeSet<String>,
}

impl RunningJobSet {
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.names.iter()
    }
}

impl FromIterator<String> for RunningJobSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        RunningJobSet { names: iter.into_iter().collect() }
    }
}

/// Asks the resource manager which jobs of a family are already in flight
pub struct RunningJobRegistry<'a> {
    backend: Backend,
    runner: &'a dyn CommandRunner,
}

impl<'a> RunningJobRegistry<'a> {
    pub fn new(backend: Backend, runner: &'a dyn CommandRunner) -> RunningJobRegistry<'a> {
        RunningJobRegistry { backend, runner }
    }

    /// Jobs whose name starts with `prefix`
    ///
    /// A failed query is logged and treated as "nothing running", so submission
    /// goes ahead. This is a best-effort check, not a guarantee.
    pub fn snapshot(&self, prefix: &str) -> RunningJobSet {
        match self.backend.list_jobs(self.runner) {
            Ok(names) => {
                let set: RunningJobSet = names.into_iter()
                    .filter(|name| name.starts_with(prefix))
                    .collect();
                info!("Found {} running or queued {} jobs matching {}*", set.len(), self.backend, prefix);
                set
            }
            Err(err) => {
                warn!("Can't query {} for running jobs, assuming none: {:#}", self.backend, err);
                RunningJobSet::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io;

    use super::*;
    use crate::process::{CommandOutput, Invocation};

    struct Fixed(io::Result<CommandOutput>);

    impl CommandRunner for Fixed {
        fn run(&self, _invocation: &Invocation) -> io::Result<CommandOutput> {
            match &self.0 {
                Ok(output) => Ok(output.clone()),
                Err(err) => Err(io::Error::new(err.kind(), err.to_string())),
            }
        }
    }

    /// Answers per program and records every call
    #[derive(Default)]
    struct PerProgram {
        replies: HashMap<&'static str, CommandOutput>,
        calls: RefCell<Vec<Invocation>>,
    }

    impl PerProgram {
        fn reply(mut self, program: &'static str, code: i32, stdout: &str) -> PerProgram {
            let output = CommandOutput { code: Some(code), stdout: stdout.to_string(), stderr: String::new() };
            self.replies.insert(program, output);
            self
        }

        fn programs(&self) -> Vec<String> {
            self.calls.borrow().iter().map(|call| call.program.clone()).collect()
        }
    }

    impl CommandRunner for PerProgram {
        fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
            self.calls.borrow_mut().push(invocation.clone());
            self.replies.get(invocation.program.as_str())
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "command not found"))
        }
    }

    const QSTAT: &str = "Job Id: 123.host
    Job_Name = qc_sub-01_ses-1
    job_state = R

Job Id: 124.host
    Job_Name = qc_sub-02_ses-1
    job_state = Q
";

    #[test]
    fn torque_ids_are_passed_to_qstat() {
        let runner = PerProgram::default()
            .reply("qselect", 0, "123.host\n124.host\n")
            .reply("qstat", 0, QSTAT);

        let set = RunningJobRegistry::new(Backend::Torque, &runner).snapshot("qc_sub-");

        assert_eq!(runner.programs(), vec!["qselect", "qstat"]);
        let calls = runner.calls.borrow();
        assert_eq!(calls[0].args, vec!["-s", "RQH"]);
        assert_eq!(calls[1].args, vec!["-f", "123.host", "124.host"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("qc_sub-01_ses-1"));
        assert!(set.contains("qc_sub-02_ses-1"));
    }

    #[test]
    fn empty_torque_queue_skips_qstat() {
        let runner = PerProgram::default().reply("qselect", 0, "\n");

        let set = RunningJobRegistry::new(Backend::Torque, &runner).snapshot("qc_");

        assert!(set.is_empty());
        assert_eq!(runner.programs(), vec!["qselect"]);
    }

    #[test]
    fn failing_qselect_degrades_to_empty() {
        let runner = PerProgram::default()
            .reply("qselect", 1, "123.host\n")
            .reply("qstat", 0, QSTAT);
        assert!(RunningJobRegistry::new(Backend::Torque, &runner).snapshot("qc_").is_empty());
        assert_eq!(runner.programs(), vec!["qselect"]);

        let missing = PerProgram::default();
        assert!(RunningJobRegistry::new(Backend::Torque, &missing).snapshot("qc_").is_empty());
        assert_eq!(missing.programs(), vec!["qselect"]);
    }

    #[test]
    fn snapshot_filters_by_prefix() {
        let runner = Fixed(Ok(CommandOutput {
            code: Some(0),
            stdout: "qc_sub-01_ses-1\nqc_group\nfmriprep_sub-01\n".to_string(),
            stderr: String::new(),
        }));
        let set = RunningJobRegistry::new(Backend::Slurm, &runner).snapshot("qc_sub-");
        assert_eq!(set.len(), 1);
        assert!(set.contains("qc_sub-01_ses-1"));
        assert!(!set.contains("qc_group"));
    }

    #[test]
    fn missing_scheduler_degrades_to_empty() {
        let runner = Fixed(Err(io::Error::new(io::ErrorKind::NotFound, "squeue not found")));
        assert!(RunningJobRegistry::new(Backend::Slurm, &runner).snapshot("qc_").is_empty());
    }

    #[test]
    fn failing_query_degrades_to_empty() {
        let runner = Fixed(Ok(CommandOutput {
            code: Some(1),
            stdout: "qc_sub-01_ses-1\n".to_string(),
            stderr: "slurm_load_jobs error: Unable to contact slurm controller".to_string(),
        }));
        assert!(RunningJobRegistry::new(Backend::Slurm, &runner).snapshot("qc_").is_empty());
    }
}
