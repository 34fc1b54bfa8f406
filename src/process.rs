use std::fmt;
use std::io;
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use log::{debug, info, warn};
use serde::Serialize;

/// A program call with arguments and an optional script fed on stdin
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: &str) -> Invocation {
        Invocation { program: program.to_string(), args: Vec::new(), stdin: None }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Invocation {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, script: String) -> Invocation {
        self.stdin = Some(script);
        self
    }
}

/// Shell-like rendering, a script on stdin is shown as a quoted here-document so
/// the printed text can be pasted into a terminal without the shell expanding
/// `$TMPDIR` and friends
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(script) = &self.stdin {
            write!(f, " <<'EOF'\n{}\nEOF", script.trim_end())?;
        }
        Ok(())
    }
}

/// Exit code and captured streams of a finished process
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external commands and blocks until they exit
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

/// Spawns real processes
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(if invocation.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        info!("Running {} process", invocation.program);
        debug!("{:?}", &cmd);

        let mut child = cmd.spawn()?;
        if let (Some(script), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            match stdin.write_all(script.as_bytes()) {
                Ok(()) => {}
                // the child quit without reading all of it, its exit code and stderr tell why
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    warn!("{} exited before reading its input", invocation.program);
                }
                Err(err) => return Err(err),
            }
            // stdin is closed on drop so the child sees EOF
        }
        let output = child.wait_with_output()?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_here_document() {
        let invocation = Invocation::new("sbatch").arg("--parsable").stdin("#!/bin/bash\necho hi\n".to_string());
        assert_eq!(invocation.to_string(), "sbatch --parsable <<'EOF'\n#!/bin/bash\necho hi\nEOF");
    }

    #[test]
    fn system_runner_captures_streams() {
        let invocation = Invocation::new("sh").stdin("echo out; echo err >&2; exit 3".to_string());
        let output = SystemRunner.run(&invocation).unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[test]
    fn printed_command_replays_the_script_verbatim() {
        let script = "mriqc /bids /out participant -w $TMPDIR/sub-01_ses-1_x\n";
        let printed = Invocation::new("cat").stdin(script.to_string()).to_string();

        let output = SystemRunner.run(&Invocation::new("sh").arg("-c").arg(printed)).unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, script);
    }

    #[test]
    fn child_that_ignores_its_input_still_reports() {
        let script = "x".repeat(1 << 20);
        let invocation = Invocation::new("sh").arg("-c").arg("echo gone >&2; exit 4").stdin(script);

        let output = SystemRunner.run(&invocation).unwrap();

        assert_eq!(output.code, Some(4));
        assert_eq!(output.stderr.trim(), "gone");
    }

    #[test]
    fn missing_program_is_an_error() {
        let invocation = Invocation::new("definitely-not-a-scheduler-binary");
        assert!(SystemRunner.run(&invocation).is_err());
    }
}
