use std::process::Command;

use crate::error::{Error, Result};

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external tools (openssl, the server reload command).
pub trait ProcessRunner {
    /// Runs `args[0]` with the remaining arguments and waits for it to exit.
    fn run(&self, args: &[String]) -> Result<ProcessOutput>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, args: &[String]) -> Result<ProcessOutput> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| Error::Local("empty command line".to_owned()))?;

        log::debug!("Running {args:?}");

        let output = Command::new(program)
            .args(rest)
            .output()
            .map_err(|err| Error::Local(format!("cannot run {program}: {err}")))?;

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
