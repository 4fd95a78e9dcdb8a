//! Process execution seam for SidecarLauncher invocations

use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Exit code and combined stdout/stderr of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was terminated by a signal
    pub code: Option<i32>,
    /// stdout followed by stderr, lossily decoded
    pub output: String,
}

impl CommandOutput {
    pub fn new(code: i32, output: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            output: output.into(),
        }
    }
}

/// Runs an external program to completion and captures its output
#[trait_variant::make(CommandRunner: Send)]
pub trait LocalCommandRunner {
    async fn run(&self, program: &Path, args: &[&str]) -> io::Result<CommandOutput>;
}

/// Runs commands as real child processes
///
/// The child is killed if the returned future is dropped, so a caller-side
/// timeout never leaves a hung launcher behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &Path, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            code: output.status.code(),
            output: text,
        })
    }
}
