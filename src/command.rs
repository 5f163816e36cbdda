use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Select, after, bounded};
use log::{debug, warn};
use rustix::process::{Pid, Signal, kill_process};

use crate::error::CommandError;

/// Exit code and captured output of one invocation of the status tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            // Terminated by a signal.
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Runs the interface configuration tool with the given arguments.
///
/// A returned `CommandOutput` may still carry a non-zero exit code; use
/// `run_checked` to turn that into a `CommandError::NonZeroExit`. Timeouts and
/// failures to start the tool are always errors.
pub trait CommandRunner {
    fn program(&self) -> &str;

    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError>;

    fn run_checked(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
        let output = self.run(args, timeout)?;
        if !output.success() {
            return Err(CommandError::NonZeroExit {
                command: self.describe(args),
                code: output.code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut s = self.program().to_string();
        for arg in args {
            s.push(' ');
            s.push_str(arg);
        }
        s
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn program(&self) -> &str {
        (**self).program()
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
        (**self).run(args, timeout)
    }
}

/// The system `ifconfig` binary.
#[derive(Debug, Clone)]
pub struct Ifconfig {
    path: PathBuf,
    display: String,
}

impl Ifconfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let display = path.to_string_lossy().into_owned();
        Self { path, display }
    }
}

impl CommandRunner for Ifconfig {
    fn program(&self) -> &str {
        &self.display
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
        let command = self.describe(args);
        debug!("Running {}", &command);
        let child = Command::new(&self.path)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;
        let pid = child.id();

        let (done_tx, done_rx) = bounded::<io::Result<Output>>(1);
        thread::spawn(move || {
            let _ = done_tx.send(child.wait_with_output());
        });
        let timeout_rx = after(timeout);

        let mut select = Select::new();
        select.recv(&done_rx);
        select.recv(&timeout_rx);

        match select.ready() {
            0 => match done_rx.recv() {
                Ok(Ok(output)) => Ok(output.into()),
                Ok(Err(source)) => Err(CommandError::Spawn { command, source }),
                Err(e) => Err(CommandError::Spawn {
                    command,
                    source: io::Error::new(io::ErrorKind::BrokenPipe, e),
                }),
            },
            1 => {
                // The waiting thread reaps the child once it dies.
                if let Some(p) = Pid::from_raw(pid as i32)
                    && let Err(e) = kill_process(p, Signal::KILL)
                {
                    warn!("Unable to kill {} (pid {}): {}", &command, pid, e);
                }
                Err(CommandError::Timeout { command, timeout })
            }
            _ => unreachable!(),
        }
    }
}
