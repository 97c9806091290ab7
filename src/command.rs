//! Subprocess execution.
//!
//! Every external program this tool runs goes through `CommandRunner`: the helper
//! scripts, the slice timing generator and the analysis tool itself. The working
//! directory is passed to the child explicitly; the process cwd is never changed.

use crate::error::CommandError;
use crate::model::{BatchEvent, EventSink, InfoEvent};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::Stdio;

/// A program plus its argument tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandLine {
    /// Split a command line using POSIX shell quoting rules.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let tokens = shlex::split(line).ok_or_else(|| CommandError::Parse {
            line: line.to_string(),
        })?;
        let mut it = tokens.into_iter();
        let program = it.next().ok_or(CommandError::Empty)?;
        Ok(Self {
            program: program.into(),
            args: it.map(OsString::from).collect(),
        })
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str().to_owned())
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(&self.program).chain(self.args.iter());
        let mut first = true;
        for w in words {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            let s = w.to_string_lossy();
            match shlex::try_quote(&s) {
                Ok(q) => f.write_str(&q)?,
                Err(_) => f.write_str(&s)?,
            }
        }
        Ok(())
    }
}

/// Whether the child's stdout is captured or passed through to ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Inherit,
    Capture,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    /// Empty unless run with `OutputMode::Capture`.
    pub stdout: String,
}

pub struct CommandRunner {
    events: EventSink,
}

impl CommandRunner {
    pub fn new(events: EventSink) -> Self {
        Self { events }
    }

    /// Run `cmd` to completion. Non-zero exit is an error carrying the status and
    /// whatever stdout was captured. No timeout: a hung child blocks the batch.
    pub async fn run(
        &self,
        cmd: &CommandLine,
        cwd: Option<&Path>,
        mode: OutputMode,
    ) -> Result<CommandOutput, CommandError> {
        let display = cmd.to_string();
        let _ = self.events.send(BatchEvent::CommandStarted {
            command: display.clone(),
            cwd: cwd.map(Path::to_path_buf),
        });

        let mut child = tokio::process::Command::new(&cmd.program);
        child
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit());
        if let Some(dir) = cwd {
            child.current_dir(dir);
        }
        child.stdout(match mode {
            OutputMode::Inherit => Stdio::inherit(),
            OutputMode::Capture => Stdio::piped(),
        });

        let output = child.output().await.map_err(|source| CommandError::Spawn {
            command: display.clone(),
            source,
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let status = output.status.code();
            let _ = self.events.send(BatchEvent::Info(InfoEvent::CommandFailed {
                command: display.clone(),
                status,
            }));
            return Err(CommandError::NonZeroExit {
                command: display,
                status,
                stdout,
            });
        }

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(0),
            stdout,
        })
    }
}
