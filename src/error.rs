//! Error taxonomy for batch runs.
//!
//! Each component owns a small error enum; `BatchError` ties a failure to the run it
//! happened in so the CLI can report which run aborted the batch.

use crate::manifest::RunId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest line {line} is shorter than the run id width: {content:?}")]
    MalformedLine { line: usize, content: String },
    #[error("run {run} is listed twice (again on line {line})")]
    DuplicateRun { run: String, line: usize },
    #[error("run id width must be at least one character")]
    ZeroWidth,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing template parameters: {}", names.join(", "))]
    MissingParameter { names: Vec<String> },
    #[error("malformed template at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
    #[error("pattern rule `{rule}` did not match the template")]
    PatternNotMatched { rule: String },
    #[error("invalid rewrite pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to write config file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot split command line (unbalanced quoting): {line}")]
    Parse { line: String },
    #[error("empty command line")]
    Empty,
    #[error("failed to launch `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {}", describe_status(*status))]
    NonZeroExit {
        command: String,
        status: Option<i32>,
        stdout: String,
    },
}

impl CommandError {
    /// Exit status of the failed child, if it exited normally.
    pub fn status(&self) -> Option<i32> {
        match self {
            CommandError::NonZeroExit { status, .. } => *status,
            _ => None,
        }
    }
}

pub(crate) fn describe_status(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("{what} helper failed")]
    Helper {
        what: &'static str,
        #[source]
        source: CommandError,
    },
    #[error("{what} helper printed {output:?}, expected a number")]
    Unparseable { what: &'static str, output: String },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch analysis tool for {}", config.display())]
    Launch {
        config: PathBuf,
        #[source]
        source: CommandError,
    },
    #[error("analysis tool exited with {} for {}", describe_status(*status), config.display())]
    Failed {
        config: PathBuf,
        status: Option<i32>,
        output: String,
    },
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("{0}")]
    Config(String),
    #[error("run {run} failed")]
    Run {
        run: RunId,
        #[source]
        source: RunFailure,
    },
}

/// What went wrong inside one run.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl BatchError {
    pub(crate) fn run(run: &RunId, source: impl Into<RunFailure>) -> Self {
        BatchError::Run {
            run: run.clone(),
            source: source.into(),
        }
    }
}
