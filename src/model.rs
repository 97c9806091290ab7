use crate::manifest::RunId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Settings shared by both batch drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub working_dir: PathBuf,
    pub manifest: PathBuf,
    pub id_width: usize,
    /// Command line of the analysis tool; the config path is appended.
    pub tool: String,
    pub helpers: HelperCommands,
    pub log_file: PathBuf,
}

/// Command lines of the helper scripts; the input path is appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperCommands {
    pub volume_count: String,
    pub tr_duration: String,
    pub slice_timings: String,
}

impl Default for HelperCommands {
    fn default() -> Self {
        Self {
            volume_count: "sh getNumVolume.sh".into(),
            tr_duration: "sh getTRDuration.sh".into(),
            slice_timings: "sh makeSlicetimings.sh".into(),
        }
    }
}

/// Settings only the preprocessing driver uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub template: PathBuf,
    pub directories_file: PathBuf,
    pub structural_name: String,
    /// Raw DICOM glob handed to the slice timing helper; `{run}` is replaced.
    pub raw_pattern: String,
}

/// Log severity for batch events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Everything the batch reports while it runs. Passed through an `EventSink` to the
/// log writer instead of a process-wide logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
    BatchStarted {
        driver: String,
        runs: usize,
    },
    RunStarted {
        run: RunId,
    },
    CommandStarted {
        command: String,
        cwd: Option<PathBuf>,
    },
    ParameterDerived {
        name: String,
        value: String,
    },
    ConfigWritten {
        path: PathBuf,
    },
    ToolFinished {
        config: PathBuf,
        status: i32,
    },
    RunCompleted {
        record: RunRecord,
    },
    Info(InfoEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    EmptyManifest { path: PathBuf },
    ConfigLoaded { json: String },
    TemplateLoaded { path: PathBuf },
    CommandFailed { command: String, status: Option<i32> },
    BatchAborted { run: RunId, reason: String },
    SetupFailed { reason: String },
}

pub type EventSink = mpsc::UnboundedSender<BatchEvent>;

impl BatchEvent {
    pub fn level(&self) -> LogLevel {
        match self {
            BatchEvent::BatchStarted { .. }
            | BatchEvent::RunStarted { .. }
            | BatchEvent::CommandStarted { .. }
            | BatchEvent::RunCompleted { .. } => LogLevel::Info,
            BatchEvent::ParameterDerived { .. }
            | BatchEvent::ConfigWritten { .. }
            | BatchEvent::ToolFinished { .. } => LogLevel::Debug,
            BatchEvent::Info(InfoEvent::EmptyManifest { .. }) => LogLevel::Info,
            BatchEvent::Info(InfoEvent::ConfigLoaded { .. })
            | BatchEvent::Info(InfoEvent::TemplateLoaded { .. }) => LogLevel::Debug,
            BatchEvent::Info(InfoEvent::CommandFailed { .. })
            | BatchEvent::Info(InfoEvent::BatchAborted { .. })
            | BatchEvent::Info(InfoEvent::SetupFailed { .. }) => LogLevel::Error,
        }
    }

    /// Which part of the batch produced the event, shown in the log file.
    pub fn component(&self) -> &'static str {
        match self {
            BatchEvent::BatchStarted { .. } | BatchEvent::RunCompleted { .. } => "batch",
            BatchEvent::RunStarted { .. } => "manifest",
            BatchEvent::CommandStarted { .. } => "command",
            BatchEvent::ParameterDerived { .. } => "derive",
            BatchEvent::ConfigWritten { .. } => "template",
            BatchEvent::ToolFinished { .. } => "tool",
            BatchEvent::Info(InfoEvent::EmptyManifest { .. }) => "manifest",
            BatchEvent::Info(InfoEvent::TemplateLoaded { .. }) => "template",
            BatchEvent::Info(InfoEvent::CommandFailed { .. }) => "command",
            BatchEvent::Info(_) => "batch",
        }
    }

    pub fn to_message(&self) -> String {
        match self {
            BatchEvent::BatchStarted { driver, runs } => {
                format!("Starting {driver} batch over {runs} run(s)")
            }
            BatchEvent::RunStarted { run } => format!("Starting run {run}"),
            BatchEvent::CommandStarted { command, cwd } => match cwd {
                Some(dir) => format!("About to run (in {}):\n{}", dir.display(), command),
                None => format!("About to run:\n{command}"),
            },
            BatchEvent::ParameterDerived { name, value } => format!("{name} = {value}"),
            BatchEvent::ConfigWritten { path } => format!("Wrote {}", path.display()),
            BatchEvent::ToolFinished { config, status } => {
                format!("Tool finished {} with status {status}", config.display())
            }
            BatchEvent::RunCompleted { record } => format!(
                "Finished run {} in {}",
                record.run,
                humantime::format_duration(record.elapsed_rounded())
            ),
            BatchEvent::Info(info) => info.to_message(),
        }
    }
}

impl InfoEvent {
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::EmptyManifest { path } => {
                format!("Manifest {} lists no runs", path.display())
            }
            InfoEvent::ConfigLoaded { json } => format!("Batch config: {json}"),
            InfoEvent::TemplateLoaded { path } => format!("Read template from {}", path.display()),
            InfoEvent::CommandFailed { command, status } => format!(
                "Received non-zero return code ({}) from: {}",
                crate::error::describe_status(*status),
                command
            ),
            InfoEvent::BatchAborted { run, reason } => {
                format!("Aborting batch at run {run}: {reason}")
            }
            InfoEvent::SetupFailed { reason } => format!("Batch setup failed: {reason}"),
        }
    }
}

/// Outcome of one completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: RunId,
    pub config_file: PathBuf,
    #[serde(default)]
    pub volumes: Option<u32>,
    #[serde(default)]
    pub tr_seconds: Option<f64>,
    pub elapsed_ms: u64,
}

impl RunRecord {
    pub fn elapsed_rounded(&self) -> Duration {
        Duration::from_secs(self.elapsed_ms / 1000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub driver: String,
    pub working_dir: PathBuf,
    pub log_file: PathBuf,
    pub started_utc: String,
    pub runs: Vec<RunRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::run_id;

    #[test]
    fn failures_log_at_error_level() {
        let failed = BatchEvent::Info(InfoEvent::CommandFailed {
            command: "feat block05_design.fsf".into(),
            status: Some(3),
        });
        assert_eq!(failed.level(), LogLevel::Error);
        assert_eq!(failed.component(), "command");
        assert_eq!(
            failed.to_message(),
            "Received non-zero return code (status 3) from: feat block05_design.fsf"
        );

        let derived = BatchEvent::ParameterDerived {
            name: "numVolumes".into(),
            value: "120".into(),
        };
        assert_eq!(derived.level(), LogLevel::Debug);
        assert_eq!(derived.to_message(), "numVolumes = 120");
    }

    #[test]
    fn command_message_names_directory() {
        let ev = BatchEvent::CommandStarted {
            command: "feat design.fsf".into(),
            cwd: Some(PathBuf::from("/study/run05")),
        };
        assert_eq!(ev.to_message(), "About to run (in /study/run05):\nfeat design.fsf");
        assert_eq!(
            BatchEvent::RunStarted { run: run_id("05") }.to_message(),
            "Starting run 05"
        );
    }

    #[test]
    fn tool_and_manifest_events() {
        let done = BatchEvent::ToolFinished {
            config: PathBuf::from("/study/run05/block05_design.fsf"),
            status: 0,
        };
        assert_eq!(done.level(), LogLevel::Debug);
        assert_eq!(done.component(), "tool");
        assert_eq!(
            done.to_message(),
            "Tool finished /study/run05/block05_design.fsf with status 0"
        );

        let empty = BatchEvent::Info(InfoEvent::EmptyManifest {
            path: PathBuf::from("/study/to_process_main.txt"),
        });
        assert_eq!(empty.level(), LogLevel::Info);
        assert_eq!(empty.component(), "manifest");
        assert_eq!(
            empty.to_message(),
            "Manifest /study/to_process_main.txt lists no runs"
        );
    }

    #[test]
    fn elapsed_drops_sub_second_part() {
        let record = RunRecord {
            run: run_id("05"),
            config_file: PathBuf::from("run05/block05_design.fsf"),
            volumes: None,
            tr_seconds: None,
            elapsed_ms: 1_999,
        };
        assert_eq!(record.elapsed_rounded(), Duration::from_secs(1));
    }
}
