//! Launching the analysis tool (FEAT) on a materialized design file.

use crate::command::{CommandLine, CommandOutput, CommandRunner, OutputMode};
use crate::error::{CommandError, ToolError};
use std::path::Path;

pub struct ExternalTool {
    command: CommandLine,
}

impl ExternalTool {
    pub fn new(command_line: &str) -> Result<Self, CommandError> {
        Ok(Self {
            command: CommandLine::parse(command_line)?,
        })
    }

    /// Run the tool on `config` with `run_dir` as its working directory, since FEAT
    /// resolves relative paths against its cwd.
    pub async fn invoke(
        &self,
        runner: &CommandRunner,
        config: &Path,
        run_dir: &Path,
    ) -> Result<CommandOutput, ToolError> {
        let cmd = self.command.clone().path_arg(config);
        runner
            .run(&cmd, Some(run_dir), OutputMode::Capture)
            .await
            .map_err(|err| {
                let status = err.status();
                match err {
                    CommandError::NonZeroExit { stdout, .. } => ToolError::Failed {
                        config: config.to_path_buf(),
                        status,
                        output: stdout,
                    },
                    source => ToolError::Launch {
                        config: config.to_path_buf(),
                        source,
                    },
                }
            })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn failure_carries_status_and_output() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let runner = CommandRunner::new(tx);
        let dir = tempfile::tempdir().unwrap();
        let tool = ExternalTool::new("sh -c 'echo feat broke; exit 4' feat").unwrap();
        let before = std::env::current_dir().unwrap();

        let err = tool
            .invoke(&runner, &dir.path().join("d.fsf"), dir.path())
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { status, output, .. } => {
                assert_eq!(status, Some(4));
                assert_eq!(output.trim(), "feat broke");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[tokio::test]
    async fn runs_inside_the_run_directory() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let runner = CommandRunner::new(tx);
        let dir = tempfile::tempdir().unwrap();
        // $0 is the config path, so the stub records both cwd and argument.
        let tool = ExternalTool::new(r#"sh -c 'pwd > seen.txt; echo "$0" >> seen.txt'"#).unwrap();
        let config = dir.path().join("block05_design.fsf");
        let before = std::env::current_dir().unwrap();

        tool.invoke(&runner, &config, dir.path()).await.unwrap();

        let seen = std::fs::read_to_string(dir.path().join("seen.txt")).unwrap();
        let mut lines = seen.lines();
        assert_eq!(
            std::fs::canonicalize(lines.next().unwrap()).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
        assert_eq!(lines.next().unwrap(), config.display().to_string());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }
}
