mod preprocess;
mod session;

pub use preprocess::Preprocess;
pub use session::Session;

use crate::command::CommandRunner;
use crate::derive::ParameterDeriver;
use crate::error::{BatchError, RunFailure, ToolError};
use crate::layout::RunLayout;
use crate::manifest::RunManifest;
use crate::model::{BatchConfig, BatchEvent, BatchSummary, EventSink, InfoEvent, RunRecord};
use crate::tool::ExternalTool;
use std::path::Path;
use std::time::Instant;

/// Which batch to run.
pub enum Driver {
    Preprocess(Preprocess),
    Session(Session),
}

impl Driver {
    pub fn name(&self) -> &str {
        match self {
            Driver::Preprocess(_) => "preprocess",
            Driver::Session(s) => s.design_name(),
        }
    }
}

/// Collaborators shared by every run of a batch.
pub(crate) struct RunContext<'a> {
    pub cfg: &'a BatchConfig,
    pub runner: &'a CommandRunner,
    pub deriver: ParameterDeriver<'a>,
    pub tool: &'a ExternalTool,
    pub events: &'a EventSink,
}

impl RunContext<'_> {
    /// Run the analysis tool on `config` inside `run_dir` and log its exit status.
    pub(crate) async fn run_tool(&self, config: &Path, run_dir: &Path) -> Result<(), ToolError> {
        let output = self.tool.invoke(self.runner, config, run_dir).await?;
        let _ = self.events.send(BatchEvent::ToolFinished {
            config: config.to_path_buf(),
            status: output.status,
        });
        Ok(())
    }
}

pub struct BatchEngine {
    cfg: BatchConfig,
    driver: Driver,
}

impl BatchEngine {
    pub fn new(cfg: BatchConfig, driver: Driver) -> Self {
        Self { cfg, driver }
    }

    /// Process every run in manifest order. The first failing run aborts the batch;
    /// runs completed before it keep their outputs.
    pub async fn run(self, event_tx: EventSink) -> Result<BatchSummary, BatchError> {
        let started_utc = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into());

        let manifest = RunManifest::load(&self.cfg.manifest, self.cfg.id_width)?;
        let tool = ExternalTool::new(&self.cfg.tool)
            .map_err(|e| BatchError::Config(format!("invalid tool command: {e}")))?;
        let runner = CommandRunner::new(event_tx.clone());
        let ctx = RunContext {
            cfg: &self.cfg,
            runner: &runner,
            deriver: ParameterDeriver::new(&runner, &self.cfg.helpers, event_tx.clone()),
            tool: &tool,
            events: &event_tx,
        };

        let _ = event_tx.send(BatchEvent::BatchStarted {
            driver: self.driver.name().to_string(),
            runs: manifest.len(),
        });
        if manifest.is_empty() {
            let _ = event_tx.send(BatchEvent::Info(InfoEvent::EmptyManifest {
                path: self.cfg.manifest.clone(),
            }));
        }

        let mut records = Vec::with_capacity(manifest.len());
        for run in manifest.runs() {
            let _ = event_tx.send(BatchEvent::RunStarted { run: run.clone() });
            let layout = RunLayout::new(&self.cfg.working_dir, run);
            let t0 = Instant::now();

            let outcome: Result<RunRecord, RunFailure> = match &self.driver {
                Driver::Preprocess(p) => p.run_one(&ctx, &layout).await,
                Driver::Session(s) => s.run_one(&ctx, &layout).await,
            };

            match outcome {
                Ok(mut record) => {
                    record.elapsed_ms = t0.elapsed().as_millis() as u64;
                    let _ = event_tx.send(BatchEvent::RunCompleted {
                        record: record.clone(),
                    });
                    records.push(record);
                }
                Err(failure) => {
                    let _ = event_tx.send(BatchEvent::Info(InfoEvent::BatchAborted {
                        run: run.clone(),
                        reason: failure.to_string(),
                    }));
                    return Err(BatchError::run(run, failure));
                }
            }
        }

        Ok(BatchSummary {
            driver: self.driver.name().to_string(),
            working_dir: self.cfg.working_dir.clone(),
            log_file: self.cfg.log_file.clone(),
            started_utc,
            runs: records,
        })
    }
}
