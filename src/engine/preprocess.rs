//! First-level preprocessing batch.
//!
//! Every run gets a copy of the main design template with its input, output
//! directory, slice timing file, volume count and TR rewritten in place.

use super::RunContext;
use crate::command::{CommandLine, OutputMode};
use crate::error::{BatchError, RunFailure};
use crate::layout::RunLayout;
use crate::model::{BatchConfig, BatchEvent, EventSink, InfoEvent, PreprocessConfig, RunRecord};
use crate::template::{write_config_atomic, PatternRule, TemplateDocument};
use std::path::{Component, Path, PathBuf};

pub struct Preprocess {
    template: TemplateDocument,
    raw_pattern: String,
}

/// Read `PD_dir="..."` from the directories file.
fn structural_dir(directories: &str, working_dir: &Path) -> Option<PathBuf> {
    let re = regex::Regex::new(r#"PD_dir="(.*)""#).ok()?;
    let dir = PathBuf::from(re.captures(directories)?.get(1)?.as_str());
    Some(normalize(&working_dir.join(dir)))
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

impl Preprocess {
    /// Load the template and point it at the structural image. The template on disk
    /// is left untouched.
    pub fn prepare(
        cfg: &BatchConfig,
        pre: &PreprocessConfig,
        events: &EventSink,
    ) -> Result<Self, BatchError> {
        let dirs_text = std::fs::read_to_string(&pre.directories_file).map_err(|e| {
            BatchError::Config(format!(
                "cannot read {}: {e}",
                pre.directories_file.display()
            ))
        })?;
        let structural = structural_dir(&dirs_text, &cfg.working_dir)
            .ok_or_else(|| {
                BatchError::Config(format!(
                    "no PD_dir=\"...\" entry in {}",
                    pre.directories_file.display()
                ))
            })?
            .join(&pre.structural_name);

        let template = TemplateDocument::load(&pre.template)?;
        let _ = events.send(BatchEvent::Info(InfoEvent::TemplateLoaded {
            path: pre.template.clone(),
        }));
        let template =
            template.rewrite(&[PatternRule::quoted("highres_files(1)", structural.display())?])?;

        Ok(Self {
            template,
            raw_pattern: pre.raw_pattern.clone(),
        })
    }

    pub(crate) async fn run_one(
        &self,
        ctx: &RunContext<'_>,
        layout: &RunLayout,
    ) -> Result<RunRecord, RunFailure> {
        let run_dir = layout.run_dir();
        std::fs::create_dir_all(&run_dir)?;

        let image = layout.input_image();
        let volumes = ctx.deriver.volume_count(&image).await?;
        let tr = ctx.deriver.tr_duration(&image).await?;

        let rules = [
            PatternRule::quoted("feat_files(1)", layout.input_root().display())?,
            PatternRule::quoted("fmri(outputdir)", layout.preprocess_output_dir().display())?,
            PatternRule::quoted("fmri(st_file)", layout.slice_timings().display())?,
            PatternRule::bare("fmri(npts)", volumes)?,
            PatternRule::bare("fmri(tr)", format!("{tr:.6}"))?,
        ];
        let design = self.template.rewrite(&rules)?;
        let design_path = layout.design_file("design");
        write_config_atomic(&design_path, design.text())?;
        let _ = ctx.events.send(BatchEvent::ConfigWritten {
            path: design_path.clone(),
        });

        // The raw pattern is a glob relative to the working directory; the helper
        // expands it.
        let raw = self.raw_pattern.replace("{run}", layout.run().as_str());
        let slice_cmd = CommandLine::parse(&ctx.cfg.helpers.slice_timings)?
            .arg(raw)
            .path_arg(&layout.slice_timings())
            .arg(volumes.to_string());
        ctx.runner
            .run(&slice_cmd, Some(&ctx.cfg.working_dir), OutputMode::Inherit)
            .await?;

        ctx.run_tool(&design_path, &run_dir).await?;

        Ok(RunRecord {
            run: layout.run().clone(),
            config_file: design_path,
            volumes: Some(volumes),
            tr_seconds: Some(tr),
            elapsed_ms: 0,
        })
    }
}
