//! Session GLM batch: fill a named-placeholder template per run from the design's
//! EV table and the preprocessed data, then run FEAT on it.

use super::RunContext;
use crate::designs::GlmDesign;
use crate::error::{BatchError, RunFailure, TemplateError};
use crate::layout::RunLayout;
use crate::model::{BatchEvent, EventSink, InfoEvent, RunRecord};
use crate::template::{write_config_atomic, ParameterSet, TemplateDocument};
use std::path::Path;

const INPUT_PARAM: &str = "input_feat_file";
const VOLUMES_PARAM: &str = "numVolumes";
const TR_PARAM: &str = "TR_duration";

pub struct Session {
    design: GlmDesign,
    template: TemplateDocument,
}

impl Session {
    /// Load the design's template from the working directory and check up front that
    /// every placeholder it uses is one this design can fill.
    pub fn prepare(
        working_dir: &Path,
        design: GlmDesign,
        events: &EventSink,
    ) -> Result<Self, BatchError> {
        let path = working_dir.join(&design.template);
        let template = TemplateDocument::load(&path)?;
        let _ = events.send(BatchEvent::Info(InfoEvent::TemplateLoaded { path }));

        let mut provided: Vec<&str> =
            design.conditions.iter().map(|c| c.param.as_str()).collect();
        provided.extend([INPUT_PARAM, VOLUMES_PARAM]);
        if design.derive_tr {
            provided.push(TR_PARAM);
        }
        let unfillable: Vec<String> = template
            .placeholders()?
            .into_iter()
            .filter(|name| !provided.contains(&name.as_str()))
            .collect();
        if !unfillable.is_empty() {
            return Err(TemplateError::MissingParameter { names: unfillable }.into());
        }

        Ok(Self { design, template })
    }

    pub fn design_name(&self) -> &str {
        &self.design.name
    }

    pub(crate) async fn run_one(
        &self,
        ctx: &RunContext<'_>,
        layout: &RunLayout,
    ) -> Result<RunRecord, RunFailure> {
        let mut params = ParameterSet::new();

        let input = layout.denoised_data();
        params.insert(INPUT_PARAM, input.clone());
        report(ctx.events, INPUT_PARAM, input.display());

        let volumes = ctx.deriver.volume_count(&input).await?;
        params.insert(VOLUMES_PARAM, volumes);

        let tr = if self.design.derive_tr {
            let tr = ctx.deriver.tr_duration(&input).await?;
            params.insert(TR_PARAM, tr);
            Some(tr)
        } else {
            None
        };

        for cond in &self.design.conditions {
            let path = layout.ev_file(&self.design.ev_prefix, &cond.file);
            report(ctx.events, &cond.param, path.display());
            params.insert(cond.param.clone(), path);
        }

        let rendered = self.template.render_named(&params)?;
        let design_path = layout.design_file(&self.design.output_tag);
        write_config_atomic(&design_path, &rendered)?;
        let _ = ctx.events.send(BatchEvent::ConfigWritten {
            path: design_path.clone(),
        });

        ctx.run_tool(&design_path, &layout.run_dir()).await?;

        Ok(RunRecord {
            run: layout.run().clone(),
            config_file: design_path,
            volumes: Some(volumes),
            tr_seconds: tr,
            elapsed_ms: 0,
        })
    }
}

fn report(events: &EventSink, name: &str, value: impl std::fmt::Display) {
    let _ = events.send(BatchEvent::ParameterDerived {
        name: name.to_string(),
        value: value.to_string(),
    });
}
