//! Session GLM designs.
//!
//! A design names its template and lists the explanatory-variable files it needs as
//! a table of (placeholder, file suffix) pairs. EV paths are generated from that table
//! instead of being spelled out per key.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvCondition {
    /// Placeholder name in the template, e.g. `norespPath`.
    pub param: String,
    /// File name after the `EVfiles/<prefix>_run<id>_` prefix.
    pub file: String,
}

impl EvCondition {
    fn new(param: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            file: file.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlmDesign {
    pub name: String,
    pub template: String,
    pub log_file: String,
    pub ev_prefix: String,
    /// Design files are written as `block<id>_<output_tag>.fsf`.
    pub output_tag: String,
    #[serde(default)]
    pub derive_tr: bool,
    #[serde(default)]
    pub conditions: Vec<EvCondition>,
}

pub const BUILTIN_DESIGNS: &[&str] = &["glm1", "glm2-onlypost", "glm2-onlypost-control"];

/// Missing-probe conditions: tens digit is the set size block, units digit 5-9.
const MISSING_CODES: [u8; 25] = [
    5, 6, 7, 8, 9, 15, 16, 17, 18, 19, 25, 26, 27, 28, 29, 35, 36, 37, 38, 39, 45, 46, 47, 48, 49,
];

fn cue_conditions() -> Vec<EvCondition> {
    ["testarraypostcue", "testarrayretrocue", "memoryarrayretrocue"]
        .iter()
        .map(|c| EvCondition::new(format!("{c}Path"), format!("{c}.txt")))
        .collect()
}

fn missing_conditions(param_suffix: &str, file_suffix: &str) -> Vec<EvCondition> {
    MISSING_CODES
        .iter()
        .map(|code| {
            EvCondition::new(
                format!("missing{code:02}{param_suffix}Path"),
                format!("missing{code:02}_{file_suffix}.txt"),
            )
        })
        .collect()
}

fn glm1() -> GlmDesign {
    let mut conditions = Vec::new();
    for image in 0..10 {
        for sign in ["plus", "minus"] {
            conditions.push(EvCondition::new(
                format!("image{image}WM{sign}Path"),
                format!("image{image}_WM{sign}.txt"),
            ));
        }
    }
    conditions.push(EvCondition::new("norespPath", "noresponses.txt"));
    conditions.extend(cue_conditions());
    GlmDesign {
        name: "glm1".into(),
        template: "GLM1_template.fsf".into(),
        log_file: "GLM.log".into(),
        ev_prefix: "GLM1".into(),
        output_tag: "GLM1".into(),
        derive_tr: false,
        conditions,
    }
}

fn glm2_onlypost() -> GlmDesign {
    let mut conditions = missing_conditions("", "onlypost");
    conditions.extend(cue_conditions());
    GlmDesign {
        name: "glm2-onlypost".into(),
        template: "GLM2_template_onlypost.fsf".into(),
        log_file: "GLM2.log".into(),
        ev_prefix: "GLM2".into(),
        output_tag: "GLM2onlypost".into(),
        derive_tr: false,
        conditions,
    }
}

fn glm2_onlypost_control() -> GlmDesign {
    let mut conditions = missing_conditions("Corr", "onlypostcorr");
    conditions.extend(cue_conditions());
    conditions.extend(missing_conditions("Incorr", "onlypostincorr"));
    GlmDesign {
        name: "glm2-onlypost-control".into(),
        template: "GLM2_template_onlypostcue_control.fsf".into(),
        log_file: "GLM2.log".into(),
        ev_prefix: "GLM2".into(),
        output_tag: "GLM2onlypost_control".into(),
        derive_tr: false,
        conditions,
    }
}

impl GlmDesign {
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "glm1" => Some(glm1()),
            "glm2-onlypost" => Some(glm2_onlypost()),
            "glm2-onlypost-control" => Some(glm2_onlypost_control()),
            _ => None,
        }
    }

    /// Load a user design from TOML. `name` defaults to the file stem.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read design file {}", path.display()))?;
        Self::from_toml_str(&text, path)
    }

    fn from_toml_str(text: &str, path: &Path) -> Result<Self> {
        #[derive(Deserialize)]
        struct DesignFile {
            name: Option<String>,
            template: String,
            log_file: Option<String>,
            ev_prefix: String,
            output_tag: String,
            #[serde(default)]
            derive_tr: bool,
            #[serde(default)]
            conditions: Vec<EvCondition>,
        }

        let file: DesignFile = toml::from_str(text)
            .with_context(|| format!("parse design file {}", path.display()))?;
        let name = file.name.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "custom".into())
        });
        Ok(Self {
            log_file: file.log_file.unwrap_or_else(|| format!("{name}.log")),
            name,
            template: file.template,
            ev_prefix: file.ev_prefix,
            output_tag: file.output_tag,
            derive_tr: file.derive_tr,
            conditions: file.conditions,
        })
    }
}
