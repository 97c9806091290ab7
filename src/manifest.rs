//! Run manifest loading.
//!
//! A manifest lists one run reference per line (usually the raw NIfTI file name).
//! Only the first `width` characters of each line identify the run.

use crate::error::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Short code naming one run, e.g. `"05"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, immutable list of runs for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunManifest {
    runs: Vec<RunId>,
}

impl RunManifest {
    pub fn load(path: &Path, width: usize) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, width)
    }

    pub fn parse(text: &str, width: usize) -> Result<Self, ManifestError> {
        if width == 0 {
            return Err(ManifestError::ZeroWidth);
        }
        let mut runs = Vec::new();
        let mut seen = HashSet::new();

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let prefix: String = line.chars().take(width).collect();
            if prefix.chars().count() < width || prefix.trim() != prefix {
                return Err(ManifestError::MalformedLine {
                    line: idx + 1,
                    content: line.to_string(),
                });
            }
            if !seen.insert(prefix.clone()) {
                return Err(ManifestError::DuplicateRun {
                    run: prefix,
                    line: idx + 1,
                });
            }
            runs.push(RunId(prefix));
        }

        Ok(Self { runs })
    }

    pub fn runs(&self) -> &[RunId] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn run_id(code: &str) -> RunId {
    RunId(code.to_string())
}
