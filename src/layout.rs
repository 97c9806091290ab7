//! Per-run path layout inside the working directory.

use crate::manifest::RunId;
use std::path::{Path, PathBuf};

/// Paths derived from the working directory and a run id.
#[derive(Debug, Clone)]
pub struct RunLayout {
    working_dir: PathBuf,
    run: RunId,
}

impl RunLayout {
    pub fn new(working_dir: &Path, run: &RunId) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            run: run.clone(),
        }
    }

    pub fn run(&self) -> &RunId {
        &self.run
    }

    /// `<wd>/run<id>`
    pub fn run_dir(&self) -> PathBuf {
        self.working_dir.join(format!("run{}", self.run))
    }

    /// `<wd>/<id>`, the raw input without its `.nii.gz` extension.
    pub fn input_root(&self) -> PathBuf {
        self.working_dir.join(self.run.as_str())
    }

    pub fn input_image(&self) -> PathBuf {
        let mut p = self.input_root().into_os_string();
        p.push(".nii.gz");
        PathBuf::from(p)
    }

    pub fn preprocess_output_dir(&self) -> PathBuf {
        self.run_dir().join(format!("{}-preprocess.feat", self.run))
    }

    pub fn slice_timings(&self) -> PathBuf {
        self.run_dir().join("slicetimes.txt")
    }

    pub fn denoised_data(&self) -> PathBuf {
        self.preprocess_output_dir().join("denoised_data.nii.gz")
    }

    /// `run<id>/block<id>_<tag>.fsf`
    pub fn design_file(&self, tag: &str) -> PathBuf {
        self.run_dir().join(format!("block{}_{}.fsf", self.run, tag))
    }

    /// `<wd>/EVfiles/<prefix>_run<id>_<file>`
    pub fn ev_file(&self, prefix: &str, file: &str) -> PathBuf {
        self.working_dir
            .join("EVfiles")
            .join(format!("{}_run{}_{}", prefix, self.run, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::run_id;

    #[test]
    fn paths_follow_run_naming() {
        let l = RunLayout::new(Path::new("/data/p6"), &run_id("05"));
        assert_eq!(l.run_dir(), PathBuf::from("/data/p6/run05"));
        assert_eq!(l.input_image(), PathBuf::from("/data/p6/05.nii.gz"));
        assert_eq!(
            l.denoised_data(),
            PathBuf::from("/data/p6/run05/05-preprocess.feat/denoised_data.nii.gz")
        );
        assert_eq!(
            l.design_file("GLM1"),
            PathBuf::from("/data/p6/run05/block05_GLM1.fsf")
        );
        assert_eq!(
            l.ev_file("GLM2", "noresponses.txt"),
            PathBuf::from("/data/p6/EVfiles/GLM2_run05_noresponses.txt")
        );
    }
}
