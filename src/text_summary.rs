//! Text summary builder for CLI output.

use crate::model::BatchSummary;
use std::time::Duration;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(summary: &BatchSummary) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!(
        "{} batch finished: {} run(s) in {}",
        summary.driver,
        summary.runs.len(),
        summary.working_dir.display()
    ));

    for r in &summary.runs {
        let volumes = r
            .volumes
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".into());
        let tr = r
            .tr_seconds
            .map(|t| format!("{t:.6}"))
            .unwrap_or_else(|| "-".into());
        lines.push(format!(
            "  run {}: {} (volumes {}, TR {}, {})",
            r.run,
            r.config_file.display(),
            volumes,
            tr,
            humantime::format_duration(r.elapsed_rounded())
        ));
    }

    let total: u64 = summary.runs.iter().map(|r| r.elapsed_ms).sum();
    lines.push(format!(
        "Total: {}",
        humantime::format_duration(Duration::from_secs(total / 1000))
    ));
    lines.push(format!("Log: {}", summary.log_file.display()));

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::run_id;
    use crate::model::RunRecord;
    use std::path::PathBuf;

    #[test]
    fn lists_each_run() {
        let summary = BatchSummary {
            driver: "preprocess".into(),
            working_dir: PathBuf::from("/study/p6"),
            log_file: PathBuf::from("/study/p6/preprocess.log"),
            started_utc: "2026-10-19T00:00:00Z".into(),
            runs: vec![
                RunRecord {
                    run: run_id("05"),
                    config_file: PathBuf::from("/study/p6/run05/block05_design.fsf"),
                    volumes: Some(120),
                    tr_seconds: Some(2.0),
                    elapsed_ms: 65_000,
                },
                RunRecord {
                    run: run_id("12"),
                    config_file: PathBuf::from("/study/p6/run12/block12_design.fsf"),
                    volumes: None,
                    tr_seconds: None,
                    elapsed_ms: 5_400,
                },
            ],
        };
        let lines = build_text_summary(&summary).lines;
        assert_eq!(lines[0], "preprocess batch finished: 2 run(s) in /study/p6");
        assert_eq!(
            lines[1],
            "  run 05: /study/p6/run05/block05_design.fsf (volumes 120, TR 2.000000, 1m 5s)"
        );
        assert_eq!(
            lines[2],
            "  run 12: /study/p6/run12/block12_design.fsf (volumes -, TR -, 5s)"
        );
        assert_eq!(lines[3], "Total: 1m 10s");
        assert_eq!(lines[4], "Log: /study/p6/preprocess.log");
    }
}
