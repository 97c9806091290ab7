use crate::designs::{GlmDesign, BUILTIN_DESIGNS};
use crate::engine::{BatchEngine, Driver, Preprocess, Session};
use crate::error::BatchError;
use crate::logging::{self, Verbosity};
use crate::model::{
    BatchConfig, BatchEvent, BatchSummary, EventSink, HelperCommands, InfoEvent, PreprocessConfig,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "feat-batch",
    version,
    about = "Run FSL FEAT over every run listed in a manifest"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// First-level preprocessing: rewrite the main design template per run and run FEAT
    Preprocess(PreprocessArgs),
    /// Session GLM: fill a named-placeholder design template per run and run FEAT
    Session(SessionArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CommonArgs {
    /// Working directory containing the manifest, templates and run directories
    #[arg(long = "working-dir", visible_alias = "workingDir", default_value = ".")]
    pub working_dir: PathBuf,

    /// Manifest listing one run per line (relative to the working directory)
    #[arg(long, default_value = "to_process_main.txt")]
    pub manifest: PathBuf,

    /// Number of leading characters of each manifest line that name the run
    #[arg(long, default_value = "2")]
    pub id_width: NonZeroUsize,

    /// Analysis tool command; the design file path is appended
    #[arg(long, default_value = "feat")]
    pub tool: String,

    /// Volume count helper; the image path is appended
    #[arg(long, default_value = "sh getNumVolume.sh")]
    pub volume_helper: String,

    /// TR duration helper; the image path is appended
    #[arg(long, default_value = "sh getTRDuration.sh")]
    pub tr_helper: String,

    /// Log file appended to for this batch (relative to the working directory)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Echo debug events (derived parameters, written files) to the console
    #[arg(long, short)]
    pub verbose: bool,

    /// Only print errors to the console
    #[arg(long, short, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print the batch summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PreprocessArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Main design template
    #[arg(long, default_value = "design_template_main.fsf")]
    pub template: PathBuf,

    /// File holding PD_dir="<structural directory>"
    #[arg(long, default_value = "directories.ini")]
    pub directories: PathBuf,

    /// Structural image name inside PD_dir
    #[arg(long, default_value = "final_structural")]
    pub structural_name: String,

    /// Slice timing helper; raw pattern, output path and volume count are appended
    #[arg(long, default_value = "sh makeSlicetimings.sh")]
    pub slice_helper: String,

    /// Raw image glob passed to the slice timing helper; `{run}` is the run id
    #[arg(
        long,
        default_value = "../../RawMRIData/TEMP2A_P6_TC/*BIYUJADEHE.00{run}.0*.IMA"
    )]
    pub raw_pattern: String,
}

#[derive(Debug, Args, Clone)]
pub struct SessionArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Built-in GLM design
    #[arg(
        long,
        default_value = "glm1",
        value_parser = clap::builder::PossibleValuesParser::new(BUILTIN_DESIGNS.iter().copied())
    )]
    pub design: String,

    /// Custom GLM design described in TOML (overrides --design)
    #[arg(long)]
    pub design_file: Option<PathBuf>,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        match &self.command {
            Command::Preprocess(a) => a.common.quiet,
            Command::Session(a) => a.common.quiet,
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    match args.command {
        Command::Preprocess(a) => run_preprocess(a).await,
        Command::Session(a) => run_session(a).await,
    }
}

/// Expand `~` and make `dir` absolute.
pub fn resolve_working_dir(dir: &Path) -> Result<PathBuf> {
    let expanded = match dir.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .context("cannot expand `~`: no home directory")?
            .join(rest),
        Err(_) => dir.to_path_buf(),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .context("get current directory")?
            .join(expanded)
    };
    Ok(std::fs::canonicalize(&absolute).unwrap_or(absolute))
}

fn under(working_dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        working_dir.join(p)
    }
}

/// Build a `BatchConfig` from CLI arguments.
pub fn build_config(
    args: &CommonArgs,
    slice_helper: Option<&str>,
    default_log: &str,
) -> Result<BatchConfig> {
    let working_dir = resolve_working_dir(&args.working_dir)?;
    let log_name = args
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_log));
    let mut helpers = HelperCommands {
        volume_count: args.volume_helper.clone(),
        tr_duration: args.tr_helper.clone(),
        ..HelperCommands::default()
    };
    if let Some(s) = slice_helper {
        helpers.slice_timings = s.to_string();
    }
    Ok(BatchConfig {
        manifest: under(&working_dir, &args.manifest),
        log_file: under(&working_dir, &log_name),
        id_width: args.id_width.get(),
        tool: args.tool.clone(),
        helpers,
        working_dir,
    })
}

fn verbosity(args: &CommonArgs) -> Verbosity {
    if args.quiet {
        Verbosity::Quiet
    } else if args.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

async fn run_preprocess(args: PreprocessArgs) -> Result<()> {
    let cfg = build_config(&args.common, Some(&args.slice_helper), "preprocess.log")?;
    let pre = PreprocessConfig {
        template: under(&cfg.working_dir, &args.template),
        directories_file: under(&cfg.working_dir, &args.directories),
        structural_name: args.structural_name.clone(),
        raw_pattern: args.raw_pattern.clone(),
    };
    run_batch(&args.common, cfg, |cfg, events| {
        Ok(Driver::Preprocess(Preprocess::prepare(cfg, &pre, events)?))
    })
    .await
}

async fn run_session(args: SessionArgs) -> Result<()> {
    let design = match &args.design_file {
        Some(path) => {
            let wd = resolve_working_dir(&args.common.working_dir)?;
            GlmDesign::from_toml_file(&under(&wd, path))?
        }
        None => GlmDesign::builtin(&args.design)
            .with_context(|| format!("unknown design {}", args.design))?,
    };
    let cfg = build_config(&args.common, None, &design.log_file)?;
    run_batch(&args.common, cfg, move |cfg, events| {
        Ok(Driver::Session(Session::prepare(
            &cfg.working_dir,
            design,
            events,
        )?))
    })
    .await
}

/// Open the batch log, prepare the driver, run every manifest entry and report.
async fn run_batch<F>(args: &CommonArgs, cfg: BatchConfig, make_driver: F) -> Result<()>
where
    F: FnOnce(&BatchConfig, &EventSink) -> Result<Driver, BatchError>,
{
    let log = logging::open_log_file(&cfg.log_file)?;
    let (events, writer) = logging::spawn_log_writer(Some(log), verbosity(args));

    let _ = events.send(BatchEvent::Info(InfoEvent::ConfigLoaded {
        json: serde_json::to_string(&cfg)?,
    }));

    let outcome = match make_driver(&cfg, &events) {
        Ok(driver) => BatchEngine::new(cfg, driver).run(events.clone()).await,
        Err(e) => Err(e),
    };
    // Run failures were already reported by the engine.
    if let Err(e) = &outcome {
        if !matches!(e, BatchError::Run { .. }) {
            let _ = events.send(BatchEvent::Info(InfoEvent::SetupFailed {
                reason: error_chain(e),
            }));
        }
    }

    // Flush the log before reporting.
    drop(events);
    writer.await.context("log writer task failed")?;

    let summary = outcome.context("batch failed")?;
    print_summary(args, &summary)
}

fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    std::iter::successors(Some(e), |e| e.source())
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

fn print_summary(args: &CommonArgs, summary: &BatchSummary) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else if !args.quiet {
        for line in crate::text_summary::build_text_summary(summary).lines {
            println!("{line}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn session_defaults() {
        let cli = Cli::try_parse_from(["feat-batch", "session"]).unwrap();
        match cli.command {
            Command::Session(a) => {
                assert_eq!(a.design, "glm1");
                assert_eq!(a.common.working_dir, PathBuf::from("."));
                assert_eq!(a.common.tool, "feat");
                assert_eq!(a.common.id_width.get(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn accepts_legacy_working_dir_flag() {
        let cli = Cli::try_parse_from([
            "feat-batch",
            "preprocess",
            "--workingDir",
            "/study/p6",
        ])
        .unwrap();
        match cli.command {
            Command::Preprocess(a) => assert_eq!(a.common.working_dir, PathBuf::from("/study/p6")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_design_and_conflicting_verbosity() {
        assert!(Cli::try_parse_from(["feat-batch", "session", "--design", "glm9"]).is_err());
        assert!(Cli::try_parse_from(["feat-batch", "session", "-v", "-q"]).is_err());
    }

    #[test]
    fn rejects_zero_id_width() {
        assert!(Cli::try_parse_from(["feat-batch", "preprocess", "--id-width", "0"]).is_err());
        let cli = Cli::try_parse_from(["feat-batch", "preprocess", "--id-width", "3"]).unwrap();
        match cli.command {
            Command::Preprocess(a) => assert_eq!(a.common.id_width.get(), 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn build_config_resolves_paths_under_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let wd = std::fs::canonicalize(dir.path()).unwrap();
        let cli = Cli::try_parse_from([
            "feat-batch",
            "preprocess",
            "--working-dir",
            wd.to_str().unwrap(),
            "--log-file",
            "logs/p.log",
        ])
        .unwrap();
        let Command::Preprocess(a) = cli.command else {
            panic!("expected preprocess")
        };
        let cfg = build_config(&a.common, Some(&a.slice_helper), "preprocess.log").unwrap();
        assert_eq!(cfg.working_dir, wd);
        assert_eq!(cfg.manifest, wd.join("to_process_main.txt"));
        assert_eq!(cfg.log_file, wd.join("logs/p.log"));
        assert_eq!(cfg.helpers.slice_timings, "sh makeSlicetimings.sh");
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            let name = "feat-batch-no-such-study-dir";
            let resolved = resolve_working_dir(&Path::new("~").join(name)).unwrap();
            assert_eq!(resolved, home.join(name));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_manifest_fails_and_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let wd = dir.path();
        std::fs::write(wd.join("GLM1_template.fsf"), "set fmri(npts) {numVolumes}\n").unwrap();
        let cli = Cli::try_parse_from([
            "feat-batch",
            "session",
            "-q",
            "--working-dir",
            wd.to_str().unwrap(),
        ])
        .unwrap();

        let err = run(cli).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to read manifest"));
        let log = std::fs::read_to_string(wd.join("GLM.log")).unwrap();
        assert!(log.contains("DEBUG@batch: Batch config:"));
    }
}
