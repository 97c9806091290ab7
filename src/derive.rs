//! Per-run numeric parameters computed by helper scripts.
//!
//! The helpers (`getNumVolume.sh`, `getTRDuration.sh`) read the image header and print
//! a single number on stdout.

use crate::command::{CommandLine, CommandRunner, OutputMode};
use crate::error::DerivationError;
use crate::model::{BatchEvent, EventSink, HelperCommands};
use std::path::Path;
use std::str::FromStr;

pub struct ParameterDeriver<'a> {
    runner: &'a CommandRunner,
    helpers: &'a HelperCommands,
    events: EventSink,
}

impl<'a> ParameterDeriver<'a> {
    pub fn new(
        runner: &'a CommandRunner,
        helpers: &'a HelperCommands,
        events: EventSink,
    ) -> Self {
        Self {
            runner,
            helpers,
            events,
        }
    }

    /// Number of volumes in `image`.
    pub async fn volume_count(&self, image: &Path) -> Result<u32, DerivationError> {
        let n: u32 = self
            .query("volume count", &self.helpers.volume_count, image)
            .await?;
        self.report("numVolumes", n.to_string());
        Ok(n)
    }

    /// Repetition time of `image` in seconds.
    pub async fn tr_duration(&self, image: &Path) -> Result<f64, DerivationError> {
        let tr: f64 = self
            .query("TR duration", &self.helpers.tr_duration, image)
            .await?;
        if !tr.is_finite() || tr <= 0.0 {
            return Err(DerivationError::Unparseable {
                what: "TR duration",
                output: tr.to_string(),
            });
        }
        self.report("TR_duration", format!("{tr:.6}"));
        Ok(tr)
    }

    async fn query<T: FromStr>(
        &self,
        what: &'static str,
        helper: &str,
        image: &Path,
    ) -> Result<T, DerivationError> {
        let cmd = CommandLine::parse(helper)
            .map_err(|source| DerivationError::Helper { what, source })?
            .path_arg(image);
        let out = self
            .runner
            .run(&cmd, None, OutputMode::Capture)
            .await
            .map_err(|source| DerivationError::Helper { what, source })?;
        parse_single_value(what, &out.stdout)
    }

    fn report(&self, name: &str, value: String) {
        let _ = self.events.send(BatchEvent::ParameterDerived {
            name: name.to_string(),
            value,
        });
    }
}

/// Parse helper output that must be exactly one value on one line.
fn parse_single_value<T: FromStr>(what: &'static str, stdout: &str) -> Result<T, DerivationError> {
    let trimmed = stdout.trim();
    let unparseable = || DerivationError::Unparseable {
        what,
        output: stdout.to_string(),
    };
    if trimmed.is_empty() || trimmed.lines().count() != 1 {
        return Err(unparseable());
    }
    trimmed.parse().map_err(|_| unparseable())
}
