mod cli;
mod command;
mod derive;
mod designs;
mod engine;
mod error;
mod layout;
mod logging;
mod manifest;
mod model;
mod template;
mod text_summary;
mod tool;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_quiet = args.is_quiet();

    match cli::run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if is_quiet {
                // Quiet mode: one line on stderr, no backtrace-style chain dump
                eprintln!("{:#}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
