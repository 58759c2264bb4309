//! Command-line interface for the pipeline.
//! Uses clap derive macros for argument parsing.

mod commands;
pub mod output;

pub use commands::{load_config, CacheAction, CliApp, Command, FetchCmd, FetchOp, HistoricalAction};
pub use output::OutputFormat;

use anyhow::Result;

/// Parse the command line.
pub fn init() -> CliApp {
    use clap::Parser;
    CliApp::parse()
}

/// Execute the CLI command. `Ok(false)` means the command ran but reported
/// a failure, such as an unhealthy service.
pub async fn execute(app: CliApp) -> Result<bool> {
    commands::execute(app).await
}
