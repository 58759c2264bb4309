use finance_data_pipeline::cli;
use finance_data_pipeline::domain::PipelineError;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let app = cli::init();
    init_logging(app.verbose, app.debug);

    match cli::execute(app).await {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::FAILURE),
        Err(e) => {
            match e.downcast_ref::<PipelineError>() {
                Some(pipeline) => tracing::error!(error = %pipeline.to_json(), "{:#}", e),
                None => tracing::error!("{:#}", e),
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Logs go to stderr so stdout stays clean for command output and MCP
/// responses.
fn init_logging(verbose: bool, debug: bool) {
    let default_level = if debug || verbose { "debug" } else { "info" };
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(filter) if !verbose && !debug => EnvFilter::new(filter),
        _ => EnvFilter::new(default_level),
    };
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
