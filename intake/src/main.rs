mod config;
mod observability;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError};
use observability::MetricsError;
use std::path::PathBuf;
use std::process::ExitCode;
use submit_service::IntakeError;

#[derive(Parser)]
#[command(name = "intake", about = "Contact form submission service")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve form submissions
    Run(ConfigArgs),
    /// Check a config file and exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// YAML config file. Without one, defaults and environment variables are used.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Service(#[from] IntakeError),
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn validate(args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::load(args.config.as_deref())?;
    config.submit_config(env_var)?;
    Ok(())
}

fn run(args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::load(args.config.as_deref())?;
    let submit = config.submit_config(env_var)?;

    let _sentry = observability::init_logging(config.common.logging.as_ref());
    observability::init_metrics(config.common.metrics.as_ref())?;

    tracing::info!(path = %submit.path, "starting intake");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(submit_service::run(submit))?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        CliCommand::Run(args) => run(args),
        CliCommand::Validate(args) => validate(args).map(|()| println!("config ok")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = &e as &dyn std::error::Error, "intake failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
