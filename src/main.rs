use clap::Parser;
use snapshot_archiver::{load_settings, setup_logging, Cli, CliRunner};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    if let Err(e) = setup_logging(args.verbose) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting snapshot-archiver v{}", env!("CARGO_PKG_VERSION"));

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };

    info!("Workers: {}", settings.workers);
    info!("Timeout per URL: {}s", settings.timeout_secs);
    info!("Output root: {}", settings.output_root.display());

    let cli_runner = CliRunner::new(settings);
    let code = match cli_runner.run(args.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("Application error: {:#}", e);
            3
        }
    };

    std::process::exit(code);
}
