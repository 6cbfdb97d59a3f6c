use clap::Parser;
use tracing_subscriber::EnvFilter;

use triton_service_groups::cli::{Cli, Command, print_version, run_command};
use triton_service_groups::config::{Config, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    // Needs no configuration.
    if matches!(cli.command, Command::Version) {
        print_version();
        return Ok(());
    }

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    run_command(cli.command, config).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("triton_service_groups=info,tower_http=info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
