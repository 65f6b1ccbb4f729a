use std::process::ExitCode;

use clap::Parser;
use tilewatch::cli::Cli;
use tilewatch::config::Settings;
use tilewatch::logging;
use tilewatch::shutdown::{self, Shutdown};
use tilewatch::supervisor::{Supervisor, SupervisorError};

/// Exit code for configuration that cannot be loaded.
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    logging::init_with_config(&settings.logging);

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = shutdown::listen_for_signals(shutdown).await {
                tracing::error!("[shutdown] cannot install signal handlers: {e}");
            }
        }
    });

    match run(&settings, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings =
        Settings::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;
    cli.apply(&mut settings);
    Ok(settings)
}

async fn run(settings: &Settings, shutdown: Shutdown) -> Result<(), SupervisorError> {
    let supervisor = Supervisor::initialize(settings, shutdown).await?;
    supervisor.run().await
}
