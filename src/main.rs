use std::process;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fieldscope::cli::{format_dry_run, Args};
use fieldscope::config::{load_configuration_file, Configuration};
use fieldscope::runtime::{Drivers, PipelineExecutor};

/// Apply `--host` / `--port` to the shell parameters
fn apply_overrides(configuration: &mut Configuration, args: &Args) {
    let Some(shell) = configuration.shell_mut() else {
        return;
    };
    if let Some(ref host) = args.host {
        shell
            .parameters
            .insert("host".to_string(), Value::from(host.as_str()));
    }
    if let Some(port) = args.port {
        shell.parameters.insert("port".to_string(), Value::from(port));
    }
}

async fn run(configuration: Configuration) -> anyhow::Result<()> {
    let drivers = Drivers::with_defaults();
    info!("Drivers: {}", drivers.describe());

    let executor = PipelineExecutor::new(configuration, drivers);
    executor
        .apply_configuration()
        .await
        .context("Failed to start pipeline")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    executor.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let mut configuration = match load_configuration_file(&args.config_file) {
        Ok(configuration) => configuration,
        Err(e) => {
            error!(
                "Failed to load configuration file {}: {}",
                args.config_file.display(),
                e
            );
            process::exit(1);
        }
    };
    apply_overrides(&mut configuration, &args);

    // Dry-run mode: print pipeline info and exit
    if args.dry_run {
        println!("{}", format_dry_run(&configuration, &args));
        return;
    }

    info!(
        "Starting fieldscope with {} inlet(s) and {} processor(s)",
        configuration.inlets().len(),
        configuration.processors().len()
    );

    if let Err(e) = run(configuration).await {
        error!("{:#}", e);
        process::exit(1);
    }
}
