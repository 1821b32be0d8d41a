use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use gce_deployer::cli::{load_env_file, run, Args};
use gce_deployer::deployer::Deployer;
use gce_deployer::gce::GceCluster;

#[tokio::main]
async fn main() {
    // The env file has to be in place before clap reads env-backed flags
    let env_file = load_env_file(std::env::args_os());
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

    match env_file {
        Ok(Some(path)) => debug!("Loaded env file {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    info!(
        "Starting gce-deployer: up={}, down={}, clusters={}, projects={}",
        config.up,
        config.down,
        config.clusters.len(),
        config.projects.len()
    );

    let deployer = Deployer::new(config, Arc::new(GceCluster::new()));

    if let Err(e) = run(&deployer).await.context("gce-deployer run failed") {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
