//! codedash server binary
//!
//! Loads the configuration, starts one local interpreter runner and serves
//! the execution socket until Ctrl+C or SIGTERM.

use anyhow::Result;
use clap::Parser;
use codedash_core::config::{ConfigLoader, CodedashConfig};
use codedash_core::ExecutionEngine;
use codedash_server::{shutdown_signal, CodedashServer, ServerConfig};
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "codedash server - run pasted Python snippets over a WebSocket")]
struct Cli {
    #[clap(long, short, help = "Path to a YAML configuration file")]
    config: Option<PathBuf>,

    #[clap(long, help = "Address to listen on, overrides the configuration")]
    bind_addr: Option<String>,

    #[clap(long, short, help = "Log level, overrides the configuration")]
    log_level: Option<String>,

    #[clap(long, help = "Disable CORS headers")]
    no_cors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_configuration(cli.config.as_deref()).await?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let mut server_config = ServerConfig::from_settings(&config.server)?;
    if let Some(bind_addr) = cli.bind_addr.as_deref() {
        server_config = server_config.with_bind_addr_str(bind_addr)?;
    }
    if cli.no_cors {
        server_config = server_config.with_cors(false);
    }

    let engine = ExecutionEngine::from_config(&config)?;
    match config.execution.run_timeout() {
        Some(limit) => log::info!("Runs are limited to {:?}", limit),
        None => log::info!("Runs have no time limit"),
    }

    let server = CodedashServer::with_config(Arc::new(engine), server_config);
    server.serve_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn load_configuration(explicit: Option<&std::path::Path>) -> Result<CodedashConfig> {
    if let Some(path) = explicit {
        return Ok(ConfigLoader::from_file(path).await?);
    }
    match default_config_path() {
        Some(path) if path.exists() => Ok(ConfigLoader::from_file(&path).await?),
        _ => Ok(ConfigLoader::from_env()?),
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("codedash").join("config.yaml"))
}
