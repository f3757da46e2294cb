use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use fsbridge_lib::config::ENV_CONFIG_PATH;
use fsbridge_lib::{AppConfig, HeadlessShell};

/// Privileged host for the file-server client. Speaks JSON lines on
/// stdin/stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "fsbridge", version, about)]
struct Args {
    /// JSON config file (serverUrl, serverPort, ...)
    #[arg(long, env = ENV_CONFIG_PATH)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(2);
        }
    };

    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    if let Err(e) = fsbridge_lib::logging::init_logging(level) {
        eprintln!("{}", e);
    }

    if let Err(e) = fsbridge_lib::run_host(config, Arc::new(HeadlessShell)).await {
        log::error!("host: {}", e);
        std::process::exit(1);
    }
}
