//! # rtbridge Proxy Binary
//!
//! Runs the bus router and one proxy actor per configured RT component.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration path
//! rtbridge_proxy
//!
//! # Explicit config, POSIX segments, verbose logging
//! rtbridge_proxy --config config/proxy.toml --backend posix -v
//!
//! # JSON logs
//! rtbridge_proxy --config config/proxy.toml --json
//! ```

use clap::Parser;
use rtbridge_common::config::LogLevel;
use rtbridge_common::consts::DEFAULT_CONFIG_PATH;
use rtbridge_proxy::core::ProxyCore;
use rtbridge_shm::BackendChoice;
use std::path::PathBuf;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// rtbridge proxy - bridges RT message rings to the command/response bus
#[derive(Parser, Debug)]
#[command(name = "rtbridge_proxy")]
#[command(version)]
#[command(about = "Bus router and RT proxy actors")]
#[command(long_about = None)]
struct Args {
    /// Path to the proxy configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Segment backend, overriding the configuration (auto, shared, posix)
    #[arg(long, value_name = "BACKEND")]
    backend: Option<BackendChoice>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Proxy startup failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match ProxyCore::load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            setup_tracing(&args, LogLevel::default());
            return Err(e.into());
        }
    };
    if let Some(backend) = args.backend {
        config.registry.backend = backend;
    }
    setup_tracing(&args, config.shared.log_level);

    info!("rtbridge proxy v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut core = ProxyCore::new(config)?;

    let token = core.shutdown_token();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        token.cancel();
    })?;

    if let Err(e) = core.init() {
        core.shutdown()?;
        return Err(e.into());
    }

    if let Err(e) = core.run() {
        error!("Proxy error: {}", e);
    }

    core.shutdown()?;
    info!("rtbridge proxy shutdown complete");
    Ok(())
}

/// Setup tracing subscriber from CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = tracing_level(args.verbose, configured);
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// `--verbose` wins over the configured level.
fn tracing_level(verbose: bool, configured: LogLevel) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        configured.as_directive().parse().unwrap_or(Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_maps_to_tracing_level() {
        let cases = [
            (LogLevel::Trace, Level::TRACE),
            (LogLevel::Debug, Level::DEBUG),
            (LogLevel::Info, Level::INFO),
            (LogLevel::Warn, Level::WARN),
            (LogLevel::Error, Level::ERROR),
        ];
        for (configured, expected) in cases {
            assert_eq!(tracing_level(false, configured), expected);
        }
        assert_eq!(tracing_level(true, LogLevel::Error), Level::DEBUG);
    }
}
