//! Server configuration and CLI argument parsing
//!
//! All options can be set as CLI arguments or as environment variables
//! with the `MMOCORE_` prefix; CLI arguments take precedence.
//!
//! ```bash
//! # CLI arguments
//! mmocore-server --port 7777 --workers 8
//!
//! # Environment variables
//! export MMOCORE_PORT=7777
//! export MMOCORE_FLOOD_FILTER=30:60:10
//! mmocore-server
//! ```
//!
//! Flood filters are given as `warn:reject:window` triples and may be
//! repeated to layer several windows.

use std::net::SocketAddr;

use anyhow::{Result, anyhow};
use clap::Parser;
use mmocore::{FloodFilter, MmoConfig};

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
    /// Engine tuning handed to the controller.
    pub engine: MmoConfig,
    /// Logging level (error, warn, info, debug, trace).
    pub log_level: String,
}

impl Config {
    pub fn from_env_and_args() -> Result<Config> {
        Self::from_args(Args::parse())
    }

    fn from_args(args: Args) -> Result<Config> {
        let mut flood_filters = Vec::with_capacity(args.flood_filter.len());
        for spec in &args.flood_filter {
            flood_filters.push(parse_flood_filter(spec)?);
        }

        let defaults = MmoConfig::default();
        let engine = MmoConfig {
            poll_interval_ms: args.poll_interval_ms,
            read_loops: args.read_loops,
            write_loops: args.write_loops,
            workers: args.workers,
            dispatch_queue_size: args.queue_size,
            max_frame_size: args.max_frame_size,
            flood_tick_ms: args.flood_tick_ms,
            flood_sweep_interval_ms: args.flood_sweep_ms,
            flood_filters: if flood_filters.is_empty() {
                defaults.flood_filters
            } else {
                flood_filters
            },
        };

        Ok(Config {
            host: args.host,
            port: args.port,
            engine,
            log_level: args.log_level,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow!("invalid listen address {}:{}: {e}", self.host, self.port))
    }
}

/// Parses one `warn:reject:window` flood filter triple.
fn parse_flood_filter(spec: &str) -> Result<FloodFilter> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 3 {
        return Err(anyhow!(
            "invalid flood filter '{spec}': expected warn:reject:window"
        ));
    }
    let warn_limit = parts[0]
        .parse()
        .map_err(|_| anyhow!("invalid flood filter '{spec}': bad warn limit"))?;
    let reject_limit = parts[1]
        .parse()
        .map_err(|_| anyhow!("invalid flood filter '{spec}': bad reject limit"))?;
    let window = parts[2]
        .parse()
        .map_err(|_| anyhow!("invalid flood filter '{spec}': bad window"))?;
    Ok(FloodFilter {
        warn_limit,
        reject_limit,
        window,
    })
}

/// Command-line arguments for the server
///
/// All arguments can also be set via environment variables with the
/// MMOCORE_ prefix. CLI arguments take precedence over environment
/// variables.
#[derive(Parser, Debug)]
#[command(
    name = "mmocore-server",
    about = "Login/echo game server on the mmocore engine"
)]
pub struct Args {
    #[arg(
        long,
        value_name = "HOST",
        help = "Listen host",
        default_value = "127.0.0.1",
        env = "MMOCORE_HOST"
    )]
    pub host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "Listen port",
        default_value_t = 7777,
        env = "MMOCORE_PORT"
    )]
    pub port: u16,

    // Engine tuning
    #[arg(
        long,
        value_name = "MS",
        help = "Selector poll interval (ms)",
        default_value_t = 10,
        env = "MMOCORE_POLL_INTERVAL_MS"
    )]
    pub poll_interval_ms: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Read selector loops",
        default_value_t = 1,
        env = "MMOCORE_READ_LOOPS"
    )]
    pub read_loops: usize,
    #[arg(
        long,
        value_name = "N",
        help = "Write selector loops",
        default_value_t = 1,
        env = "MMOCORE_WRITE_LOOPS"
    )]
    pub write_loops: usize,
    #[arg(
        long,
        value_name = "N",
        help = "Packet worker threads",
        default_value_t = 4,
        env = "MMOCORE_WORKERS"
    )]
    pub workers: usize,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Pending packet jobs before submissions are dropped",
        default_value_t = 10_000,
        env = "MMOCORE_QUEUE_SIZE"
    )]
    pub queue_size: usize,
    #[arg(
        long,
        value_name = "BYTES",
        help = "Largest admissible frame payload",
        default_value_t = 8192,
        env = "MMOCORE_MAX_FRAME_SIZE"
    )]
    pub max_frame_size: usize,

    // Flood protection
    #[arg(
        long,
        value_name = "MS",
        help = "Flood window tick width (ms)",
        default_value_t = 1000,
        env = "MMOCORE_FLOOD_TICK_MS"
    )]
    pub flood_tick_ms: u64,
    #[arg(
        long,
        value_name = "WARN:REJECT:WINDOW",
        help = "Flood filter triple, repeatable",
        env = "MMOCORE_FLOOD_FILTER"
    )]
    pub flood_filter: Vec<String>,
    #[arg(
        long,
        value_name = "MS",
        help = "Interval between flood-entry sweeps (ms)",
        default_value_t = 60_000,
        env = "MMOCORE_FLOOD_SWEEP_MS"
    )]
    pub flood_sweep_ms: u64,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "MMOCORE_LOG_LEVEL"
    )]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["mmocore-server"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_produce_a_valid_engine_config() {
        let config = Config::from_args(args(&[])).unwrap();
        assert_eq!(config.port, 7777);
        assert!(config.engine.validate().is_ok());
        assert!(config.listen_addr().is_ok());
    }

    #[test]
    fn test_flood_filter_triple_parses() {
        let f = parse_flood_filter("30:60:10").unwrap();
        assert_eq!(f.warn_limit, 30);
        assert_eq!(f.reject_limit, 60);
        assert_eq!(f.window, 10);
    }

    #[test]
    fn test_malformed_flood_filters_are_rejected() {
        assert!(parse_flood_filter("30:60").is_err());
        assert!(parse_flood_filter("a:b:c").is_err());
        assert!(Config::from_args(args(&["--flood-filter", "5:x:2"])).is_err());
    }

    #[test]
    fn test_repeated_flood_filters_layer() {
        let config =
            Config::from_args(args(&["--flood-filter", "5:10:3", "--flood-filter", "50:100:30"]))
                .unwrap();
        assert_eq!(config.engine.flood_filters.len(), 2);
    }
}
