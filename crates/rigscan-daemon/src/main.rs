//! rigscan - Main entry point
//!
//! Runs periodic discovery scans of a LAN for cgminer-compatible miners and
//! delivers normalized telemetry to the configured sinks. One-shot
//! subcommands cover single scans, single-miner queries and control actions.

mod config;
mod forward;
mod scheduler;
mod sink;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rigscan_cgminer::MinerClient;
use rigscan_core::{format_hashrate, MinerEndpoint, NormalizedRecord};
use rigscan_discovery::{ArpTableResolver, MacResolver, Scanner};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "rigscan")]
#[command(about = "LAN discovery and telemetry collector for cgminer-compatible miners")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "rigscan.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Range to scan, e.g. 192.168.1.* or 10.0.0.0/22
    #[arg(short, long)]
    subnet: Option<String>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Scan periodically and deliver records to the sinks (default)
    Run,
    /// Run a single scan cycle and print a summary
    Scan,
    /// Query one miner and print its record as JSON
    Query { host: IpAddr },
    /// Reboot the device
    Restart { host: IpAddr },
    /// Soft reset the mining process
    Reset { host: IpAddr },
    /// Print stored rows for one miner, newest first
    History {
        host: IpAddr,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Replace the first pool
    SetPool {
        host: IpAddr,
        #[arg(long)]
        url: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "x")]
        pass: String,
    },
}

fn init_logging(log_level: &str) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("rigscan v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(subnet) = args.subnet {
        config.discovery.range = Some(subnet);
    }

    match args.command.unwrap_or(Cmd::Run) {
        Cmd::Run => {
            let scanner = build_scanner(&config)?;
            let sinks = sink::build_sinks(&config).await?;
            if sinks.is_empty() {
                warn!("No sinks configured, records will be discarded");
            }
            let period = Duration::from_secs(config.daemon.scan_interval_secs);
            scheduler::run(scanner, sinks, period).await?;
        }
        Cmd::Scan => {
            let scanner = build_scanner(&config)?;
            let sinks = sink::build_sinks(&config).await?;
            let report = scheduler::run_cycle(&scanner, &sinks).await;
            println!(
                "Scanned {} in {:.1}s: {} miners ({} online, {} offline)",
                report.range,
                report.elapsed.as_secs_f64(),
                report.records.len(),
                report.online_count(),
                report.offline_count()
            );
            for record in &report.records {
                println!("  {}", summary_line(record));
            }
        }
        Cmd::Query { host } => {
            let client = client_for(&config, host);
            let record = match client.record().await {
                Ok(record) => record,
                Err(e) => {
                    warn!(ip = %host, error = %e, "Query failed, reporting offline");
                    NormalizedRecord::offline(client.endpoint())
                }
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Cmd::Restart { host } => {
            let reply = client_for(&config, host)
                .restart()
                .await
                .with_context(|| format!("restart failed on {}", host))?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Cmd::Reset { host } => {
            let reply = client_for(&config, host)
                .reset()
                .await
                .with_context(|| format!("reset failed on {}", host))?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Cmd::History { host, limit } => {
            let path = config
                .sink
                .db_path
                .as_deref()
                .context("History needs [sink] db_path in the configuration")?;
            let rows = store::SqliteStore::open(path)
                .await?
                .history(host, limit)
                .await
                .with_context(|| format!("Failed to read history for {}", host))?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Cmd::SetPool {
            host,
            url,
            user,
            pass,
        } => {
            let reply = client_for(&config, host)
                .replace_pool(&url, &user, &pass)
                .await
                .with_context(|| format!("pool change failed on {}", host))?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }

    Ok(())
}

fn build_scanner(config: &config::Config) -> Result<Scanner> {
    let scanner_config = config.to_scanner_config()?;
    let resolver: Option<Arc<dyn MacResolver>> = if config.discovery.resolve_mac {
        Some(Arc::new(ArpTableResolver::new()))
    } else {
        None
    };
    info!(
        range = %scanner_config.range,
        port = scanner_config.probe.port,
        hosts = scanner_config.range.host_count(),
        "Configuration loaded"
    );
    Ok(Scanner::new(scanner_config, resolver))
}

fn client_for(config: &config::Config, host: IpAddr) -> MinerClient {
    MinerClient::with_config(
        MinerEndpoint::new(host, config.discovery.port),
        config.client_config(),
    )
}

fn summary_line(record: &NormalizedRecord) -> String {
    if !record.online {
        return format!("{}:{} offline", record.host, record.port);
    }
    let model = record.model.as_deref();
    let mut line = format!("{}:{} {}", record.host, record.port, model.unwrap_or("unknown"));
    if let Some(ghs) = record.hashrate_avg {
        line.push_str(&format!(" {}", format_hashrate(ghs, model)));
    }
    if let Some(temp) = record.temperature {
        line.push_str(&format!(" {:.0}C", temp));
    }
    if let Some(mac) = &record.mac {
        line.push_str(&format!(" [{}]", mac));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn about(name: &str) -> String {
        Args::command()
            .find_subcommand(name)
            .and_then(|sub| sub.get_about())
            .map(|about| about.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_control_subcommand_help() {
        assert_eq!(about("restart"), "Reboot the device");
        assert_eq!(about("reset"), "Soft reset the mining process");
        assert_eq!(about("set-pool"), "Replace the first pool");
    }

    #[test]
    fn test_parse_set_pool() {
        let args = Args::try_parse_from([
            "rigscan", "set-pool", "10.0.0.5", "--url", "stratum+tcp://pool:3333", "--user", "acct.w1",
        ])
        .unwrap();
        match args.command {
            Some(Cmd::SetPool { host, url, user, pass }) => {
                assert_eq!(host, IpAddr::from([10, 0, 0, 5]));
                assert_eq!(url, "stratum+tcp://pool:3333");
                assert_eq!(user, "acct.w1");
                assert_eq!(pass, "x");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_history() {
        let args = Args::try_parse_from(["rigscan", "history", "10.0.0.7", "--limit", "5"]).unwrap();
        match args.command {
            Some(Cmd::History { host, limit }) => {
                assert_eq!(host, IpAddr::from([10, 0, 0, 7]));
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_run_is_default() {
        let args = Args::try_parse_from(["rigscan", "--subnet", "10.0.0.*"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.subnet.as_deref(), Some("10.0.0.*"));
    }
}
