//! confhubd: the confhub daemon.
//!
//! One binary, two roles:
//! - `discover`: the registry config servers and clients report to
//! - `server`: a config server (release engine + long-poll endpoint)
//!
//! # Usage
//!
//! ```text
//! confhubd --config /etc/confhub.toml discover --port 8500
//! confhubd --config /etc/confhub.toml server --env product --discover-addr 10.0.0.1:8500
//! confhubd print-config > confhub.toml
//! ```

mod discover_mode;
mod server_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use confhub_core::{CenterConfig, EnvType};
use tokio::sync::watch;
use tracing::{error, info};

const DEFAULT_LOG_FILTER: &str = "info,confhubd=debug,confhub=debug";

#[derive(Parser)]
#[command(name = "confhubd", about = "confhub config center daemon")]
struct Cli {
    /// TOML configuration file; every field has a default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the discover service.
    Discover {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Directory of the coordination store.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Liveness sweep interval in milliseconds.
        #[arg(long)]
        sweep_interval_ms: Option<u64>,
    },

    /// Run a config server.
    Server {
        /// Address to bind and to advertise to clients.
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Environment served (develop, test, product).
        #[arg(long)]
        env: Option<EnvType>,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// `host:port` of the discover service.
        #[arg(long)]
        discover_addr: Option<String>,

        /// Long-poll timeout in seconds.
        #[arg(long)]
        watch_timeout_secs: Option<u64>,
    },

    /// Print the effective configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => CenterConfig::from_file(path)?,
        None => CenterConfig::default(),
    };

    match cli.command {
        Command::Discover {
            host,
            port,
            data_dir,
            sweep_interval_ms,
        } => {
            let settings = &mut config.discover;
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(data_dir) = data_dir {
                settings.data_dir = data_dir;
            }
            if let Some(ms) = sweep_interval_ms {
                settings.sweep_interval_ms = ms;
            }
            discover_mode::run_discover(config.discover).await
        }
        Command::Server {
            host,
            port,
            env,
            data_dir,
            discover_addr,
            watch_timeout_secs,
        } => {
            let settings = &mut config.server;
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(env) = env {
                settings.env = env;
            }
            if let Some(data_dir) = data_dir {
                settings.data_dir = data_dir;
            }
            if let Some(addr) = discover_addr {
                settings.discover_addr = addr;
            }
            if let Some(secs) = watch_timeout_secs {
                settings.watch_timeout_secs = secs;
            }
            server_mode::run_server(config.server).await
        }
        Command::PrintConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve on Ctrl-C and tell background tasks to stop.
async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
    tx.send_replace(true);
}
