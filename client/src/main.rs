use std::path::PathBuf;

use anyhow::Result;
use burrow::{BurrowConfig, TunnelAgent};
use burrow_relay::RelayServer;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "burrow")]
#[command(author = "Burrow Team")]
#[command(version = "0.1.0")]
#[command(about = "Serve HTTP from behind a NAT through a polling relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: burrow.yml in the current or home directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay
    Server {
        /// Address the tunnel agent polls (keep it private)
        client_addr: Option<String>,

        /// Public address external callers reach
        external_addr: Option<String>,

        /// Seconds a caller waits for its response
        #[arg(long)]
        response_timeout: Option<u64>,

        /// Outstanding requests before callers get 503
        #[arg(long)]
        max_pending: Option<usize>,
    },
    /// Run the tunnel agent next to the target service
    Client {
        /// Relay client-facing URL, e.g. http://relay.internal:9000
        server_url: Option<String>,

        /// Target service URL, e.g. http://localhost:3000
        target_url: Option<String>,

        /// Milliseconds between empty polls
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Ask the relay to hold each poll open for up to this many seconds
        #[arg(long)]
        long_poll: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("burrow={0},burrow_relay={0},tower_http={0}", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = BurrowConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Server {
            client_addr,
            external_addr,
            response_timeout,
            max_pending,
        } => {
            let relay = &mut config.relay;
            if let Some(addr) = client_addr {
                relay.client_addr = addr;
            }
            if let Some(addr) = external_addr {
                relay.external_addr = addr;
            }
            if let Some(secs) = response_timeout {
                relay.response_timeout_secs = secs;
            }
            if let Some(n) = max_pending {
                relay.max_pending = n;
            }

            RelayServer::new(config.relay)?.run(shutdown_signal()).await?;
        }
        Commands::Client {
            server_url,
            target_url,
            poll_interval_ms,
            long_poll,
        } => {
            let agent = &mut config.agent;
            if let Some(url) = server_url {
                agent.server_url = url;
            }
            if let Some(url) = target_url {
                agent.target_url = url;
            }
            if let Some(ms) = poll_interval_ms {
                agent.poll_interval_ms = ms;
            }
            if let Some(secs) = long_poll {
                agent.long_poll_secs = secs;
            }

            TunnelAgent::new(config.agent)?.run_until(shutdown_signal()).await;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
