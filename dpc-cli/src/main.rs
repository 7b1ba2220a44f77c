//! DPC command-line interface
//!
//! One binary, two roles. With no positional argument it proxies stdio
//! through the tunnel, which is what an OpenSSH ProxyCommand wants:
//!
//! ```text
//! ssh -o ProxyCommand="dpc --domain t.example.com" user@anything
//! ```
//!
//! With an upstream `host:port` it serves the tunnel: answer DNS TXT
//! queries for the domain and proxy each session to the upstream.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dpc_engine::{Client, ClientConfig, DpcServer, ServerConfig, UdpTxtExchange};

/// Proxy stdio over DNS TXT queries
#[derive(Parser)]
#[command(name = "dpc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Upstream host:port to proxy sessions to; serves DNS when present,
    /// proxies stdio when absent
    upstream: Option<String>,

    /// Parent DNS domain
    #[arg(long, value_name = "NAME")]
    domain: String,

    /// DNS server listen address
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:53")]
    listen: SocketAddr,

    /// Maximum client poll interval in seconds (less jitter)
    #[arg(long, value_name = "SECONDS", default_value_t = 5)]
    poll_max: u64,

    /// Idle session prune interval in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 60)]
    prune_interval: u64,

    /// Resolver address for client queries; defaults to the first
    /// system nameserver
    #[arg(long, value_name = "ADDR")]
    resolver: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.upstream.clone() {
        Some(upstream) => run_server(cli, upstream).await,
        None => run_client(cli).await,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_server(cli: Cli, upstream: String) -> Result<()> {
    let config = ServerConfig {
        domain: cli.domain,
        listen: cli.listen,
        upstream,
        prune_interval: Duration::from_secs(cli.prune_interval),
    };

    let server = DpcServer::bind(config)
        .await
        .context("starting DNS server")?;
    server.run().await.context("serving DNS")
}

async fn run_client(cli: Cli) -> Result<()> {
    let start = Instant::now();

    let exchange = match cli.resolver {
        Some(addr) => UdpTxtExchange::new(addr),
        None => UdpTxtExchange::system().context("finding a resolver")?,
    };

    let config = ClientConfig {
        domain: cli.domain,
        poll_max: Duration::from_secs(cli.poll_max),
    };
    let client = Client::new(config, exchange).context("creating tunnel client")?;

    let (totals, outcome) = client.run().await;
    info!(
        "finished proxying after {:?}: {} bytes forward, {} bytes reverse, {} total",
        start.elapsed(),
        totals.forward,
        totals.reverse,
        totals.forward + totals.reverse,
    );

    outcome.context("proxying")
}
