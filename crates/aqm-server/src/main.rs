//! AQM broker binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! aqm-server --bind 0.0.0.0:4433
//!
//! # Start with TLS certificate, coins removed on first dispense
//! aqm-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem --single-use
//! ```

use std::time::Duration;

use aqm_core::{BrokerConfig, DispensePolicy};
use aqm_server::{Server, ServerRuntimeConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// AQM coin broker
#[derive(Parser, Debug)]
#[command(name = "aqm-server")]
#[command(about = "One-time coin broker: inventories and mailboxes")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Remove a coin from the inventory when it is dispensed
    #[arg(long)]
    single_use: bool,

    /// Days after which never-dispensed coins are purged
    #[arg(long, default_value = "30")]
    stale_after_days: u64,

    /// Seconds between stale coin purges
    #[arg(long, default_value = "3600")]
    purge_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(bind = %args.bind, single_use = args.single_use, "AQM broker starting");

    let dispense = if args.single_use { DispensePolicy::SingleUse } else { DispensePolicy::Shared };
    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        broker: BrokerConfig {
            dispense,
            stale_after: Duration::from_secs(args.stale_after_days * 24 * 60 * 60),
        },
        purge_interval: Duration::from_secs(args.purge_interval_secs.max(1)),
    };

    let server = Server::bind(config)?;

    tracing::info!(addr = %server.local_addr()?, "listening");

    server.run().await?;

    Ok(())
}
