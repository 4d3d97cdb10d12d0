//! AQM client binary.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local broker as alice, assuming bob is a close contact
//! aqm-client --user alice --contact bob=60
//! ```
//!
//! Type `recipient: message` to send, `exit` to quit.

use std::time::Duration;

use aqm_client::{ClientConfig, Timing};
use aqm_core::DeviceContext;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// AQM client
#[derive(Parser, Debug)]
#[command(name = "aqm-client")]
#[command(about = "One-time coin messaging client")]
#[command(version)]
struct Args {
    /// Broker address
    #[arg(short, long, default_value = "127.0.0.1:4433")]
    server: String,

    /// Our identity
    #[arg(short, long)]
    user: String,

    /// Contact with an assumed per-cycle message rate, as `name=rate`
    #[arg(long = "contact", value_parser = parse_contact)]
    contacts: Vec<(String, u32)>,

    /// Seconds between maintenance cycles
    #[arg(long, default_value = "30")]
    maintenance_secs: u64,

    /// Seconds between mailbox checks
    #[arg(long, default_value = "2")]
    listener_secs: u64,

    /// Milliseconds allowed for one broker call
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    /// Battery charge reported to the device oracle (0-100)
    #[arg(long, default_value = "100")]
    battery: u8,

    /// Report a cellular connection instead of wifi
    #[arg(long)]
    cellular: bool,

    /// Cellular signal strength in dBm
    #[arg(long, default_value = "-70", allow_hyphen_values = true)]
    signal_dbm: i16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_contact(s: &str) -> Result<(String, u32), String> {
    let (name, rate) = s.split_once('=').ok_or_else(|| format!("expected name=rate, got '{s}'"))?;
    if name.is_empty() {
        return Err("contact name must not be empty".to_string());
    }
    let rate = rate.parse().map_err(|e| format!("invalid rate '{rate}': {e}"))?;
    Ok((name.to_string(), rate))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ClientConfig {
        server_addr: args.server,
        user: args.user,
        baseline: args.contacts,
        device: DeviceContext {
            battery_pct: args.battery.min(100),
            wifi_connected: !args.cellular,
            signal_dbm: args.signal_dbm,
        },
        timing: Timing {
            maintenance_interval: Duration::from_secs(args.maintenance_secs.max(1)),
            listener_interval: Duration::from_secs(args.listener_secs.max(1)),
            ..Timing::default()
        },
        request_timeout: Duration::from_millis(args.timeout_ms.max(1)),
        ..ClientConfig::default()
    };

    aqm_client::run(config).await?;

    Ok(())
}
