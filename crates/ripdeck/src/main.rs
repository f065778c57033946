//! Daemon entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ripdeck::{StationConfig, ToolConfig};

#[derive(Parser, Debug)]
#[command(
    name = "ripdeck",
    version,
    about = "Control daemon for an optical-disc ripping station"
)]
struct Cli {
    /// Panel listener address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    control_addr: SocketAddr,

    /// Health/shutdown HTTP listener address.
    #[arg(long, default_value = "0.0.0.0:8081")]
    ops_addr: SocketAddr,

    /// Directory ripped tracks are written to.
    #[arg(long, default_value = "rips")]
    output_dir: PathBuf,

    /// Disc inspection tool (lsdvd-compatible output).
    #[arg(long, default_value = "/usr/bin/lsdvd")]
    inspector: PathBuf,

    /// Track ripping tool (mplayer-compatible dump output).
    #[arg(long, default_value = "/usr/bin/mplayer")]
    ripper: PathBuf,

    /// Tray eject tool.
    #[arg(long, default_value = "/usr/bin/eject")]
    eject: PathBuf,

    /// Seconds between free-space reports.
    #[arg(long, default_value_t = 10)]
    telemetry_interval: u64,
}

impl Cli {
    /// Overriding a tool path keeps the stock argument template.
    fn into_config(self) -> StationConfig {
        let defaults = StationConfig::default();
        StationConfig {
            control_addr: self.control_addr,
            ops_addr: self.ops_addr,
            output_dir: self.output_dir,
            inspector: ToolConfig {
                program: self.inspector,
                ..defaults.inspector
            },
            ripper: ToolConfig {
                program: self.ripper,
                ..defaults.ripper
            },
            eject: ToolConfig {
                program: self.eject,
                ..defaults.eject
            },
            telemetry_interval: Duration::from_secs(self.telemetry_interval),
        }
    }
}

/// Honors `RUST_LOG` for filtering and `LOG_FORMAT=json` for structured output.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("ripdeck=info")
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    tracing::info!(version = ripdeck::VERSION, "ripdeck starting");
    ripdeck::server::serve(cli.into_config()).await
}
