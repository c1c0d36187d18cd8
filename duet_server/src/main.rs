//! Signaling server binary.
//!
//! # Usage
//!
//! ```bash
//! ADMIN_PASSWORD=secret duet-signaling --port 3000 --public-dir ./public
//! ```

use clap::Parser;
use duet_server::{Server, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Room-code signaling relay for two-party WebRTC calls
#[derive(Parser, Debug)]
#[command(name = "duet-signaling")]
#[command(version)]
struct Args {
    /// Interface to bind to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Shared secret for room creation and the room listing
    #[arg(long, env = "ADMIN_PASSWORD", default_value = duet_server::config::DEFAULT_ADMIN_PASSWORD, hide_env_values = true)]
    admin_password: String,

    /// Directory of static files to serve
    #[arg(long, env = "PUBLIC_DIR")]
    public_dir: Option<PathBuf>,

    /// Reclaim rooms left empty for this many seconds
    #[arg(long, env = "ROOM_TTL_SECS")]
    room_ttl_secs: Option<u64>,

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

    let config = ServerConfig {
        bind_address: SocketAddr::new(args.bind, args.port),
        admin_password: args.admin_password,
        public_dir: args.public_dir,
        room_ttl: args.room_ttl_secs.map(Duration::from_secs),
    };

    if config.uses_default_password() {
        tracing::warn!("ADMIN_PASSWORD not set - using the built-in default password");
    }

    let server = Server::bind(config).await?;

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
