//! Presence-aware WebSocket message relay server.
//!
//! Accepts connections on `/ws`, places clients into named rooms (sharding
//! full ones), routes unicast and broadcast envelopes between occupants, and
//! disconnects peers that stop answering heartbeats.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin server
//! cargo run --bin server -- --host 0.0.0.0 --port 3000 --static-dir public
//! ```

use std::path::PathBuf;

use clap::Parser;
use room_relay::common::logger::setup_logger;
use room_relay::server::{RelayConfig, run_server};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Presence-aware WebSocket message relay", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Directory of static client assets served next to the relay
    #[arg(long, default_value = "public")]
    static_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    let config = RelayConfig {
        host: args.host,
        port: args.port,
        static_dir: args.static_dir,
        ..RelayConfig::default()
    };

    if let Err(e) = run_server(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
