//! Echo server.
//!
//! Demonstrates:
//! - Starting a supervisor with options loaded from JSON
//! - The built-in `Echo` handler
//! - Graceful shutdown on Ctrl+C
//!
//! Usage:
//!   cargo run --example echo_server
//!   cargo run --example echo_server -- --debug
//!   cargo run --example echo_server -- --addr :9001
//!   cargo run --example echo_server -- --config relay.json
//!
//! Try it with any WebSocket client, e.g. `websocat ws://127.0.0.1:9001`.

// ============================================================================
// Imports
// ============================================================================

use tracing_subscriber::EnvFilter;
use wsrelay::{Echo, RelayOptions, Result, Supervisor};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_ADDR: &str = "127.0.0.1:9001";

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    addr: String,
    config: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            addr: value_of("--addr").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            config: value_of("--config"),
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug { "wsrelay=debug" } else { "wsrelay=info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<()> {
    println!("=== Echo Server ===\n");

    let options = match &args.config {
        Some(path) => RelayOptions::from_json(&std::fs::read_to_string(path)?)?,
        None => RelayOptions::new(),
    };

    println!("[Setup] Options:");
    println!("        max payload : {} bytes", options.max_payload_size);
    println!("        frame kind  : {:?}", options.outbound_kind);
    println!("        capacity    : {} chunks\n", options.stream_capacity);

    let supervisor = Supervisor::builder()
        .address(&args.addr)
        .options(options)
        .handler(Echo)
        .start()
        .await?;

    println!("[Ready] Listening on {}", supervisor.ws_url());
    println!("Press Ctrl+C to exit...");
    tokio::signal::ctrl_c().await.ok();

    println!("\n[Shutdown] Closing {} connection(s)...", supervisor.connection_count());
    supervisor.shutdown().await;

    let stats = supervisor.pool_stats();
    println!(
        "        ✓ Done (buffers allocated: {}, reused: {})",
        stats.allocated, stats.reused
    );

    Ok(())
}
