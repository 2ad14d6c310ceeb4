use anyhow::Result;
use clap::Parser;
use tracing::info;
use twist_relay::config::{Config, DEFAULT_PORT, DEFAULT_STUN_SERVER};
use twist_relay::server::{self, AppState};

#[derive(Parser)]
#[command(name = "twist-relay")]
#[command(about = "WebRTC + WebSocket relay for robot teleoperation", long_about = None)]
struct Cli {
    /// HTTP server port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// STUN server URL for WebRTC NAT traversal
    #[arg(long, env = "STUN_SERVER", default_value = DEFAULT_STUN_SERVER)]
    stun_server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("twist_relay=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config {
        port: cli.port,
        stun_server: cli.stun_server,
        ..Default::default()
    };
    info!(
        "configuration: port={}, stun={}",
        config.port, config.stun_server
    );

    let port = config.port;
    let state = AppState::new(config);

    println!("twist-relay: WebRTC + WebSocket velocity relay");
    println!();
    println!("HTTP endpoints:");
    println!("  POST /offer  - WebRTC signaling");
    println!("  POST /ice    - ICE candidates");
    println!("  GET  /status - Server status");
    println!("  GET  /stats  - Message statistics");
    println!("  GET  /health - Health check");
    println!();
    println!("WebSocket endpoints:");
    println!("  ws://localhost:{port}/ws/signaling - Signaling + ping/pong keepalive");
    println!("  ws://localhost:{port}/ws/data      - Data transfer (twist messages)");
    println!();
    println!("Press Ctrl+C to stop");

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("server starting on http://localhost:{}", port);

    server::run(listener, state).await
}
