use clap::Parser;
use tokio::net::TcpListener;

use parley_relay::{serve, Registry};

#[derive(Parser)]
#[command(name = "parley-relay", about = "Call signaling relay for parley clients")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 4100)]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_relay=info".into()),
        )
        .init();

    let args = Args::parse();
    let registry = Registry::new();

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!("parley-relay listening on {}", addr);

    serve(listener, registry).await;
}
