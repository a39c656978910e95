use server::{run, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let env_filter = std::env::var("APP_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .init();

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind relay address");
    tracing::info!(
        component = "relay",
        addr = %listener.local_addr().expect("local addr"),
        "signaling relay listening"
    );

    run(listener, AppState::new()).await.expect("relay server failed");
}
