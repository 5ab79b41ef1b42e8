use mock_service::{Behaviour, MockConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mock_service=info,tower_http=info")),
        )
        .init();

    let behaviour = match std::env::var("MOCK_BEHAVIOUR") {
        Ok(behaviour) => behaviour.parse()?,
        Err(_) => Behaviour::Normal,
    };
    let latency = match std::env::var("MOCK_LATENCY_MS") {
        Ok(ms) => Some(Duration::from_millis(ms.parse()?)),
        Err(_) => None,
    };

    let addr: SocketAddr = "0.0.0.0:8080".parse()?;
    mock_service::run(addr, MockConfig { behaviour, latency }).await
}
