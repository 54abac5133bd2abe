use clap::Parser;
use inspector_rs::{AppState, config::AppConfig, router};
use salvo::{Listener, Server, conn::TcpListener};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::parse();
    let bind = config.server.bind.clone();
    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!("❌ Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    info!("Storage backend: {:?}", state.store.backend());
    if !state.classifier.is_api_available() {
        info!("OPENAI_API_KEY not set, image analysis will report failures");
    }

    let acceptor = match TcpListener::new(bind.clone()).try_bind().await {
        Ok(acceptor) => acceptor,
        Err(e) => {
            error!("❌ Failed to bind {}: {}", bind, e);
            std::process::exit(1);
        }
    };
    info!("🚀 Inspector listening on {}", bind);

    Server::new(acceptor).serve(router::build(state)).await;
}
