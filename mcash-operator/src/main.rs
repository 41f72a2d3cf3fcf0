//! mcash-operator service entry point.

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcash_operator::{app_router, AppState, OperatorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcash_operator=info,mcash_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = OperatorConfig::from_env()?;
    match &config.shadow_db {
        Some(path) => tracing::info!("Shadow store persisted at {}", path.display()),
        None => tracing::info!("Shadow store held in memory"),
    }

    let state = AppState::from_config(&config).await?;
    let app = app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
