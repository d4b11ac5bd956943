// zkdm/zkdm-backend/src/main.rs

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zkdm_backend::{config::ServiceConfig, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,zkdm_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    tracing::info!(
        records = ?config.record_backend,
        assets = ?config.asset_backend,
        remote_vk = config.vk_service_url.is_some(),
        "starting zkdm backend"
    );
    serve(config).await
}
