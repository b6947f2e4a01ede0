use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tryon_proxy::config::Settings;
use tryon_proxy::fal::FalClient;
use tryon_proxy::store::{LocalFileStorage, spawn_sweeper};
use tryon_proxy::web::{AppState, create_router};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tryon_proxy=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Arc::new(Settings::from_env());
    tokio::fs::create_dir_all(&settings.tmp_dir).await?;

    let storage = Arc::new(LocalFileStorage::new(
        settings.tmp_dir.clone(),
        settings.tmp_base_url(),
    ));
    let provider = Arc::new(FalClient::new(
        settings.fal_key.clone().unwrap_or_default(),
    ));

    let sweeper = spawn_sweeper(storage.clone(), settings.delete_after);

    let state = AppState {
        settings: settings.clone(),
        storage,
        provider,
    };
    let router = create_router(state);

    let bind_address = settings.bind_address();
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(
        "try-on proxy listening on http://{} (api at {}, artifact ttl {} min)",
        bind_address,
        settings.api_path(),
        settings.ttl_minutes()
    );

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    sweeper.abort();
    Ok(())
}
