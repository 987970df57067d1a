use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinematch_api::{
    config::Config,
    db::{create_pool, create_redis_client, Cache},
    routes::{create_router, AppState},
    services::{PgCatalog, PromptBuilder, StreamRelay, YoutubeTrailerFinder},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinematch_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    if config.llm_api_key.is_none() {
        tracing::warn!("LLM_API_KEY is not set, completions will be requested without a bearer token");
    }

    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to the catalog database")?;
    let redis_client = create_redis_client(&config.redis_url)?;
    let (cache, cache_writer) = Cache::new(redis_client);

    let http_client = reqwest::Client::new();

    let state = AppState {
        prompt_builder: PromptBuilder::new(config.llm_model.clone()),
        relay: StreamRelay::new(
            http_client.clone(),
            config.llm_api_url.clone(),
            config.llm_api_key.clone(),
        ),
        catalog: Arc::new(PgCatalog::new(
            pool,
            cache.clone(),
            config.image_base_url.clone(),
        )),
        trailers: Arc::new(YoutubeTrailerFinder::new(
            http_client,
            config.youtube_url.clone(),
            cache,
        )),
    };

    let app = create_router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    tracing::info!(address = %address, model = %config.llm_model, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache_writer.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
