use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use coursefind::config::ServeCli;
use coursefind::embedder::openai::OpenAiEmbedder;
use coursefind::recommend::Catalogs;
use coursefind::{telemetry, ApiState, Encoder, Recommender};

fn main() -> Result<()> {
    let cli = ServeCli::parse();
    telemetry::init(cli.log_format)?;
    let limits = cli.ranking_limits()?;
    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;

    // The blocking HTTP client must be created and dropped outside the runtime.
    let encoder: Arc<dyn Encoder> = Arc::new(OpenAiEmbedder::new(cli.encoder.settings())?);
    let catalogs = Catalogs::load(
        &cli.catalogs.udemy(),
        &cli.catalogs.coursera(),
        &cli.catalogs.youtube(),
    )?;
    let recommender = Recommender::new(Arc::clone(&encoder), catalogs, limits)?;
    let state = ApiState::new(Arc::new(recommender), &cli.cors_allow_origin)?;
    tracing::info!(
        candidates = limits.candidates(),
        top = limits.top(),
        model = %cli.encoder.model,
        "recommender ready"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        coursefind::serve(listener, state, shutdown_signal()).await
    })?;
    drop(runtime);
    drop(encoder);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c; serving until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
