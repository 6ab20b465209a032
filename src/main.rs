use std::sync::Arc;

use anyhow::Context;
use pedalshare::{
    app::{App, Collaborators},
    cache::{CacheBackend, MemoryCache, RedisCache},
    config::Config,
    jobs::{HttpMailer, LogMailer, Mailer},
    store::Store,
    verify::TesseractExtractor,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Store::connect(&config.database_url)
        .await
        .with_context(|| format!("could not open {}", config.database_url))?;
    info!(url = %config.database_url, "database ready");

    let cache: Arc<dyn CacheBackend> = match &config.redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(redis) => {
                info!("listing cache backed by redis");
                Arc::new(redis)
            }
            Err(err) => {
                warn!(error = %err, "redis unavailable, caching in process");
                Arc::new(MemoryCache::default())
            }
        },
        None => Arc::new(MemoryCache::default()),
    };

    let mailer: Arc<dyn Mailer> = match &config.mail_api_url {
        Some(url) => Arc::new(HttpMailer::new(
            url.clone(),
            config.mail_api_key.clone(),
            config.mail_from.clone(),
        )?),
        None => {
            warn!("MAIL_API_URL not set, notifications are only logged");
            Arc::new(LogMailer)
        }
    };

    let app = App::assemble(
        &config,
        store,
        Collaborators {
            cache,
            extractor: Arc::new(TesseractExtractor::new(config.ocr_command.clone())),
            mailer,
        },
    )
    .await?;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("could not bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, app.router())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "could not listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        })
        .await?;

    app.shutdown().await;
    Ok(())
}
