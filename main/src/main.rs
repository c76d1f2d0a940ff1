#![allow(clippy::missing_docs_in_private_items)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::{
    cache::{Cache, RedisCache},
    storage::{
        db::PostgresClient,
        store::{PgStore, Store},
    },
    utils::config::{get_config, AppConfig, WorkerRole},
};
use pipeline_workers::{
    EmbeddingWorker, KeywordWorker, ScrapeWorker, StatusWorker, TitleWorker,
};
use providers::{Embedder, Fetcher, Generator, HttpFetcher, OpenAiProvider};
use worker_runtime::{
    handler::Handler, BusClient, BusPublisher, Publisher, Runner, RunnerConfig,
};

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// The service bundle constructed once at startup and handed to every
/// runner, instead of process-wide globals.
struct Services {
    bus: BusClient,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    publisher: Arc<dyn Publisher>,
    fetcher: Arc<dyn Fetcher>,
    generator: Arc<dyn Generator>,
    embedder: Arc<dyn Embedder>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let db = Arc::new(
        PostgresClient::connect(&config.database_url, config.db_max_connections).await?,
    );

    // Ensure db is initialized
    db.apply_migrations().await?;

    let cache = Arc::new(RedisCache::connect(&config.redis_url).await?);

    let bus = BusClient::connect(&config.nats_url, config.nats_creds_file.as_deref()).await?;
    bus.ensure_streams().await?;

    let provider = Arc::new(OpenAiProvider::from_config(
        &config.provider,
        config.keyword_prompt.clone(),
        config.title_prompt.clone(),
    )?);

    let services = Services {
        publisher: Arc::new(BusPublisher::new(&bus)),
        bus,
        store: Arc::new(PgStore::new(db)),
        cache,
        fetcher: Arc::new(HttpFetcher::new(FETCH_TIMEOUT)?),
        generator: Arc::clone(&provider) as Arc<dyn Generator>,
        embedder: provider,
    };

    let token = CancellationToken::new();
    spawn_signal_listener(token.clone());

    let handles = spawn_role_runners(&config, &services, &token)?;

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "worker task join error");
        }
    }

    info!("all workers stopped");
    Ok(())
}

/// Cancel the token on SIGINT or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, relying on ctrl-c");
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!("shutdown signal received");
        token.cancel();
    });
}

fn spawn_role_runners(
    config: &AppConfig,
    services: &Services,
    token: &CancellationToken,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let roles: Vec<WorkerRole> = match config.role {
        WorkerRole::All => vec![
            WorkerRole::Scrape,
            WorkerRole::Keyword,
            WorkerRole::Embedding,
            WorkerRole::Status,
            WorkerRole::Title,
        ],
        role => vec![role],
    };

    let mut handles = Vec::with_capacity(roles.len());
    for (index, role) in roles.iter().enumerate() {
        let runner_config = RunnerConfig {
            health_addr: offset_addr(&config.health_addr, index as u16)?,
            message_timeout: Duration::from_secs(config.message_timeout_secs),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        };

        let handle = match role {
            WorkerRole::Scrape => spawn_runner(
                services,
                ScrapeWorker::new(
                    Arc::clone(&services.store),
                    Arc::clone(&services.cache),
                    Arc::clone(&services.fetcher),
                    Arc::clone(&services.publisher),
                ),
                runner_config,
                token.clone(),
            ),
            WorkerRole::Keyword => spawn_runner(
                services,
                KeywordWorker::new(
                    Arc::clone(&services.store),
                    Arc::clone(&services.cache),
                    Arc::clone(&services.generator),
                    Arc::clone(&services.publisher),
                ),
                runner_config,
                token.clone(),
            ),
            WorkerRole::Embedding => spawn_runner(
                services,
                EmbeddingWorker::new(
                    Arc::clone(&services.store),
                    Arc::clone(&services.embedder),
                    Arc::clone(&services.publisher),
                    config.chunk_size,
                    config.chunk_overlap,
                ),
                runner_config,
                token.clone(),
            ),
            WorkerRole::Status => spawn_runner(
                services,
                StatusWorker::new(Arc::clone(&services.store)),
                runner_config,
                token.clone(),
            ),
            WorkerRole::Title => spawn_runner(
                services,
                TitleWorker::new(
                    Arc::clone(&services.store),
                    Arc::clone(&services.generator),
                ),
                runner_config,
                token.clone(),
            ),
            WorkerRole::All => continue,
        };
        handles.push(handle);
    }

    Ok(handles)
}

fn spawn_runner<H: Handler + 'static>(
    services: &Services,
    handler: H,
    config: RunnerConfig,
    token: CancellationToken,
) -> JoinHandle<()> {
    let bus = services.bus.clone();
    let publisher = Arc::clone(&services.publisher);

    tokio::spawn(async move {
        let runner = Runner::new(bus, publisher, Arc::new(handler), config);
        if let Err(e) = runner.run(token).await {
            error!(error = %e, "worker runner exited with error");
        }
    })
}

/// Shift the port of `host:port` by `offset` so co-located runners in
/// `all` mode each get their own health surface.
fn offset_addr(addr: &str, offset: u16) -> anyhow::Result<String> {
    if offset == 0 {
        return Ok(addr.to_string());
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("health_addr '{addr}' is missing a port"))?;
    let port: u16 = port.parse().context("health_addr port")?;
    let port = port
        .checked_add(offset)
        .ok_or_else(|| anyhow!("health port overflow"))?;

    Ok(format!("{host}:{port}"))
}
