mod bus;
mod cache;
mod core;
mod credentials;
mod dao;
mod db;
mod depth;
mod feed;
mod ingestion;
mod instrument_cache;
mod persistence;
mod signal;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::bus::Bus;
use crate::cache::Cache;
use crate::core::{AppConfig, AppError};
use crate::credentials::CredentialProvider;
use crate::db::Db;
use crate::instrument_cache::InstrumentCache;

fn usage() -> &'static str {
    r#"Usage:
    cargo run -- ticker
    cargo run -- depth
    cargo run -- workers
    cargo run -- signals
    cargo run -- instruments

Env:
    DATA_SOURCE (kite|dhan)
    DATABASE_URL
    REDIS_URL (default redis://127.0.0.1:6379)
    RABBITMQ_URL (default amqp://127.0.0.1:5672/%2f)
    TOKEN_FILE_PATH (default ./access_token.json)
    CLIENT_ID, API_KEY
    NOTIFICATION_WEBHOOK_URL
    BATCH_SIZE, BATCH_TIMEOUT_SECONDS
    RECONNECT_MAX_ATTEMPTS, RECONNECT_DELAY_SECONDS
    DB_AUTO_MIGRATE
"#
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mut args = std::env::args().skip(1);
    let cmd = args.next().unwrap_or_else(|| "ticker".to_string());

    let result = match cmd.as_str() {
        "ticker" => run_ticker().await,
        "depth" => run_depth().await,
        "workers" => run_workers().await,
        "signals" => run_signals().await,
        "instruments" => run_instruments().await,
        _ => {
            eprintln!("Unknown command: {cmd}\n\n{}", usage());
            std::process::exit(2);
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "process exited with error");
    }
    result
}

async fn bootstrap() -> Result<(Arc<AppConfig>, Arc<Db>, Arc<Cache>, Arc<InstrumentCache>), AppError> {
    let config = Arc::new(AppConfig::from_env()?);
    let db = Arc::new(Db::connect(&config.database_url).await?);
    if config.db_auto_migrate {
        db::ensure_schema(&db).await?;
    }
    let cache = Arc::new(Cache::connect(&config.redis_url, config.cache_op_timeout).await?);
    let instruments = Arc::new(InstrumentCache::load(&db, &cache).await?);
    info!(instrument_count = instruments.len(), "instrument cache loaded");
    Ok((config, db, cache, instruments))
}

/// Waits for either Ctrl+C or SIGTERM, whichever arrives first (§5).
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

async fn run_ticker() -> Result<(), AppError> {
    let (config, _db, cache, instruments) = bootstrap().await?;
    let credentials = Arc::new(CredentialProvider::new(config.token_file_path.clone(), cache.clone()));
    let bus = Arc::new(Bus::connect(&config.rabbitmq_url).await?);
    bus.declare_durable_queue(crate::bus::TICKS_QUEUE).await?;

    let instrument_refs = instruments.all_refs();
    let (tx, rx) = mpsc::channel(4096);

    let health = Arc::new(crate::ingestion::IngestionHealth::default());

    let transport = crate::ingestion::FeedTransport::new(
        config.clone(),
        credentials,
        instruments.clone(),
        instrument_refs,
        tx,
        health.clone(),
    );
    let publisher = crate::ingestion::Publisher::new(bus.clone(), rx);

    let transport_handle = transport.spawn();
    let publisher_handle = publisher.spawn();
    let heartbeat_handle = tokio::spawn(health.run_heartbeat(cache.clone(), std::time::Duration::from_secs(10)));

    wait_for_shutdown_signal().await;
    info!("shutting down ticker process");
    transport_handle.abort();
    publisher_handle.abort();
    heartbeat_handle.abort();
    Ok(())
}

async fn run_depth() -> Result<(), AppError> {
    let (config, db, cache, instruments) = bootstrap().await?;
    let credentials = Arc::new(CredentialProvider::new(config.token_file_path.clone(), cache.clone()));
    let instrument_refs = instruments.all_refs();
    let (tx, mut rx) = mpsc::channel(1024);

    let runner = crate::depth::DepthFeedRunner::new(config.clone(), credentials, instrument_refs, tx);
    let runner_handle = runner.spawn();

    let db_for_task = db.clone();
    let cache_for_task = cache.clone();
    let persist_handle = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            let security_id = snapshot.security_id.to_string();
            let now = chrono::Utc::now();
            if let Err(e) = crate::depth::persistence::persist_snapshot(db_for_task.client(), &security_id, now, &snapshot).await {
                tracing::warn!(error = %e, security_id, "failed to persist depth snapshot");
            }
            crate::depth::persistence::publish_top_levels(&cache_for_task, &security_id, &snapshot).await;
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutting down depth process");
    runner_handle.abort();
    persist_handle.abort();
    Ok(())
}

async fn run_workers() -> Result<(), AppError> {
    let (config, db, cache, _instruments) = bootstrap().await?;
    let bus = Arc::new(Bus::connect(&config.rabbitmq_url).await?);

    let worker = crate::persistence::PersistenceWorker::new(bus, db, cache, config.batch_size, config.batch_timeout);
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run("ticks-worker").await {
            error!(error = %e, "persistence worker exited");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutting down workers process");
    worker_handle.abort();
    Ok(())
}

async fn run_signals() -> Result<(), AppError> {
    let (config, db, cache, instruments) = bootstrap().await?;
    let credentials = Arc::new(CredentialProvider::new(config.token_file_path.clone(), cache.clone()));
    let instrument_refs = instruments.all_refs();
    let (tx, mut rx) = mpsc::channel(1024);

    let runner = crate::depth::DepthFeedRunner::new(config.clone(), credentials, instrument_refs, tx);
    let runner_handle = runner.spawn();

    let buffers: Arc<tokio::sync::Mutex<std::collections::HashMap<String, Arc<crate::depth::DepthRingBuffer>>>> =
        Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new()));

    let buffers_for_feed = buffers.clone();
    let feed_handle = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            let mut guard = buffers_for_feed.lock().await;
            let buffer = guard
                .entry(snapshot.security_id.to_string())
                .or_insert_with(|| Arc::new(crate::depth::DepthRingBuffer::new()))
                .clone();
            drop(guard);
            buffer.push(snapshot);
        }
    });

    let webhook_url = config.notification_webhook_url.clone();
    let webhook_timeout = config.webhook_timeout;
    let eval_handle = tokio::spawn(async move {
        let mut analyzers: std::collections::HashMap<String, crate::signal::SecurityAnalyzer> = std::collections::HashMap::new();
        let mut dispatcher = crate::signal::AlertDispatcher::new(webhook_url, webhook_timeout);
        let mut ticker = tokio::time::interval(crate::signal::EVALUATION_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let security_ids: Vec<String> = buffers.lock().await.keys().cloned().collect();
            for security_id in security_ids {
                let buffer = {
                    let guard = buffers.lock().await;
                    match guard.get(&security_id) {
                        Some(b) => b.clone(),
                        None => continue,
                    }
                };
                let analyzer = analyzers
                    .entry(security_id.clone())
                    .or_insert_with(|| crate::signal::SecurityAnalyzer::new(security_id.clone()));
                let Some(snapshot) = analyzer.evaluate(&*buffer, std::time::Instant::now()) else {
                    continue;
                };

                if let Err(e) = crate::signal::persistence::persist_signal(db.client(), chrono::Utc::now(), &snapshot).await {
                    tracing::warn!(error = %e, security_id, "failed to persist signal");
                }
                crate::signal::persistence::cache_signal_state(&cache, &snapshot).await;
                dispatcher.notify_snapshot(&snapshot).await;
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutting down signals process");
    runner_handle.abort();
    feed_handle.abort();
    eval_handle.abort();
    Ok(())
}

async fn run_instruments() -> Result<(), AppError> {
    let (_config, db, cache, instruments) = bootstrap().await?;
    let count = instruments.reload(&db, &cache).await?;
    println!("Reloaded {count} instruments");
    Ok(())
}
