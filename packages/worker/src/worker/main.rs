// Main entry point for the quiz worker

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worker_core::domains::control::{ControlStore, PgControlStore};
use worker_core::domains::notifications::PgNotificationLedger;
use worker_core::domains::questions::{PgHintStore, PgQuestionStore};
use worker_core::domains::scheduling::PgDailyScheduler;
use worker_core::domains::stories::PgStoryService;
use worker_core::domains::translations::PgTranslationCache;
use worker_core::domains::users::PgUserStore;
use worker_core::kernel::{ExpoClient, RigAiClient, SmtpEmailService, WorkerDeps};
use worker_core::worker::{ServerAiKeys, Worker};
use worker_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,worker_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Lingua Quiz worker");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(instance = %config.worker.instance, "Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let ai = Arc::new(RigAiClient::new());
    let control = Arc::new(PgControlStore::new(pool.clone()));

    // Operational "quiet boot": assert global pause before the first pass.
    if config.worker_start_paused {
        tracing::warn!("WORKER_START_PAUSED set, asserting global pause");
        control.set_global_pause(true).await?;
    }

    let deps = WorkerDeps::new(
        Arc::new(PgUserStore::new(pool.clone())),
        Arc::new(PgQuestionStore::new(pool.clone())),
        Arc::new(PgHintStore::new(pool.clone())),
        Arc::new(PgDailyScheduler::new(
            pool.clone(),
            config.worker.daily_repeat_avoid_days,
        )),
        Arc::new(PgStoryService::new(pool.clone(), ai.clone())),
        Arc::new(PgNotificationLedger::new(pool.clone())),
        Arc::new(PgTranslationCache::new(pool.clone())),
        control,
        ai,
        Arc::new(SmtpEmailService::new(&config.smtp)?),
        Arc::new(ExpoClient::new(config.expo_access_token.clone())),
    );

    let worker = Arc::new(
        Worker::new(config.worker.clone(), config.email.clone(), deps)
            .with_engagement_gate(config.story_engagement_gate)
            .with_server_keys(ServerAiKeys {
                openai: config.openai_api_key.clone(),
                anthropic: config.anthropic_api_key.clone(),
            }),
    );

    let shutdown = CancellationToken::new();
    let run_handle = tokio::spawn(worker.clone().start(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    worker.shutdown().await;
    shutdown.cancel();
    run_handle.await?.context("Worker run loop failed")?;

    tracing::info!("Worker exited cleanly");
    Ok(())
}
