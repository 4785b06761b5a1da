//! lingo-sync - drive a simulated session against the in-memory remote
//!
//! Seeds a demo user's history, friends and settings, logs in, watches the
//! shared data sources react to live writes and a push error, refreshes the
//! language aggregate, then logs out. Useful for eyeballing the sync event
//! stream and the retry/backoff logs without a real backend.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lingo_common::config::load_config;
use lingo_common::remote::{InMemoryRemote, RemoteError};
use lingo_sync::domains::friends::friends_collection;
use lingo_sync::domains::history::history_collection;
use lingo_sync::domains::settings::{settings_collection, PREFERENCES_DOC};
use lingo_sync::{DataSources, Phase};
use serde_json::json;
use tracing::{info, warn};

/// Command-line arguments for lingo-sync
#[derive(Parser, Debug)]
#[command(name = "lingo-sync")]
#[command(about = "Simulated session against the shared data sources")]
#[command(version)]
struct Args {
    /// Config file (overrides LINGO_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User id to log in as
    #[arg(short, long, default_value = "demo-user")]
    user: String,

    /// History display-row limit (overrides config)
    #[arg(long)]
    history_limit: Option<usize>,

    /// Log filter directive (overrides config)
    #[arg(long, env = "LINGO_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(limit) = args.history_limit {
        config.history.row_limit = limit;
    }
    config.validate().context("Invalid configuration")?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    info!(
        "Starting lingo-sync v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!(
        history_limit = config.history.row_limit,
        max_attempts = config.retry.max_attempts,
        "Configuration loaded"
    );

    let remote = Arc::new(InMemoryRemote::new());
    seed_demo_data(&remote, &args.user).await;

    let sources = Arc::new(DataSources::new(remote.clone(), &config));

    let mut sync_events = sources.events().subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = sync_events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => info!(target: "lingo_sync::events", "{}", line),
                Err(e) => warn!("Unserializable sync event: {}", e),
            }
        }
    });

    let mut history_rx = sources.history.observe();
    sources.on_login(&args.user).await?;
    // A second consumer asking for the same data reuses the subscription
    sources.history.start_observing(&args.user).await?;

    {
        let state = history_rx
            .wait_for(|s| s.phase == Phase::Active)
            .await
            .context("history source dropped")?;
        info!(records = state.value.count, "History loaded");
    }

    remote
        .set_document(
            &history_collection(&args.user),
            "live-1",
            json!({
                "sourceText": "where is the station?",
                "translatedText": "¿dónde está la estación?",
                "sourceLanguage": "en",
                "targetLanguage": "es",
                "timestamp": chrono::Utc::now().timestamp_millis(),
            }),
        )
        .await;
    history_rx.changed().await.context("history source dropped")?;
    info!(
        records = history_rx.borrow().value.count,
        spanish = sources.history.count_for_language("es"),
        "History updated live"
    );

    match sources.history.refresh_language_counts(&args.user).await {
        Ok(counts) => info!(?counts, "Language counts"),
        Err(e) => warn!("Language counts unavailable: {}", e),
    }

    remote
        .emit_error(
            &history_collection(&args.user),
            RemoteError::unavailable("listener reset by server"),
        )
        .await;
    history_rx.changed().await.context("history source dropped")?;
    {
        let state = history_rx.borrow();
        info!(
            records = state.value.count,
            error = ?state.error,
            "Push error observed, cached history retained"
        );
    }

    info!(
        pending = sources.friends.current().value.pending_requests,
        accepted = sources.friends.accepted().len(),
        "Friends"
    );
    info!(settings = ?sources.settings.settings(), "Settings");

    sources.on_logout().await;
    info!(
        live_history_listeners = remote.live_subscriptions(&history_collection(&args.user)).await,
        "Logged out"
    );

    event_logger.abort();
    Ok(())
}

async fn seed_demo_data(remote: &InMemoryRemote, user_id: &str) {
    let history = history_collection(user_id);
    let samples = [
        ("good morning", "buenos días", "en", "es"),
        ("thank you", "merci", "en", "fr"),
        ("where is the library?", "¿dónde está la biblioteca?", "en", "es"),
        ("see you tomorrow", "bis morgen", "en", "de"),
    ];
    let now = chrono::Utc::now().timestamp_millis();
    for (i, (source, translated, from, to)) in samples.iter().enumerate() {
        remote
            .set_document(
                &history,
                &format!("seed-{}", i),
                json!({
                    "sourceText": source,
                    "translatedText": translated,
                    "sourceLanguage": from,
                    "targetLanguage": to,
                    "timestamp": now - (i as i64) * 60_000,
                    "favorite": i == 0,
                }),
            )
            .await;
    }

    let friends = friends_collection(user_id);
    remote
        .set_document(&friends, "ana", json!({"displayName": "Ana", "status": "accepted", "unreadCount": 2}))
        .await;
    remote
        .set_document(&friends, "bo", json!({"displayName": "Bo", "status": "pending_incoming"}))
        .await;

    remote
        .set_document(
            &settings_collection(user_id),
            PREFERENCES_DOC,
            json!({"nativeLanguage": "en", "learningLanguage": "es", "autoSpeak": true}),
        )
        .await;
}
