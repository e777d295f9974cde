// =============================================================================
// Ignition Scanner — Main Entry Point
// =============================================================================
//
// Wires the durable stores, cache, bar store, engine, fan-out, push notifier
// and market-data ingestor into one `AppState`, then spawns the ingestor, the
// scheduler's tick/retention loops, and the Axum API server as independent
// long-lived tasks. Shuts down cleanly on Ctrl+C.
// =============================================================================

mod api;
mod app_state;
mod bar_store;
mod cache;
mod config;
mod engine;
mod error;
mod fanout;
mod market_data;
mod push_notifier;
mod rate_limit;
mod scheduler;
mod stores;
mod trading_day;
mod types;
mod ws_groups;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::bar_store::BarStore;
use crate::cache::RedisCacheStore;
use crate::config::AppConfig;
use crate::engine::Engine;
use crate::fanout::Fanout;
use crate::market_data::alpaca_feed::AlpacaFeed;
use crate::market_data::ingestor::Ingestor;
use crate::market_data::MarketDataFeed;
use crate::push_notifier::PushNotifier;
use crate::stores::postgres::{PgConfigStore, PgEventStore, PgPreferenceStore, PgUniverseStore, PgUserDirectory};
use crate::ws_groups::WsGroups;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("ignition scanner starting up");

    let config = AppConfig::from_env()?;

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    info!("connected to durable store");

    let cache: Arc<dyn cache::CacheStore> = Arc::new(RedisCacheStore::connect(&config.redis_url).await?);
    info!("connected to cache");

    let config_store: Arc<dyn stores::ConfigStore> = Arc::new(PgConfigStore::new(db_pool.clone()));
    let universe_store: Arc<dyn stores::UniverseStore> = Arc::new(PgUniverseStore::new(db_pool.clone()));
    let preference_store: Arc<dyn stores::PreferenceStore> = Arc::new(PgPreferenceStore::new(db_pool.clone()));
    let event_store: Arc<dyn stores::EventStore> = Arc::new(PgEventStore::new(db_pool.clone()));
    let user_directory: Arc<dyn stores::UserDirectory> =
        Arc::new(PgUserDirectory::new(db_pool.clone(), config.scanner_admin_email.clone()));

    let bar_store = Arc::new(BarStore::new(cache.clone()));

    let engine = Arc::new(Engine::new(
        config_store.clone(),
        universe_store.clone(),
        event_store.clone(),
        bar_store.clone(),
    ));

    let ws_groups = Arc::new(WsGroups::new());
    let fanout = Arc::new(Fanout::new(ws_groups.clone()));
    let push_notifier = Arc::new(PushNotifier::new(
        cache.clone(),
        preference_store.clone(),
        config.pushover_app_token.clone(),
    ));

    let feed: Arc<dyn MarketDataFeed> =
        Arc::new(AlpacaFeed::new(config.alpaca_key_id.clone(), config.alpaca_secret_key.clone()));
    let ingestor = Arc::new(Ingestor::new(
        feed,
        universe_store.clone(),
        bar_store.clone(),
        cache.clone(),
        &config,
    ));

    let state = Arc::new(AppState::new(
        config.clone(),
        config_store,
        universe_store,
        event_store,
        preference_store,
        user_directory,
        cache,
        bar_store,
        engine,
        fanout,
        push_notifier,
        ws_groups,
        ingestor.clone(),
    ));

    // ── Ingestor ─────────────────────────────────────────────────────────
    let ingestor_task = {
        let ingestor = ingestor.clone();
        tokio::spawn(async move { ingestor.run().await })
    };

    // ── Scheduler: scanner tick + retention sweep ───────────────────────
    let tick_task = {
        let state = state.clone();
        tokio::spawn(async move { scheduler::run_tick_loop(state).await })
    };
    let retention_task = {
        let state = state.clone();
        tokio::spawn(async move { scheduler::run_retention_loop(state).await })
    };

    // ── API server ───────────────────────────────────────────────────────
    let bind_addr = state.config.bind_addr.clone();
    let api_state = state.clone();
    let api_task = tokio::spawn(async move {
        let app = api::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("ignition scanner is running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = ingestor_task => {
            if let Err(e) = result {
                error!(error = %e, "ingestor task panicked");
            }
        }
        result = tick_task => {
            if let Err(e) = result {
                error!(error = %e, "scheduler tick task panicked");
            }
        }
        result = retention_task => {
            if let Err(e) = result {
                error!(error = %e, "retention task panicked");
            }
        }
        result = api_task => {
            if let Err(e) = result {
                error!(error = %e, "API server task panicked");
            }
        }
    }

    ingestor.request_shutdown();
    info!("ignition scanner shutting down");
    Ok(())
}
