//! Targetwise API server
//!
//! Usage:
//!   GEMINI_API_KEY=... TARGETWISE_BIND=127.0.0.1:3741 targetwise-server
//!
//! Or with args:
//!   targetwise-server --store sqlite --db /path/to/targetwise.db --bind 0.0.0.0:3741

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use targetwise_lib::ai_client::GeminiClient;
use targetwise_lib::db::{CategoryStore, Database, MemoryStore, RecommendationLog};
use targetwise_lib::http_server::{self, AppState};
use targetwise_lib::meta_client::{MetaApiClient, MetaCredentials};
use targetwise_lib::settings::{self, SettingsStore, StoreBackend};
use targetwise_lib::taxonomy;

struct Args {
    db: Option<String>,
    bind: Option<String>,
    store: Option<StoreBackend>,
    config_dir: Option<PathBuf>,
}

fn print_help() {
    println!("targetwise-server - Meta ad targeting assistant API");
    println!();
    println!("Usage: targetwise-server [--store memory|sqlite] [--db PATH] [--bind ADDR:PORT] [--config-dir DIR]");
    println!();
    println!("Environment variables:");
    println!("  GEMINI_API_KEY       Gemini API key for recommendations");
    println!("  GEMINI_MODEL         Model name (default: {})", settings::DEFAULT_GEMINI_MODEL);
    println!("  META_ACCESS_TOKEN    Meta Marketing API token");
    println!("  META_AD_ACCOUNT_ID   Meta ad account id");
    println!("  TARGETWISE_STORE     memory or sqlite (default: memory)");
    println!("  TARGETWISE_DB        SQLite path");
    println!("  TARGETWISE_BIND      Bind address (default: {})", settings::DEFAULT_BIND);
    println!("  RUST_LOG             Log filter (default: info)");
}

// Parse simple args (no clap to keep binary small)
fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args { db: None, bind: None, store: None, config_dir: None };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--db", Some(v)) => parsed.db = Some(v.clone()),
            ("--bind", Some(v)) => parsed.bind = Some(v.clone()),
            ("--config-dir", Some(v)) => parsed.config_dir = Some(PathBuf::from(v)),
            ("--store", Some(v)) => {
                parsed.store = Some(
                    StoreBackend::from_str(v).ok_or_else(|| format!("Unknown store '{}', expected memory or sqlite", v))?,
                );
            }
            ("--help" | "-h", _) => {
                print_help();
                std::process::exit(0);
            }
            (other, _) => {
                log::warn!("[Server] Ignoring argument '{}'", other);
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    Ok(parsed)
}

/// Open the configured store and seed it from the bundled taxonomy when empty
fn open_store(
    backend: StoreBackend,
    db_path: PathBuf,
) -> Result<(Arc<dyn CategoryStore>, Arc<dyn RecommendationLog>), String> {
    match backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            taxonomy::seed_if_empty(store.as_ref()).map_err(|e| e.to_string())?;
            log::info!("[Server] Using in-memory store (history is not persisted)");
            let history: Arc<dyn RecommendationLog> = store.clone();
            let categories: Arc<dyn CategoryStore> = store;
            Ok((categories, history))
        }
        StoreBackend::Sqlite => {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
            }
            let db = Arc::new(Database::new(&db_path).map_err(|e| format!("Failed to open database: {}", e))?);
            taxonomy::seed_if_empty(db.as_ref()).map_err(|e| e.to_string())?;
            log::info!("[Server] Database: {}", db_path.display());
            let history: Arc<dyn RecommendationLog> = db.clone();
            let categories: Arc<dyn CategoryStore> = db;
            Ok((categories, history))
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::info!("[Server] Shutting down");
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            log::error!("[Server] {}", e);
            std::process::exit(2);
        }
    };

    let config_dir = args.config_dir.clone().unwrap_or_else(settings::default_config_dir);
    let settings_store = Arc::new(SettingsStore::load(&config_dir));
    let config = settings_store.snapshot();

    let backend = args.store.unwrap_or(config.store_backend);
    let bind_addr = args.bind.clone().unwrap_or_else(|| config.bind.clone());
    let db_path = settings::find_database(args.db.as_deref(), &config);

    let (store, history) = match open_store(backend, db_path) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("[Server] {}", e);
            std::process::exit(1);
        }
    };

    let timeout = Duration::from_secs(config.request_timeout_secs);
    let llm = GeminiClient::new(config.gemini_api_key.clone(), &config.gemini_model, timeout);
    if !config.has_gemini_key() {
        log::warn!("[Server] GEMINI_API_KEY not set, recommendation endpoints will fail");
    }

    let credentials = match (&config.meta_access_token, &config.meta_ad_account_id) {
        (Some(token), Some(account)) => Some(MetaCredentials {
            access_token: token.clone(),
            ad_account_id: account.clone(),
        }),
        _ => None,
    };
    let meta = MetaApiClient::new(credentials, &config.meta_api_version, timeout);
    if !config.has_meta_credentials() {
        log::info!("[Server] Meta credentials not set, search falls back to the local taxonomy");
    }

    let state = AppState {
        store,
        history,
        llm: Arc::new(llm),
        meta: Arc::new(meta),
        settings: settings_store,
        start_time: Instant::now(),
    };
    let app = http_server::router(state);

    // Bind and serve
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("[Server] Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    log::info!("[Server] Listening on {}", bind_addr);
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        log::error!("[Server] Server error: {}", e);
        std::process::exit(1);
    }
}
