use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Request},
    routing::{get, post},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};

use crate::{
    handlers::{create_secret, health, reveal_secret},
    store::{spawn_sweep, MemoryStore, RedbStore, SecretStore},
    vault::Vault,
    AppState,
};

/// Request bodies above this size are rejected before JSON parsing.
/// 20 000 characters of 4-byte UTF-8 plus JSON framing fits comfortably.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Which [`SecretStore`] implementation backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redb,
    Memory,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "redb" => Some(Self::Redb),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub backend: StoreBackend,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
    /// Base used to build absolute share URLs ($LASTSECRET_PUBLIC_URL).
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("LASTSECRET_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("LASTSECRET_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("LASTSECRET_DATA_DIR").ok().map(PathBuf::from),
            backend: std::env::var("LASTSECRET_STORE")
                .ok()
                .map(|v| {
                    StoreBackend::parse(&v).unwrap_or_else(|| {
                        warn!(value = %v, "unknown LASTSECRET_STORE; using redb");
                        StoreBackend::Redb
                    })
                })
                .unwrap_or(StoreBackend::Redb),
            sweep_interval: Duration::from_secs(
                std::env::var("LASTSECRET_SWEEP_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(60),
            ),
            cors_origins: std::env::var("LASTSECRET_CORS_ORIGINS").ok(),
            public_url: std::env::var("LASTSECRET_PUBLIC_URL").ok(),
        }
    }
}

/// Resolve the data directory, creating it if needed. Without an explicit
/// directory the platform app-data dir is used (`~/.local/share/lastsecret/`, etc.).
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "lastsecret")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir: {}", dir.display()))?;
    Ok(dir)
}

/// Open the configured store backend.
pub fn open_store(cfg: &ServerConfig) -> Result<Arc<dyn SecretStore>> {
    match cfg.backend {
        StoreBackend::Memory => {
            info!("using in-memory store; secrets will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redb => {
            let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
            info!(data_dir = %data_dir.display(), "using data directory");
            let db_path = data_dir.join("lastsecret.db");
            let store = RedbStore::open(&db_path).context("open store")?;
            Ok(Arc::new(store))
        }
    }
}

/// All routes with request tracing, without CORS.
///
/// Request spans carry the matched route template, never the raw URI, since
/// a reveal URI contains the id.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/secrets", post(create_secret))
        .route("/api/secrets/{id}/reveal", post(reveal_secret))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            let route = req
                .extensions()
                .get::<MatchedPath>()
                .map(MatchedPath::as_str)
                .unwrap_or("unmatched");
            info_span!("http", method = %req.method(), route)
        }))
        .with_state(state)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store = open_store(&cfg)?;

    let sweep = spawn_sweep(store.clone(), cfg.sweep_interval);

    let state = AppState {
        vault: Vault::new(store),
        public_url: cfg.public_url.clone(),
    };

    let app = router(state).layer(build_cors(cfg.cors_origins.as_deref()));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "lastsecret server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // The router (and its store handle) is gone; stop the last holder.
    sweep.abort();
    info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix. Signal handlers are installed
/// before this returns, so a signal raised afterwards is never lost.
fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());

    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            match terminate {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        info!("shutdown requested");
    }
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
