mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::download::DownloadCache;
use crate::queue::QueueDriver;
use crate::rate_limiter::RateLimiter;
use crate::upstream::{build_http_client, UpstreamClient};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: UpstreamClient,
    pub cache: DownloadCache,
    pub queue: QueueDriver<DownloadCache>,
}

impl AppState {
    /// Wire the upstream client, the download cache and the queue together.
    ///
    /// Metadata calls and downloads each get their own limiter; both share
    /// one pooled HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let http = build_http_client(&config).context("Failed to build HTTP client")?;

        let metadata_limiter = Arc::new(RateLimiter::new(
            "metadata",
            config.limiter_concurrency,
            config.metadata_min_interval,
        ));
        let download_limiter = Arc::new(RateLimiter::new(
            "download",
            config.limiter_concurrency,
            config.download_min_interval,
        ));

        let upstream = UpstreamClient::new(http.clone(), Arc::clone(&config), metadata_limiter);
        let cache = DownloadCache::new(config.download_dir.clone(), http, download_limiter);
        let queue = QueueDriver::new(Arc::new(cache.clone()), config.queue_item_delay);

        Ok(Self {
            config,
            upstream,
            cache,
            queue,
        })
    }
}

/// Start the web server and run it until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn serve<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.web_host, config.web_port)
        .parse()
        .context("Invalid web server address")?;

    let state = AppState::new(config)?;
    let app = create_app(state);

    info!(addr = %addr, "Starting HTTP web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Web server error")?;

    Ok(())
}

/// Create the main application router.
///
/// API routes take precedence; any other path is looked up in the static
/// directory.
pub fn create_app(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    info!(static_dir = %static_dir.display(), "Serving static files");

    Router::new()
        .merge(routes::router())
        .fallback_service(ServeDir::new(static_dir))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
