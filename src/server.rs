//! HTTP surface.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /healthz` | `200 ok` |
//! | `GET /_stats` | cache counters as JSON |
//! | `GET /{height}x{width}/{source}` | the center-cropped JPEG, or a `301` |
//!
//! Parse errors are `400`, a short-circuited source is `404`, and other
//! failures are `500`, or a `302` to the source with `redirect_to_source`.
//!
//! Image requests are parsed on the async side so malformed paths are
//! answered without touching the blocking pool. Resolution itself (fetch,
//! decode, resize, encode, disk I/O) is blocking and runs under
//! `spawn_blocking`.

use crate::config::ProxyConfig;
use crate::coordinator::{Coordinator, ResolveError, Servable};
use crate::imaging::{Quality, RustBackend};
use crate::origin::{FetchOptions, HttpFetcher};
use crate::request::ImageRequest;
use crate::store::{self, StoreError};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub max_dimension: u32,
    /// Pre-rendered `Cache-Control` value for image responses.
    pub cache_control: String,
}

impl AppState {
    pub fn new(coordinator: Coordinator, max_dimension: u32, cache_max_age: u64) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            max_dimension,
            cache_control: format!("public, max-age={cache_max_age}"),
        }
    }

    /// Wire up the production coordinator described by `config`.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, StoreError> {
        let coordinator = Coordinator::new(
            store::open(&config.store)?,
            Box::new(HttpFetcher::new(FetchOptions::from(&config.origin))),
            Box::new(RustBackend::new()),
        )
        .with_quality(Quality::new(config.images.quality))
        .with_failure_policy((&config.failures).into());

        Ok(Self::new(
            coordinator,
            config.images.max_dimension,
            config.server.cache_max_age,
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/_stats", get(stats))
        .route("/*path", get(image))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until ctrl-c.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn healthz() -> &'static str {
    "ok"
}

async fn stats(State(state): State<AppState>) -> Json<crate::coordinator::CacheStats> {
    Json(state.coordinator.stats())
}

async fn image(State(state): State<AppState>, uri: Uri) -> Response {
    let request = match ImageRequest::from_path(uri.path(), uri.query(), state.max_dimension) {
        Ok(request) => request,
        Err(e) => {
            warn!(path = uri.path(), error = %e, "bad request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let coordinator = Arc::clone(&state.coordinator);
    let result = tokio::task::spawn_blocking(move || coordinator.serve(&request)).await;

    match result {
        Ok(Ok(Servable::Jpeg(bytes))) => (
            [
                (header::CONTENT_TYPE, "image/jpeg".to_string()),
                (header::CACHE_CONTROL, state.cache_control.clone()),
            ],
            bytes,
        )
            .into_response(),
        Ok(Ok(Servable::Redirect(url))) => (
            StatusCode::MOVED_PERMANENTLY,
            [(header::LOCATION, url.to_string())],
        )
            .into_response(),
        Ok(Ok(Servable::Source(url))) => {
            (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
        }
        Ok(Err(e @ ResolveError::Unavailable { .. })) => {
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Ok(Err(e)) => {
            error!(path = uri.path(), error = %e, "failed to serve image");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render image").into_response()
        }
        Err(e) => {
            error!(path = uri.path(), error = %e, "render task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render image").into_response()
        }
    }
}
