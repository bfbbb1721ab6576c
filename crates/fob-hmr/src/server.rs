//! Dev server transport.
//!
//! Pushes [`HmrMessage`](fob_protocol::HmrMessage)s to clients over
//! Server-Sent Events, answers lazy compile requests and serves built
//! resources straight from the compiler.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::{StatusCode, Uri, header},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
    routing::get,
};
use fob_config::DevConfig;
use fob_protocol::LazyCompileRequest;
use tokio::net::TcpListener;
use tokio_stream::{Stream, StreamExt, wrappers::UnboundedReceiverStream};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::clients::ClientRegistry;
use crate::coordinator::HmrCoordinator;
use crate::error::{HmrError, Result};

#[derive(Clone)]
struct AppState {
    coordinator: HmrCoordinator,
    /// Every lazy compile targets Node regardless of the request flag
    node: bool,
}

pub struct HmrServer {
    config: DevConfig,
    coordinator: HmrCoordinator,
}

impl HmrServer {
    pub fn new(config: DevConfig, coordinator: HmrCoordinator) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &HmrCoordinator {
        &self.coordinator
    }

    /// Build the axum router.
    ///
    /// - `GET {hmr.path}` event stream of update and error messages
    /// - `GET {lazy_compilation.path}` lazy compile endpoint, when enabled
    /// - everything else is looked up in the compiler's resources
    pub fn router(&self) -> Router {
        let state = AppState {
            coordinator: self.coordinator.clone(),
            node: self.config.lazy_compilation.node,
        };

        let mut router = Router::new().route(&self.config.hmr.path, get(handle_events));
        if self.config.lazy_compilation.enabled {
            router = router.route(&self.config.lazy_compilation.path, get(handle_lazy_compile));
        }

        router
            .fallback(handle_resource)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(state)
    }

    /// Bind the configured address and serve until the server fails.
    pub async fn serve(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| HmrError::Server(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve_on(listener).await
    }

    pub async fn serve_on(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!(
            addr = %local,
            hmr = %self.config.hmr.path,
            lazy = self.config.lazy_compilation.enabled,
            "dev server listening"
        );

        axum::serve(listener, self.router())
            .await
            .map_err(|e| HmrError::Server(format!("Server error: {}", e)))
    }
}

/// Removes the client from the registry when its stream is dropped.
struct Disconnect {
    clients: Arc<ClientRegistry>,
    id: usize,
}

impl Drop for Disconnect {
    fn drop(&mut self) {
        self.clients.unregister(self.id);
    }
}

async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let clients = Arc::clone(state.coordinator.clients());
    let (id, rx) = clients.register();
    let guard = Disconnect { clients, id };

    let stream = UnboundedReceiverStream::new(rx).map(move |data| {
        let _guard = &guard;
        Ok(Event::default().data(data))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

async fn handle_lazy_compile(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Response {
    let request = match LazyCompileRequest::from_query(query.as_deref().unwrap_or("")) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejected lazy compile request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let node = request.node || state.node;
    match state.coordinator.lazy_compile(request.paths, node).await {
        Ok(response) => (
            [(header::CACHE_CONTROL, "no-cache")],
            Json(response),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn handle_resource(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();
    let name = match path.trim_start_matches('/') {
        "" => "index.html",
        name => name,
    };

    match state.coordinator.compiler().resource(name) {
        Some(content) => (
            [
                (header::CONTENT_TYPE, determine_content_type(name)),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            content,
        )
            .into_response(),
        None => {
            warn!(path, "resource not found");
            (StatusCode::NOT_FOUND, format!("File not found: {}", path)).into_response()
        }
    }
}

/// Determine content type from file extension.
fn determine_content_type(path: &str) -> &'static str {
    let extension = std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");

    match extension {
        "wasm" => "application/wasm",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}
