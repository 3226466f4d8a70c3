//! Preview server with hot reload via Server-Sent Events.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{any, get},
    Router,
};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::dev::asset;
use crate::dev::proxy::{self, HOT_RELOAD_SCRIPT_PATH};
use crate::dev::SharedContext;
use crate::error::{CliError, Result};

pub const HOT_RELOAD_SUBSCRIBE_PATH: &str = "/__hot-reload/subscribe";

/// HTTP front of the preview, serving until the cancellation token fires.
pub struct DevServer {
    ctx: SharedContext,
    cancel: CancellationToken,
}

impl DevServer {
    pub fn new(ctx: SharedContext, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    /// Serve until the cancellation token fires, then let open requests finish.
    pub async fn start(self) -> Result<()> {
        let addr = self.ctx.config.addr;
        let server_url = self.ctx.config.server_url();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| CliError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

        crate::ui::success(&format!("Preview server running at {}", server_url));

        axum::serve(listener, build_router(self.ctx))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| CliError::Server(e.to_string()))?;

        Ok(())
    }
}

/// All preview routes: hot reload channel, local assets, then the storefront
/// proxy as fallback.
pub fn build_router(ctx: SharedContext) -> Router {
    Router::new()
        .route(HOT_RELOAD_SUBSCRIBE_PATH, get(handle_subscribe))
        .route(HOT_RELOAD_SCRIPT_PATH, get(handle_client_script))
        .route("/cdn/{*path}", any(asset::handle_theme_asset))
        .route("/ext/cdn/{*path}", any(asset::handle_extension_asset))
        .fallback(handle_request)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(ctx)
}

/// SSE stream of hot-reload events. The first message is always `open`.
async fn handle_subscribe(
    State(ctx): State<SharedContext>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (id, rx) = ctx.register_client();
    tracing::debug!(client = id, "hot reload client connected");

    let open = serde_json::to_string(&ctx.open_event()).unwrap_or_default();
    let stream = tokio_stream::once(open)
        .chain(ReceiverStream::new(rx))
        .map(|data| Ok(Event::default().data(data)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

async fn handle_client_script() -> Response {
    const CLIENT_SCRIPT: &str = include_str!("../../assets/hot-reload.js");

    let mut response = Response::new(Body::from(CLIENT_SCRIPT));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/javascript"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Everything that is not a local asset or the hot-reload channel.
async fn handle_request(
    State(ctx): State<SharedContext>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path();

    if proxy::is_ignored_endpoint(path) {
        return StatusCode::NO_CONTENT.into_response();
    }

    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    if proxy::should_passthrough(&method, path, accept) {
        tracing::debug!(%method, path, "passthrough");
        return proxy::passthrough(&ctx, &method, &uri, &headers, body).await;
    }

    proxy::render(&ctx, &method, &uri, &headers).await
}
