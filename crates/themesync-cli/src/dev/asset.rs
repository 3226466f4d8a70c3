//! Local asset serving for CDN paths.
//!
//! URL format: `/cdn/{path}` for theme assets and `/ext/cdn/{path}` for
//! theme extension assets. Only the file name matters; it is looked up as
//! `assets/{name}` in the matching index. Files that are not local go to the
//! storefront.

use std::time::SystemTime;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::Response,
};
use chrono::{DateTime, Utc};
use themesync_core::{Asset, OverrideScope, ThemeFileIndex};

use crate::dev::proxy::{inject_cdn_proxy, passthrough};
use crate::dev::state::{DevServerContext, SharedContext};

pub async fn handle_theme_asset(
    State(ctx): State<SharedContext>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_or_forward(&ctx, OverrideScope::Theme, method, uri, headers, body).await
}

pub async fn handle_extension_asset(
    State(ctx): State<SharedContext>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_or_forward(&ctx, OverrideScope::Extension, method, uri, headers, body).await
}

async fn serve_or_forward(
    ctx: &DevServerContext,
    scope: OverrideScope,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::GET {
        if let Some(index) = ctx.index_for(scope) {
            let key = asset_key(uri.path());
            if let Some(response) = serve_local(ctx, index, &key).await {
                return response;
            }
        }
    }
    passthrough(ctx, &method, &uri, &headers, body).await
}

/// `assets/{last path segment}`.
pub fn asset_key(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or_default();
    format!("assets/{name}")
}

async fn serve_local(
    ctx: &DevServerContext,
    index: &ThemeFileIndex,
    key: &str,
) -> Option<Response> {
    let mut asset = index.read(key)?;
    let stat = match index.stat(key).await {
        Ok(Some(stat)) => stat,
        Ok(None) => return None,
        Err(err) => {
            tracing::warn!(key, error = %err, "cannot stat local asset");
            return None;
        }
    };

    // The watcher may not have caught up with the latest write yet.
    if stat.size != asset.size {
        if let Err(err) = index.refresh(key).await {
            tracing::warn!(key, error = %err, "cannot reload local asset");
        }
        asset = index.read(key)?;
    }

    tracing::debug!(key, size = asset.size, "serving local asset");
    Some(asset_response(ctx, &asset, stat.modified))
}

fn asset_response(ctx: &DevServerContext, asset: &Asset, modified: Option<SystemTime>) -> Response {
    let mime = mime_guess::from_path(&asset.key).first_or_octet_stream();
    let rewrite = matches!(mime.subtype().as_str(), "css" | "javascript");

    let body = match asset.content.as_text() {
        Some(text) if rewrite => Body::from(inject_cdn_proxy(text, ctx)),
        _ => Body::from(asset.content.as_bytes().to_vec()),
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.essence_str()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Some(value) = modified
        .map(http_date)
        .and_then(|date| HeaderValue::from_str(&date).ok())
    {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}

/// RFC 7231 IMF-fixdate.
fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
