//! Forwarding browser requests to the remote storefront.
//!
//! Page requests are rendered remotely with local overrides attached and the
//! returned HTML is rewritten so that CDN links for local assets, redirects and
//! cookies point back at the dev server. Everything else is passed through.

use std::path::Path;
use std::sync::LazyLock;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use regex::{Captures, Regex};
use themesync_core::storefront::{merge_cookies, sanitize_request_headers, HOP_BY_HOP_HEADERS};
use themesync_core::{PassthroughRequest, RenderRequest, RenderedResponse, ThemeFileIndex};
use url::{form_urlencoded, Url};

use crate::dev::error_page::render_error_page;
use crate::dev::state::{DevServerContext, SESSION_COOKIE};

/// Local prefix for files served from the store's own CDN path.
pub const VANITY_CDN_PREFIX: &str = "/cdn/";
/// Local prefix for theme extension files served from the main CDN.
pub const EXTENSION_CDN_PREFIX: &str = "/ext/cdn/";
pub const MAIN_CDN_HOST: &str = "cdn.shopify.com";
pub const HOT_RELOAD_SCRIPT_PATH: &str = "/__hot-reload/client.js";

/// Storefront endpoints answered locally with an empty 204.
pub const IGNORED_ENDPOINTS: &[&str] = &[
    "/.well-known",
    "/shopify/monorail",
    "/mini-profiler-resources",
    "/web-pixels-manager",
    "/web-pixels@",
    "/wpm",
    "/services/",
    "/api/collect",
    "/cdn-cgi/challenge-platform",
];

static CART_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/cart/").unwrap());
static ACCOUNT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/account(/login/multipass(/[^/]+)?|/logout)?/?$").unwrap()
});
static MAIN_CDN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r##"(?:https?:)?//cdn\.shopify\.com/(.*?/(assets/[^?#"'`>\s]+))"##).unwrap()
});
static SESSION_COOKIE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_shopify_essential=([^;]*)(;|$)").unwrap());
static RENDERED_ASSET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/assets/[^/]+\.(css|js)$").unwrap());

/// Analytics and browser probes answered locally with 204.
pub fn is_ignored_endpoint(path: &str) -> bool {
    IGNORED_ENDPOINTS
        .iter()
        .any(|endpoint| path.starts_with(endpoint))
}

/// Checkout pages stay on the remote domain, except the internal API.
pub fn is_checkout(path: &str) -> bool {
    path.starts_with("/checkouts/") && !path.starts_with("/checkouts/internal/")
}

/// Whether a request goes straight to the storefront instead of being
/// rendered with local overrides.
///
/// | Path            | Accept           | Result      |
/// |-----------------|------------------|-------------|
/// | `/cdn/...`      |                  | passthrough |
/// | `/cart/...`     |                  | passthrough |
/// | `/app.js`       |                  | passthrough |
/// | `/payments`     | application/json | passthrough |
/// | `/search`       | `*/*`            | render      |
/// | `/page.html`    |                  | render      |
pub fn should_passthrough(method: &Method, path: &str, accept: Option<&str>) -> bool {
    if method != Method::GET
        || CART_PATTERN.is_match(path)
        || is_checkout(path)
        || ACCOUNT_PATTERN.is_match(path)
        || path.starts_with(VANITY_CDN_PREFIX)
        || path.starts_with(EXTENSION_CDN_PREFIX)
    {
        return true;
    }

    let extension = Path::new(path).extension().and_then(|ext| ext.to_str());
    let accept = accept.unwrap_or("*/*");

    if extension == Some("html") || accept.contains("text/html") {
        return false;
    }

    extension.is_some() || accept != "*/*"
}

/// Point CDN URLs for local files at the dev server.
///
/// Every vanity CDN URL (`//{store}/cdn/...`) becomes relative. Main CDN URLs
/// are rewritten only when the asset exists locally; images are left alone
/// since they may depend on CDN transforms.
pub fn rewrite_cdn_urls(
    content: &str,
    store_fqdn: &str,
    theme: &ThemeFileIndex,
    extension: Option<&ThemeFileIndex>,
) -> String {
    let vanity = format!(
        "(https?:)?//{}{}",
        regex::escape(store_fqdn),
        regex::escape(VANITY_CDN_PREFIX)
    );
    let content = match Regex::new(&vanity) {
        Ok(re) => re.replace_all(content, VANITY_CDN_PREFIX).into_owned(),
        Err(_) => content.to_string(),
    };

    MAIN_CDN_PATTERN
        .replace_all(&content, |caps: &Captures<'_>| {
            let matched = &caps[0];
            let pathname = &caps[1];
            let asset = &caps[2];

            if is_image(asset) {
                return matched.to_string();
            }
            if pathname.starts_with("extensions/") && extension.is_some_and(|ext| ext.has(asset)) {
                return format!("{EXTENSION_CDN_PREFIX}{pathname}");
            }
            if theme.has(asset) {
                return format!("{VANITY_CDN_PREFIX}{pathname}");
            }
            matched.to_string()
        })
        .into_owned()
}

/// Point CDN URLs for local theme assets at the preview server so edits show
/// up without an upload.
pub fn inject_cdn_proxy(content: &str, ctx: &DevServerContext) -> String {
    rewrite_cdn_urls(
        content,
        &ctx.session.store_fqdn,
        &ctx.index,
        ctx.extension_index.as_deref(),
    )
}

fn is_image(asset: &str) -> bool {
    mime_guess::from_path(asset)
        .first()
        .is_some_and(|mime| mime.type_().as_str() == "image")
}

/// Rewrite `data-base-url` attributes that name the store to `base_url`.
pub fn patch_base_url(html: &str, store_fqdn: &str, base_url: &str) -> String {
    let pattern = format!(
        r#"data-base-url=["']((?:https?:)?//{})[^"']*?["']"#,
        regex::escape(store_fqdn)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return html.to_string();
    };
    re.replace_all(html, |caps: &Captures<'_>| {
        caps[0].replacen(&caps[1], base_url, 1)
    })
    .into_owned()
}

/// Add the hot-reload client before `</body>`, or at the end when there is none.
pub fn inject_hot_reload_script(html: &str) -> String {
    let script_tag = format!(r#"<script src="{HOT_RELOAD_SCRIPT_PATH}"></script>"#);

    if let Some(pos) = html.rfind("</body>") {
        let mut result = String::with_capacity(html.len() + script_tag.len() + 4);
        result.push_str(&html[..pos]);
        result.push_str(&script_tag);
        result.push('\n');
        result.push_str(&html[pos..]);
        return result;
    }

    let mut result = html.to_string();
    result.push('\n');
    result.push_str(&script_tag);
    result
}

/// Make a `Location` header relative and drop the cache-busting parameters.
/// Checkout redirects are kept as they are.
pub fn patch_location(location: &str) -> String {
    let Ok(mut url) = Url::parse("https://shopify.dev").and_then(|base| base.join(location)) else {
        return location.to_string();
    };
    if is_checkout(url.path()) {
        return location.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "_fd" && key != "pb")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let mut patched = url.path().to_string();
    if let Some(query) = url.query() {
        patched.push('?');
        patched.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        patched.push('#');
        patched.push_str(fragment);
    }
    patched
}

/// Fix up headers of any storefront response before it reaches the browser.
///
/// Captures the latest session cookie into `ctx`.
pub fn patch_response_headers(ctx: &DevServerContext, response: &mut RenderedResponse) {
    let domain = Regex::new(&format!(
        r"(?i)Domain={};\s*",
        regex::escape(&ctx.session.store_fqdn)
    ))
    .ok();

    let headers = std::mem::take(&mut response.headers);
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str())
            || matches!(lower.as_str(), "content-length" | "content-encoding" | "host")
        {
            continue;
        }

        let value = match lower.as_str() {
            "link" => inject_cdn_proxy(&value, ctx),
            "location" => patch_location(&value),
            "set-cookie" => {
                if let Some(caps) = SESSION_COOKIE_PATTERN.captures(&value) {
                    if !caps[1].is_empty() {
                        ctx.set_session_cookie(SESSION_COOKIE, &caps[1]);
                    }
                }
                match &domain {
                    Some(re) => re.replace_all(&value, "").into_owned(),
                    None => value,
                }
            }
            _ => value,
        };
        response.headers.push((name, value));
    }
}

/// Patch a rendered page for local browsing. Redirects are returned as they
/// came; JSON responses keep their content type.
pub fn patch_rendering_response(
    ctx: &DevServerContext,
    mut response: RenderedResponse,
    inject_script: bool,
) -> Response {
    if response.is_redirect() {
        return into_response(response);
    }

    let is_json = response
        .header("content-type")
        .is_some_and(|ct| ct.contains("application/json"));
    patch_response_headers(ctx, &mut response);

    if !is_json {
        response
            .headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
        response
            .headers
            .push(("content-type".into(), "text/html; charset=utf-8".into()));
    }

    let html = String::from_utf8_lossy(&response.body);
    let html = inject_cdn_proxy(&html, ctx);
    let mut html = patch_base_url(&html, &ctx.session.store_fqdn, &ctx.config.server_url());
    if inject_script && !is_json {
        html = inject_hot_reload_script(&html);
    }
    response.body = html.into_bytes();

    into_response(response)
}

/// Render `uri` remotely with the current overrides.
pub async fn render(
    ctx: &DevServerContext,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Response {
    let mut query: Vec<(String, String)> = uri
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let section_id = query
        .iter()
        .find(|(key, _)| key == "section_id")
        .map(|(_, value)| value.clone());
    query.retain(|(key, _)| key != "section_id");

    let path = uri.path().to_string();
    let mut request = RenderRequest {
        method: method.as_str().to_string(),
        path: path.clone(),
        query,
        section_id: section_id.clone(),
        headers: sanitize_request_headers(header_pairs(headers)),
        cookies: merge_cookies(cookie_header(headers), &ctx.session_cookies()),
        ..RenderRequest::default()
    };
    ctx.overrides.apply_to(&mut request);

    tracing::debug!(
        path = %path,
        section = section_id.as_deref().unwrap_or(""),
        overrides = ctx.overrides.len(),
        "rendering"
    );

    match ctx.storefront.render(request).await {
        Ok(response) => {
            let is_page = section_id.is_none();
            if is_page && (200..300).contains(&response.status) {
                ctx.set_last_path(path);
            }
            patch_rendering_response(ctx, response, is_page)
        }
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "render failed");
            html_response(
                StatusCode::BAD_GATEWAY,
                render_error_page(&path, &err.to_string()),
            )
        }
    }
}

/// Forward a request unchanged apart from cookies, target host and the
/// cache-busting query parameters.
pub async fn passthrough(
    ctx: &DevServerContext,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path();
    let (target_path, host) = match path.strip_prefix(EXTENSION_CDN_PREFIX) {
        Some(rest) => (format!("/{rest}"), Some(MAIN_CDN_HOST.to_string())),
        None => (path.to_string(), None),
    };

    let mut forwarded = sanitize_request_headers(header_pairs(headers));
    forwarded.retain(|(name, _)| !name.eq_ignore_ascii_case("referer"));
    for name in [header::CONTENT_TYPE, header::ACCEPT] {
        if let Some(value) = headers.get(&name).and_then(|v| v.to_str().ok()) {
            forwarded.push((name.as_str().to_string(), value.to_string()));
        }
    }
    let origin = format!(
        "https://{}",
        host.as_deref().unwrap_or(&ctx.session.store_fqdn)
    );
    forwarded.push(("referer".to_string(), origin));

    let request = PassthroughRequest {
        method: method.as_str().to_string(),
        path_and_query: passthrough_target(&target_path, uri.query()),
        headers: forwarded,
        cookies: merge_cookies(cookie_header(headers), &ctx.session_cookies()),
        body: body.to_vec(),
        host,
    };

    match ctx.storefront.passthrough(request).await {
        Ok(mut response) => {
            patch_response_headers(ctx, &mut response);
            if (200..300).contains(&response.status) {
                let file_name = path.rsplit('/').next().unwrap_or_default();
                if ctx.index.has(&format!("assets/{file_name}.liquid")) {
                    let body = String::from_utf8_lossy(&response.body);
                    response.body = inject_cdn_proxy(&body, ctx).into_bytes();
                }
            }
            into_response(response)
        }
        Err(err) => {
            if !path.ends_with(".js.map") {
                tracing::warn!(path = %path, error = %err, "failed to proxy request");
            }
            text_response(
                StatusCode::BAD_GATEWAY,
                format!("Failed to proxy request to {path}: {err}"),
            )
        }
    }
}

/// Target path plus query for a passthrough request. Always disables the
/// storefront's render caches.
fn passthrough_target(path: &str, query: Option<&str>) -> String {
    let mut pairs: Vec<(String, String)> = match query {
        // A stale numeric version on a rendered asset is replaced with a fresh one.
        Some(q)
            if RENDERED_ASSET_PATTERN.is_match(path)
                && !q.is_empty()
                && q.bytes().all(|b| b.is_ascii_digit()) =>
        {
            vec![(
                "v".to_string(),
                chrono::Utc::now().timestamp_millis().to_string(),
            )]
        }
        Some(q) => form_urlencoded::parse(q.as_bytes())
            .into_owned()
            .filter(|(key, _)| key != "_fd" && key != "pb")
            .collect(),
        None => Vec::new(),
    };
    pairs.push(("_fd".to_string(), "0".to_string()));
    pairs.push(("pb".to_string(), "0".to_string()));

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{path}?{query}")
}

fn header_pairs(headers: &HeaderMap) -> Vec<(&str, &str)> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect()
}

fn cookie_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::COOKIE).and_then(|v| v.to_str().ok())
}

/// Convert a storefront response. Framing headers are left to the server.
pub fn into_response(rendered: RenderedResponse) -> Response {
    let mut response = Response::new(Body::from(rendered.body));
    *response.status_mut() =
        StatusCode::from_u16(rendered.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = response.headers_mut();
    for (name, value) in rendered.headers {
        if matches!(
            name.to_ascii_lowercase().as_str(),
            "content-length" | "transfer-encoding" | "connection"
        ) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    response
}

/// HTML response that the browser must not cache.
pub fn html_response(status: StatusCode, html: String) -> Response {
    let mut response = Response::new(Body::from(html));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Plain text response that the browser must not cache.
pub fn text_response(status: StatusCode, text: String) -> Response {
    let mut response = Response::new(Body::from(text));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
