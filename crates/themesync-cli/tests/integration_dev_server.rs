//! Integration tests for the preview server.
//!
//! Requests go through the full router against an in-memory storefront.

use std::fs;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tempfile::TempDir;
use themesync_cli::dev::{build_router, DevConfig, DevServerContext, HotReloader, SharedContext};
use themesync_core::testing::{FakeStorefront, FakeThemeApi};
use themesync_core::{
    FileEvent, FileEventKind, IgnoreMatcher, OverrideScope, Session, Theme, ThemeFileIndex,
    ThemeRole,
};
use tower::ServiceExt;

struct Preview {
    dir: TempDir,
    ctx: SharedContext,
    storefront: Arc<FakeStorefront>,
}

impl Preview {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for (key, content) in [
            ("layout/theme.liquid", "<html>{{ content_for_layout }}</html>"),
            ("sections/header.liquid", "<header>old</header>"),
            ("assets/base.css", "body { color: red }"),
            ("assets/theme.js.liquid", "console.log('{{ shop.name }}')"),
        ] {
            let path = dir.path().join(key);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        let index = ThemeFileIndex::mount(dir.path(), IgnoreMatcher::default()).unwrap();
        let storefront = Arc::new(FakeStorefront::new());
        let ctx = Arc::new(DevServerContext::new(
            DevConfig::new(dir.path(), "127.0.0.1:9292".parse().unwrap()),
            Session::new("my-shop", "token"),
            Theme {
                id: 11,
                name: "themesync-development".into(),
                role: ThemeRole::Development,
                processing: false,
            },
            Arc::new(index),
            storefront.clone(),
            Arc::new(FakeThemeApi::new()),
        ));

        Self {
            dir,
            ctx,
            storefront,
        }
    }

    fn router(&self) -> Router {
        build_router(self.ctx.clone())
    }

    async fn get(&self, uri: &str, accept: &str) -> Response {
        self.router()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(header::ACCEPT, accept)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_ignored_endpoint_is_answered_locally() {
    let preview = Preview::new();
    let response = preview.get("/.well-known/shopify/monorail/v1", "*/*").await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(preview.storefront.renders().is_empty());
    assert!(preview.storefront.passthroughs().is_empty());
}

#[tokio::test]
async fn test_page_render_is_patched_for_local_browsing() {
    let preview = Preview::new();
    let response = preview.get("/products/hat?variant=3", "text/html").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
    assert!(response.headers().get(header::CONNECTION).is_none());
    let html = body_text(response).await;

    assert!(html.contains(r#"href="/cdn/s/files/1/theme/assets/base.css""#));
    assert!(html.contains(r#"<script src="/__hot-reload/client.js"></script>"#));
    assert_eq!(preview.ctx.last_path(), "/products/hat");

    let renders = preview.storefront.renders();
    assert_eq!(renders.len(), 1);
    assert_eq!(renders[0].path, "/products/hat");
    assert_eq!(renders[0].query, vec![("variant".to_string(), "3".to_string())]);
}

#[tokio::test]
async fn test_section_render_has_no_client_script() {
    let preview = Preview::new();
    let response = preview
        .get("/collections/all?section_id=header", "text/html")
        .await;
    let html = body_text(response).await;

    assert_eq!(html, r#"<div id="shopify-section-header"></div>"#);
    assert_eq!(
        preview.storefront.renders()[0].section_id.as_deref(),
        Some("header")
    );
    // Section renders do not move the page the browser is on.
    assert_eq!(preview.ctx.last_path(), "/");
}

#[tokio::test]
async fn test_render_failure_shows_error_page() {
    let preview = Preview::new();
    preview.storefront.fail_renders("Liquid syntax error");
    let response = preview.get("/", "text/html").await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let html = body_text(response).await;
    assert!(html.contains("Liquid syntax error"));
    assert!(html.contains("/__hot-reload/client.js"));
}

#[tokio::test]
async fn test_session_cookie_is_captured_and_domain_stripped() {
    let preview = Preview::new();
    preview.storefront.add_response_header(
        "set-cookie",
        "_shopify_essential=abc123; Domain=my-shop.myshopify.com; path=/",
    );
    let response = preview.get("/", "text/html").await;

    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert_eq!(cookie, "_shopify_essential=abc123; path=/");
    assert_eq!(
        preview.ctx.session_cookies().get("_shopify_essential").map(String::as_str),
        Some("abc123")
    );

    preview.get("/pages/about", "text/html").await;
    let renders = preview.storefront.renders();
    assert!(renders[1].cookies.contains("_shopify_essential=abc123"));
}

#[tokio::test]
async fn test_cart_requests_pass_through() {
    let preview = Preview::new();
    let response = preview
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cart/add.js?_fd=1")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::REFERER, "http://127.0.0.1:9292/products/hat")
                .body(Body::from(r#"{"id":1}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        r#"{"passthrough":"/cart/add.js?_fd=0&pb=0"}"#
    );

    let passthroughs = preview.storefront.passthroughs();
    assert_eq!(passthroughs[0].method, "POST");
    assert_eq!(passthroughs[0].body, br#"{"id":1}"#.to_vec());
    assert!(passthroughs[0]
        .headers
        .contains(&("referer".into(), "https://my-shop.myshopify.com".into())));
    assert!(preview.storefront.renders().is_empty());
}

#[tokio::test]
async fn test_local_asset_is_served_from_disk() {
    let preview = Preview::new();
    let response = preview
        .get("/cdn/shop/t/11/assets/base.css?v=123", "text/css")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(body_text(response).await, "body { color: red }");
    assert!(preview.storefront.passthroughs().is_empty());
}

#[tokio::test]
async fn test_rendered_liquid_asset_is_fetched_remotely() {
    let preview = Preview::new();
    let response = preview.get("/cdn/shop/t/11/assets/theme.js", "*/*").await;

    assert_eq!(response.status(), StatusCode::OK);
    let passthroughs = preview.storefront.passthroughs();
    assert_eq!(passthroughs.len(), 1);
    assert!(passthroughs[0]
        .path_and_query
        .starts_with("/cdn/shop/t/11/assets/theme.js?"));
}

#[tokio::test]
async fn test_client_script_is_served() {
    let preview = Preview::new();
    let response = preview.get("/__hot-reload/client.js", "*/*").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/javascript"
    );
    assert!(body_text(response).await.contains("EventSource"));
}

#[tokio::test]
async fn test_section_edit_reaches_clients_and_later_renders() {
    let preview = Preview::new();
    preview.get("/products/hat", "text/html").await;
    let (_id, mut client) = preview.ctx.register_client();

    fs::write(
        preview.dir.path().join("sections/header.liquid"),
        "<header>new</header>",
    )
    .unwrap();
    let event = preview
        .ctx
        .index
        .refresh("sections/header.liquid")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        FileEvent::new(FileEventKind::Modified, "sections/header.liquid")
    );

    HotReloader::new(preview.ctx.clone())
        .handle(&event, OverrideScope::Theme)
        .await
        .unwrap();

    let message: serde_json::Value = serde_json::from_str(&client.recv().await.unwrap()).unwrap();
    assert_eq!(message["type"], "section");
    assert_eq!(message["sectionId"], "header");
    assert_eq!(
        message["content"],
        r#"<div id="shopify-section-header"><header>new</header></div>"#
    );

    // The section was rendered in the context of the page being viewed.
    let renders = preview.storefront.renders();
    assert_eq!(renders[1].path, "/products/hat");

    // Full page renders now carry the unsynced edit too.
    let html = body_text(preview.get("/products/hat", "text/html").await).await;
    assert!(html.contains("<header>new</header>"));
}
