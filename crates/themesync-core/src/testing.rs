//! In-memory stand-ins for the remote store and storefront.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::{AssetOutcome, AssetUpload, ThemeApi};
use crate::checksum::checksum_content;
use crate::error::{Result, SyncError};
use crate::storefront::{PassthroughRequest, RenderRequest, RenderedResponse, Storefront};
use crate::types::{AssetContent, ChecksumManifest, Theme, ThemeRole};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    FetchTheme(u64),
    CreateTheme(String),
    FetchChecksums(u64),
    BulkUpload(Vec<String>),
    Delete(String),
    Publish(u64),
}

#[derive(Default)]
pub struct FakeThemeApi {
    themes: Mutex<HashMap<u64, Theme>>,
    assets: Mutex<BTreeMap<String, AssetContent>>,
    rejected: Mutex<HashMap<String, String>>,
    failing_batches: Mutex<HashSet<String>>,
    unreachable_from: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    calls: Mutex<Vec<ApiCall>>,
    polls_until_ready: Mutex<Option<usize>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeThemeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_theme(self, theme: Theme) -> Self {
        self.themes.lock().insert(theme.id, theme);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Report `processing = true` for the next `polls` status requests.
    pub fn finish_processing_after(&self, polls: usize) {
        *self.polls_until_ready.lock() = Some(polls);
    }

    pub fn put(&self, key: &str, content: &str) {
        self.assets
            .lock()
            .insert(key.to_string(), AssetContent::Text(content.to_string()));
    }

    pub fn reject(&self, key: &str, message: &str) {
        self.rejected
            .lock()
            .insert(key.to_string(), message.to_string());
    }

    pub fn fail_batch_containing(&self, key: &str) {
        self.failing_batches.lock().insert(key.to_string());
    }

    /// In a batch containing `key`, everything before it lands and `key` and
    /// everything after it fail as if the store went away mid-batch.
    pub fn fail_from(&self, key: &str) {
        self.unreachable_from.lock().insert(key.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.lock().insert(key.to_string());
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    pub fn stored_keys(&self) -> Vec<String> {
        self.assets.lock().keys().cloned().collect()
    }

    pub fn stored(&self, key: &str) -> Option<AssetContent> {
        self.assets.lock().get(key).cloned()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ThemeApi for FakeThemeApi {
    async fn fetch_theme(&self, theme_id: u64) -> Result<Option<Theme>> {
        self.calls.lock().push(ApiCall::FetchTheme(theme_id));
        let mut theme = self.themes.lock().get(&theme_id).cloned();
        let mut remaining = self.polls_until_ready.lock();
        if let (Some(theme), Some(polls)) = (theme.as_mut(), remaining.as_mut()) {
            if *polls == 0 {
                theme.processing = false;
            } else {
                *polls -= 1;
            }
        }
        Ok(theme)
    }

    async fn create_theme(&self, name: &str, role: ThemeRole) -> Result<Theme> {
        self.calls.lock().push(ApiCall::CreateTheme(name.to_string()));
        let mut themes = self.themes.lock();
        let id = themes.keys().max().copied().unwrap_or(100) + 1;
        let theme = Theme {
            id,
            name: name.to_string(),
            role,
            processing: false,
        };
        themes.insert(id, theme.clone());
        Ok(theme)
    }

    async fn fetch_checksums(&self, theme_id: u64) -> Result<ChecksumManifest> {
        self.calls.lock().push(ApiCall::FetchChecksums(theme_id));
        Ok(self
            .assets
            .lock()
            .iter()
            .map(|(key, content)| (key.clone(), checksum_content(key, content.as_bytes())))
            .collect())
    }

    async fn bulk_upload(
        &self,
        _theme_id: u64,
        assets: Vec<AssetUpload>,
    ) -> Result<Vec<AssetOutcome>> {
        let keys: Vec<String> = assets.iter().map(|a| a.key.clone()).collect();
        self.calls.lock().push(ApiCall::BulkUpload(keys.clone()));
        self.enter().await;

        let failing = self.failing_batches.lock();
        if keys.iter().any(|k| failing.contains(k)) {
            drop(failing);
            self.leave();
            return Err(SyncError::remote("upload", 503, "service unavailable"));
        }
        drop(failing);

        let rejected = self.rejected.lock().clone();
        let unreachable_from = self.unreachable_from.lock().clone();
        let mut unreachable = false;
        let mut outcomes = Vec::with_capacity(assets.len());
        for asset in assets {
            unreachable |= unreachable_from.contains(&asset.key);
            if unreachable {
                let err = SyncError::remote("upload", 503, "service unavailable");
                outcomes.push(AssetOutcome::rejected(asset.key, err.to_string()));
                continue;
            }
            match rejected.get(&asset.key) {
                Some(message) => outcomes.push(AssetOutcome::rejected(asset.key, message.clone())),
                None => {
                    self.assets.lock().insert(asset.key.clone(), asset.content);
                    outcomes.push(AssetOutcome::ok(asset.key));
                }
            }
        }
        self.leave();
        Ok(outcomes)
    }

    async fn delete_asset(&self, _theme_id: u64, key: &str) -> Result<()> {
        self.calls.lock().push(ApiCall::Delete(key.to_string()));
        self.enter().await;
        let result = if self.failing_deletes.lock().contains(key) {
            Err(SyncError::remote("delete asset", 422, "asset is required"))
        } else {
            self.assets.lock().remove(key);
            Ok(())
        };
        self.leave();
        result
    }

    async fn publish_theme(&self, theme_id: u64) -> Result<()> {
        self.calls.lock().push(ApiCall::Publish(theme_id));
        if let Some(theme) = self.themes.lock().get_mut(&theme_id) {
            theme.role = ThemeRole::Live;
        }
        Ok(())
    }
}

/// Renders `<section id="...">` markup that echoes the override content, so
/// tests can see what the proxy sent.
#[derive(Default)]
pub struct FakeStorefront {
    renders: Mutex<Vec<RenderRequest>>,
    passthroughs: Mutex<Vec<PassthroughRequest>>,
    fail_renders: Mutex<Option<String>>,
    response_headers: Mutex<Vec<(String, String)>>,
    status: Mutex<Option<u16>>,
}

impl FakeStorefront {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_renders(&self, message: &str) {
        *self.fail_renders.lock() = Some(message.to_string());
    }

    pub fn respond_with_status(&self, status: u16) {
        *self.status.lock() = Some(status);
    }

    pub fn add_response_header(&self, name: &str, value: &str) {
        self.response_headers
            .lock()
            .push((name.to_string(), value.to_string()));
    }

    pub fn renders(&self) -> Vec<RenderRequest> {
        self.renders.lock().clone()
    }

    pub fn passthroughs(&self) -> Vec<PassthroughRequest> {
        self.passthroughs.lock().clone()
    }

    fn headers(&self, content_type: &str) -> Vec<(String, String)> {
        let mut headers = vec![
            ("content-type".to_string(), content_type.to_string()),
            ("content-length".to_string(), "999".to_string()),
            ("connection".to_string(), "keep-alive".to_string()),
        ];
        headers.extend(self.response_headers.lock().iter().cloned());
        headers
    }
}

#[async_trait]
impl Storefront for FakeStorefront {
    async fn render(&self, request: RenderRequest) -> Result<RenderedResponse> {
        self.renders.lock().push(request.clone());
        if let Some(message) = self.fail_renders.lock().clone() {
            return Err(SyncError::RenderForward {
                path: request.path,
                message,
            });
        }

        let overrides: String = request
            .replace_templates
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join("");
        let body = match &request.section_id {
            Some(section) => format!("<div id=\"shopify-section-{section}\">{overrides}</div>"),
            None => format!(
                "<html><head><link href=\"//cdn.shopify.com/s/files/1/theme/assets/base.css\"></head><body>{path}{overrides}</body></html>",
                path = request.path
            ),
        };
        Ok(RenderedResponse {
            status: self.status.lock().unwrap_or(200),
            headers: self.headers("text/html; charset=utf-8"),
            body: body.into_bytes(),
        })
    }

    async fn passthrough(&self, request: PassthroughRequest) -> Result<RenderedResponse> {
        self.passthroughs.lock().push(request.clone());
        Ok(RenderedResponse {
            status: 200,
            headers: self.headers("application/json"),
            body: format!("{{\"passthrough\":\"{}\"}}", request.path_and_query).into_bytes(),
        })
    }
}
