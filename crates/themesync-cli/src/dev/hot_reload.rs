//! Turns local file events into browser updates.
//!
//! Template edits are recorded as overrides so the next render shows them
//! before they reach the remote theme. A changed section is re-rendered
//! alone and pushed to every browser; other files trigger a stylesheet refresh
//! or a full reload. Nothing here talks to the Admin API.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use themesync_core::storefront::merge_cookies;
use themesync_core::{FileEvent, FileEventKind, KeyLocks, OverrideScope, RenderRequest};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dev::proxy::inject_cdn_proxy;
use crate::dev::{HotReloadEvent, SharedContext};

/// Where a key is in its reload cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadState {
    #[default]
    Idle,
    /// Override recorded, nothing sent yet.
    Changed,
    /// Section render in flight.
    Rendering,
    /// Event sent to clients.
    Streamed,
}

type KeyId = (OverrideScope, String);

/// Turns index events into hot reload messages for connected browsers.
pub struct HotReloader {
    ctx: SharedContext,
    states: DashMap<KeyId, ReloadState>,
    theme_locks: KeyLocks,
    extension_locks: KeyLocks,
}

impl HotReloader {
    pub fn new(ctx: SharedContext) -> Self {
        Self {
            ctx,
            states: DashMap::new(),
            theme_locks: KeyLocks::new(),
            extension_locks: KeyLocks::new(),
        }
    }

    pub fn state(&self, scope: OverrideScope, key: &str) -> ReloadState {
        self.states
            .get(&(scope, key.to_string()))
            .map(|state| *state)
            .unwrap_or_default()
    }

    /// Idle keys are not stored.
    fn set_state(&self, id: &KeyId, state: ReloadState) {
        tracing::trace!(key = %id.1, ?state, "reload state");
        if state == ReloadState::Idle {
            self.states.remove(id);
        } else {
            self.states.insert(id.clone(), state);
        }
    }

    fn locks(&self, scope: OverrideScope) -> &KeyLocks {
        match scope {
            OverrideScope::Theme => &self.theme_locks,
            OverrideScope::Extension => &self.extension_locks,
        }
    }

    /// Process one event and broadcast the resulting message.
    ///
    /// Returns the message sent, or `None` when the key is not in the index
    /// anymore (a later event will cover it).
    pub async fn handle(&self, event: &FileEvent, scope: OverrideScope) -> Option<HotReloadEvent> {
        self.locks(scope)
            .serialize(&event.key, self.reload(event, scope))
            .await
    }

    async fn reload(&self, event: &FileEvent, scope: OverrideScope) -> Option<HotReloadEvent> {
        let id: KeyId = (scope, event.key.clone());
        let message = match event.kind {
            FileEventKind::Removed => {
                self.ctx.overrides.remove(scope, &event.key);
                self.set_state(&id, ReloadState::Changed);
                HotReloadEvent::Full {
                    key: event.key.clone(),
                }
            }
            FileEventKind::Added | FileEventKind::Modified => {
                let asset = self.ctx.index_for(scope)?.read(&event.key)?;
                if is_template(&event.key) {
                    if let Some(text) = asset.content.as_text() {
                        self.ctx.overrides.set(scope, event.key.clone(), text);
                    }
                }
                self.set_state(&id, ReloadState::Changed);

                match section_id(&event.key) {
                    Some(section) if scope == OverrideScope::Theme => {
                        self.set_state(&id, ReloadState::Rendering);
                        self.render_section(&event.key, section).await
                    }
                    _ if is_stylesheet(&event.key) => HotReloadEvent::Css {
                        key: event.key.clone(),
                    },
                    _ => HotReloadEvent::Full {
                        key: event.key.clone(),
                    },
                }
            }
        };

        self.ctx.broadcast(&message);
        self.set_state(&id, ReloadState::Streamed);
        tracing::debug!(key = %event.key, clients = self.ctx.client_count(), "hot reload sent");
        self.set_state(&id, ReloadState::Idle);
        Some(message)
    }

    async fn render_section(&self, key: &str, section: &str) -> HotReloadEvent {
        let ctx = &self.ctx;
        let mut request = RenderRequest::page(ctx.last_path());
        request.section_id = Some(section.to_string());
        request.cookies = merge_cookies(None, &ctx.session_cookies());
        ctx.overrides.apply_to(&mut request);

        match ctx.storefront.render(request).await {
            Ok(response) if (200..300).contains(&response.status) => {
                let html = String::from_utf8_lossy(&response.body);
                HotReloadEvent::Section {
                    key: key.to_string(),
                    section_id: section.to_string(),
                    content: inject_cdn_proxy(&html, ctx),
                }
            }
            Ok(response) => {
                tracing::warn!(key, status = response.status, "section render rejected");
                HotReloadEvent::Error {
                    key: key.to_string(),
                    message: format!("Section render returned status {}", response.status),
                }
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "section render failed");
                HotReloadEvent::Error {
                    key: key.to_string(),
                    message: err.to_string(),
                }
            }
        }
    }

    /// Handle index events until `cancel` fires or the index goes away.
    pub fn spawn(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<FileEvent>,
        scope: OverrideScope,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            self.handle(&event, scope).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "hot reload fell behind, reloading clients");
                            self.ctx.broadcast(&HotReloadEvent::Full { key: String::new() });
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

/// Liquid or JSON outside `assets/`.
pub fn is_template(key: &str) -> bool {
    !key.starts_with("assets/") && (key.ends_with(".liquid") || key.ends_with(".json"))
}

/// `sections/hero.liquid` -> `hero`.
pub fn section_id(key: &str) -> Option<&str> {
    let name = key.strip_prefix("sections/")?;
    let id = name.strip_suffix(".liquid")?;
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

fn is_stylesheet(key: &str) -> bool {
    key.ends_with(".css") || key.ends_with(".css.liquid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::{DevConfig, DevServerContext};
    use std::fs;
    use tempfile::TempDir;
    use themesync_core::testing::{FakeStorefront, FakeThemeApi};
    use themesync_core::{IgnoreMatcher, Session, Theme, ThemeFileIndex, ThemeRole};

    struct Fixture {
        dir: TempDir,
        ctx: SharedContext,
        storefront: Arc<FakeStorefront>,
        api: Arc<FakeThemeApi>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sections")).unwrap();
        fs::write(dir.path().join("sections/hero.liquid"), "<h1>old</h1>").unwrap();
        let index = ThemeFileIndex::mount(dir.path(), IgnoreMatcher::default()).unwrap();
        let storefront = Arc::new(FakeStorefront::new());
        let api = Arc::new(FakeThemeApi::new());
        let ctx = Arc::new(DevServerContext::new(
            DevConfig::new(dir.path(), "127.0.0.1:9292".parse().unwrap()),
            Session::new("shop.myshopify.com", "token"),
            Theme {
                id: 1,
                name: "dev".into(),
                role: ThemeRole::Development,
                processing: false,
            },
            Arc::new(index),
            storefront.clone(),
            api.clone(),
        ));
        Fixture {
            dir,
            ctx,
            storefront,
            api,
        }
    }

    async fn edit(fixture: &Fixture, key: &str, content: &str) -> FileEvent {
        let path = fixture.dir.path().join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        fixture.ctx.index.refresh(key).await.unwrap().unwrap()
    }

    #[test]
    fn test_key_classification() {
        assert_eq!(section_id("sections/hero.liquid"), Some("hero"));
        assert_eq!(section_id("sections/hero.json"), None);
        assert_eq!(section_id("snippets/hero.liquid"), None);
        assert!(is_template("templates/index.json"));
        assert!(is_template("layout/theme.liquid"));
        assert!(!is_template("assets/app.js.liquid"));
        assert!(is_stylesheet("assets/base.css"));
        assert!(!is_stylesheet("assets/app.js"));
    }

    #[tokio::test]
    async fn test_section_edit_emits_single_section_event_without_upload() {
        let fixture = fixture();
        let (_, mut client) = fixture.ctx.register_client();
        fixture.ctx.set_last_path("/products/hat");
        let reloader = HotReloader::new(fixture.ctx.clone());

        let event = edit(&fixture, "sections/hero.liquid", "<h1>new</h1>").await;
        let message = reloader.handle(&event, OverrideScope::Theme).await.unwrap();

        assert_eq!(
            message,
            HotReloadEvent::Section {
                key: "sections/hero.liquid".into(),
                section_id: "hero".into(),
                content: "<div id=\"shopify-section-hero\"><h1>new</h1></div>".into(),
            }
        );
        let sent = client.recv().await.unwrap();
        assert!(sent.contains("\"sectionId\":\"hero\""));
        assert!(client.try_recv().is_err());

        let renders = fixture.storefront.renders();
        assert_eq!(renders.len(), 1);
        assert_eq!(renders[0].path, "/products/hat");
        assert_eq!(renders[0].section_id.as_deref(), Some("hero"));
        assert!(fixture.api.calls().is_empty());
        assert_eq!(
            reloader.state(OverrideScope::Theme, "sections/hero.liquid"),
            ReloadState::Idle
        );
        assert!(reloader.states.is_empty());
        assert!(reloader.theme_locks.is_empty());
    }

    #[tokio::test]
    async fn test_render_failure_emits_error() {
        let fixture = fixture();
        fixture.storefront.fail_renders("Liquid syntax error");
        let reloader = HotReloader::new(fixture.ctx.clone());

        let event = edit(&fixture, "sections/hero.liquid", "{% if %}").await;
        match reloader.handle(&event, OverrideScope::Theme).await.unwrap() {
            HotReloadEvent::Error { key, message } => {
                assert_eq!(key, "sections/hero.liquid");
                assert!(message.contains("Liquid syntax error"));
            }
            other => panic!("unexpected {other:?}"),
        }
        // The override stays so the next page render still shows the edit.
        assert!(fixture
            .ctx
            .overrides
            .get(OverrideScope::Theme, "sections/hero.liquid")
            .is_some());
    }

    #[tokio::test]
    async fn test_css_and_other_files() {
        let fixture = fixture();
        let reloader = HotReloader::new(fixture.ctx.clone());

        let css = edit(&fixture, "assets/base.css", "body{}").await;
        assert_eq!(
            reloader.handle(&css, OverrideScope::Theme).await,
            Some(HotReloadEvent::Css {
                key: "assets/base.css".into()
            })
        );
        assert!(fixture.ctx.overrides.is_empty());

        let layout = edit(&fixture, "layout/theme.liquid", "<html></html>").await;
        assert_eq!(
            reloader.handle(&layout, OverrideScope::Theme).await,
            Some(HotReloadEvent::Full {
                key: "layout/theme.liquid".into()
            })
        );
        assert_eq!(
            fixture
                .ctx
                .overrides
                .get(OverrideScope::Theme, "layout/theme.liquid")
                .as_deref(),
            Some("<html></html>")
        );
        assert!(fixture.storefront.renders().is_empty());
    }

    #[tokio::test]
    async fn test_removed_file_drops_override() {
        let fixture = fixture();
        let reloader = HotReloader::new(fixture.ctx.clone());
        let event = edit(&fixture, "snippets/card.liquid", "card").await;
        reloader.handle(&event, OverrideScope::Theme).await;
        assert_eq!(fixture.ctx.overrides.len(), 1);

        fs::remove_file(fixture.dir.path().join("snippets/card.liquid")).unwrap();
        let removed = fixture
            .ctx
            .index
            .refresh("snippets/card.liquid")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reloader.handle(&removed, OverrideScope::Theme).await,
            Some(HotReloadEvent::Full {
                key: "snippets/card.liquid".into()
            })
        );
        assert!(fixture.ctx.overrides.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_reloader_follows_index() {
        let fixture = fixture();
        let (_, mut client) = fixture.ctx.register_client();
        let cancel = CancellationToken::new();
        let reloader = Arc::new(HotReloader::new(fixture.ctx.clone()));
        let handle = reloader.spawn(
            fixture.ctx.index.subscribe(),
            OverrideScope::Theme,
            cancel.clone(),
        );

        edit(&fixture, "assets/theme.css", "a{}").await;
        let sent = client.recv().await.unwrap();
        assert!(sent.contains("\"type\":\"css\""));

        cancel.cancel();
        handle.await.unwrap();
    }
}
