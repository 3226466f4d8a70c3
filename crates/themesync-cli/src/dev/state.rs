//! Per-run state of the dev server.
//!
//! One [`DevServerContext`] is created when `dev` starts and dropped on
//! shutdown. Request handlers, the hot reloader and live sync all share it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use themesync_core::{
    OverrideScope, OverrideStore, Session, Storefront, Theme, ThemeApi, ThemeFileIndex,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::dev::{DevConfig, HotReloadEvent};

/// Storefront session cookie kept fresh from render responses.
pub const SESSION_COOKIE: &str = "_shopify_essential";

/// Hot reload messages queued per client before it is considered stalled.
pub const CLIENT_BUFFER: usize = 100;

/// Connected hot-reload clients by id.
pub type ClientRegistry = Arc<RwLock<HashMap<usize, mpsc::Sender<String>>>>;

/// Context shared by handlers and background tasks.
pub type SharedContext = Arc<DevServerContext>;

/// Everything a preview session needs, shared behind an [`Arc`].
pub struct DevServerContext {
    pub config: DevConfig,
    pub session: Session,
    pub theme: Theme,
    pub index: Arc<ThemeFileIndex>,
    pub extension_index: Option<Arc<ThemeFileIndex>>,
    pub overrides: OverrideStore,
    pub storefront: Arc<dyn Storefront>,
    pub api: Arc<dyn ThemeApi>,
    session_cookies: RwLock<BTreeMap<String, String>>,
    last_path: RwLock<String>,
    clients: ClientRegistry,
    next_client_id: AtomicUsize,
}

impl DevServerContext {
    pub fn new(
        config: DevConfig,
        session: Session,
        theme: Theme,
        index: Arc<ThemeFileIndex>,
        storefront: Arc<dyn Storefront>,
        api: Arc<dyn ThemeApi>,
    ) -> Self {
        Self {
            config,
            session,
            theme,
            index,
            extension_index: None,
            overrides: OverrideStore::new(),
            storefront,
            api,
            session_cookies: RwLock::new(BTreeMap::new()),
            last_path: RwLock::new("/".to_string()),
            clients: Arc::new(RwLock::new(HashMap::new())),
            next_client_id: AtomicUsize::new(0),
        }
    }

    pub fn with_extension_index(mut self, index: Arc<ThemeFileIndex>) -> Self {
        self.extension_index = Some(index);
        self
    }

    /// Index backing `scope`; `None` for extensions when none is mounted.
    pub fn index_for(&self, scope: OverrideScope) -> Option<&Arc<ThemeFileIndex>> {
        match scope {
            OverrideScope::Theme => Some(&self.index),
            OverrideScope::Extension => self.extension_index.as_ref(),
        }
    }

    pub fn session_cookies(&self) -> BTreeMap<String, String> {
        self.session_cookies.read().clone()
    }

    pub fn set_session_cookie(&self, name: impl Into<String>, value: impl Into<String>) {
        self.session_cookies.write().insert(name.into(), value.into());
    }

    /// Path of the most recent page render; section renders reuse it.
    pub fn last_path(&self) -> String {
        self.last_path.read().clone()
    }

    pub fn set_last_path(&self, path: impl Into<String>) {
        *self.last_path.write() = path.into();
    }

    pub fn open_event(&self) -> HotReloadEvent {
        HotReloadEvent::Open {
            pid: std::process::id(),
            theme_id: self.theme.id,
        }
    }

    /// Add a hot reload client. Messages arrive as encoded JSON.
    pub fn register_client(&self) -> (usize, mpsc::Receiver<String>) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        self.clients.write().insert(id, tx);
        (id, rx)
    }

    pub fn unregister_client(&self, id: usize) {
        self.clients.write().remove(&id);
    }

    /// Send `event` to every client without waiting on any of them. A client
    /// whose channel is closed or whose buffer is full is dropped; a stalled
    /// browser tab reconnects and reloads.
    pub fn broadcast(&self, event: &HotReloadEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(error = %err, "cannot encode hot reload event");
                return;
            }
        };

        let clients = self.clients.read().clone();
        let mut failed_ids = Vec::new();
        for (id, tx) in clients {
            match tx.try_send(json.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(client = id, "hot reload client not reading, dropping it");
                    failed_ids.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(client = id, "hot reload client disconnected");
                    failed_ids.push(id);
                }
            }
        }

        for id in failed_ids {
            self.unregister_client(id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }
}
