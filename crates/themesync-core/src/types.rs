//! Shared data model: assets, manifests, themes and sessions.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ignore::IgnoreMatcher;

/// Content of an asset. Text assets are valid UTF-8; everything else is binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetContent {
    Text(String),
    Binary(Vec<u8>),
}

impl AssetContent {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => AssetContent::Text(text),
            Err(err) => AssetContent::Binary(err.into_bytes()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AssetContent::Text(text) => text.as_bytes(),
            AssetContent::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AssetContent::Text(text) => Some(text),
            AssetContent::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A file tracked by the engine, identified by its theme-relative key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub key: String,
    pub checksum: String,
    pub content: AssetContent,
    pub size: u64,
    pub modified_at: Option<SystemTime>,
}

/// Mapping `key -> checksum` for one side of a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecksumManifest(BTreeMap<String, String>);

impl ChecksumManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, checksum: impl Into<String>) {
        self.0.insert(key.into(), checksum.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Drop every key the matcher ignores.
    pub fn filtered(&self, matcher: &IgnoreMatcher) -> Self {
        self.iter()
            .filter(|(key, _)| !matcher.is_ignored(key))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ChecksumManifest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeRole {
    #[serde(alias = "main")]
    Live,
    #[serde(alias = "demo")]
    Unpublished,
    Development,
}

impl ThemeRole {
    /// Role name understood by the remote Admin API.
    pub fn as_remote(&self) -> &'static str {
        match self {
            ThemeRole::Live => "main",
            ThemeRole::Unpublished => "unpublished",
            ThemeRole::Development => "development",
        }
    }
}

/// A remote theme as reported by the Admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub id: u64,
    pub name: String,
    pub role: ThemeRole,
    #[serde(default)]
    pub processing: bool,
}

/// Authenticated handle for one store, supplied by the auth collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub store_fqdn: String,
    pub token: String,
    pub storefront_token: Option<String>,
}

impl Session {
    pub fn new(store_fqdn: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            store_fqdn: normalize_store(&store_fqdn.into()),
            token: token.into(),
            storefront_token: None,
        }
    }

    pub fn with_storefront_token(mut self, token: Option<String>) -> Self {
        self.storefront_token = token;
        self
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store_fqdn", &self.store_fqdn)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// `https://shop.example.com/` and `shop` both become a bare host name.
pub fn normalize_store(store: &str) -> String {
    let host = store
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    if host.contains('.') {
        host.to_string()
    } else {
        format!("{host}.myshopify.com")
    }
}
