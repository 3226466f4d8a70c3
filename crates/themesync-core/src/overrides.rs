//! Pending local template content not yet confirmed on the remote.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::storefront::RenderRequest;

/// Which render parameter an override travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverrideScope {
    Theme,
    Extension,
}

/// Local content the remote theme does not have yet, sent along with renders.
#[derive(Debug, Default)]
pub struct OverrideStore {
    entries: RwLock<BTreeMap<(OverrideScope, String), String>>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scope: OverrideScope, key: impl Into<String>, content: impl Into<String>) {
        self.entries
            .write()
            .insert((scope, key.into()), content.into());
    }

    pub fn get(&self, scope: OverrideScope, key: &str) -> Option<String> {
        self.entries.read().get(&(scope, key.to_string())).cloned()
    }

    pub fn remove(&self, scope: OverrideScope, key: &str) -> bool {
        self.entries
            .write()
            .remove(&(scope, key.to_string()))
            .is_some()
    }

    /// Drop the entry for `key` only if it still holds `uploaded`. A newer
    /// edit that arrived during the upload stays in place.
    pub fn clear_if_unchanged(&self, scope: OverrideScope, key: &str, uploaded: &str) -> bool {
        let mut entries = self.entries.write();
        let id = (scope, key.to_string());
        if entries.get(&id).is_some_and(|current| current == uploaded) {
            entries.remove(&id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Theme-scoped overrides, keyed by theme path.
    pub fn replace_templates(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .iter()
            .filter(|((scope, _), _)| *scope == OverrideScope::Theme)
            .map(|((_, key), content)| (key.clone(), content.clone()))
            .collect()
    }

    /// Extension-scoped overrides bucketed by their top path segment.
    pub fn replace_extension_templates(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut buckets: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for ((scope, key), content) in self.entries.read().iter() {
            if *scope != OverrideScope::Extension {
                continue;
            }
            let bucket = key.split('/').next().unwrap_or(key).to_string();
            buckets
                .entry(bucket)
                .or_default()
                .insert(key.clone(), content.clone());
        }
        buckets
    }

    /// Attach every pending override to `request`.
    pub fn apply_to(&self, request: &mut RenderRequest) {
        request.replace_templates = self.replace_templates();
        request.replace_extension_templates = self.replace_extension_templates();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_are_separate() {
        let store = OverrideStore::new();
        store.set(OverrideScope::Theme, "sections/hero.liquid", "theme");
        store.set(OverrideScope::Extension, "blocks/star.liquid", "ext");
        store.set(OverrideScope::Extension, "snippets/icon.liquid", "icon");

        assert_eq!(store.len(), 3);
        assert_eq!(
            store.replace_templates().get("sections/hero.liquid").map(String::as_str),
            Some("theme")
        );
        let ext = store.replace_extension_templates();
        assert_eq!(ext.len(), 2);
        assert_eq!(ext["blocks"]["blocks/star.liquid"], "ext");
        assert_eq!(ext["snippets"]["snippets/icon.liquid"], "icon");
    }

    #[test]
    fn clear_keeps_newer_edits() {
        let store = OverrideStore::new();
        store.set(OverrideScope::Theme, "sections/hero.liquid", "v2");
        assert!(!store.clear_if_unchanged(OverrideScope::Theme, "sections/hero.liquid", "v1"));
        assert_eq!(store.get(OverrideScope::Theme, "sections/hero.liquid").as_deref(), Some("v2"));
        assert!(store.clear_if_unchanged(OverrideScope::Theme, "sections/hero.liquid", "v2"));
        assert!(store.is_empty());
    }

    #[test]
    fn apply_to_fills_request() {
        let store = OverrideStore::new();
        store.set(OverrideScope::Theme, "templates/index.json", "{}");
        let mut request = RenderRequest::page("/");
        store.apply_to(&mut request);
        assert_eq!(request.replace_templates.len(), 1);
        assert!(request.replace_extension_templates.is_empty());
    }
}
