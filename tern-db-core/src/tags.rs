//! Tags matcher
//!
//! Bidirectional map between document tag names and small integer tag
//! numbers, versioned by a state token. Once a tag number is assigned it is
//! never reused; new versions only add mappings. The matcher is read-mostly:
//! updates build a copy and publish it through an atomic swap
//! ([`SharedTagsMatcher`]).

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Small integer tag number
pub type TagId = u32;

/// A dotted path of tag numbers into the document tuple
pub type TagPath = Vec<TagId>;

#[derive(Debug, Clone, Default)]
pub struct TagsMatcher {
    name_to_tag: FxHashMap<String, TagId>,
    tag_to_name: Vec<String>,
    version: u32,
    state_token: u32,
}

impl TagsMatcher {
    pub fn new(state_token: u32) -> Self {
        Self {
            state_token,
            ..Default::default()
        }
    }

    /// Resolve a tag name, `None` when unknown
    pub fn tag(&self, name: &str) -> Option<TagId> {
        self.name_to_tag.get(name).copied()
    }

    /// Resolve a tag number back to its name
    pub fn name(&self, tag: TagId) -> Option<&str> {
        self.tag_to_name.get(tag as usize).map(|s| s.as_str())
    }

    /// Resolve or assign a tag number. Assignments bump the version;
    /// existing numbers are never reused.
    pub fn tag_or_add(&mut self, name: &str) -> TagId {
        if let Some(t) = self.name_to_tag.get(name) {
            return *t;
        }
        let t = self.tag_to_name.len() as TagId;
        self.tag_to_name.push(name.to_string());
        self.name_to_tag.insert(name.to_string(), t);
        self.version += 1;
        t
    }

    /// Resolve a dotted json path, assigning missing tags
    pub fn path_or_add(&mut self, path: &str) -> TagPath {
        path.split('.').map(|seg| self.tag_or_add(seg)).collect()
    }

    /// Resolve a dotted json path without assigning
    pub fn path(&self, path: &str) -> Option<TagPath> {
        path.split('.').map(|seg| self.tag(seg)).collect()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn state_token(&self) -> u32 {
        self.state_token
    }

    pub fn len(&self) -> usize {
        self.tag_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_to_name.is_empty()
    }
}

/// Read-mostly shared matcher published through atomic pointer swap
#[derive(Debug, Default)]
pub struct SharedTagsMatcher {
    inner: ArcSwap<TagsMatcher>,
}

impl SharedTagsMatcher {
    pub fn new(tm: TagsMatcher) -> Self {
        Self {
            inner: ArcSwap::from_pointee(tm),
        }
    }

    /// Current snapshot; cheap, lock-free
    pub fn load(&self) -> Arc<TagsMatcher> {
        self.inner.load_full()
    }

    /// Copy-update-publish. The mutation runs on a private clone and the
    /// result replaces the snapshot atomically.
    pub fn update<R>(&self, f: impl FnOnce(&mut TagsMatcher) -> R) -> R {
        let mut copy = (**self.inner.load()).clone();
        let r = f(&mut copy);
        self.inner.store(Arc::new(copy));
        r
    }
}

impl Clone for SharedTagsMatcher {
    fn clone(&self) -> Self {
        Self {
            inner: ArcSwap::from(self.inner.load_full()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_never_reused() {
        let mut tm = TagsMatcher::new(1);
        let a = tm.tag_or_add("a");
        let b = tm.tag_or_add("b");
        assert_ne!(a, b);
        assert_eq!(tm.tag_or_add("a"), a);
        assert_eq!(tm.version(), 2);
    }

    #[test]
    fn shared_update_publishes_new_snapshot() {
        let shared = SharedTagsMatcher::new(TagsMatcher::new(7));
        let old = shared.load();
        shared.update(|tm| {
            tm.tag_or_add("title");
        });
        let new = shared.load();
        assert!(old.tag("title").is_none());
        assert_eq!(new.tag("title"), Some(0));
        assert_eq!(new.state_token(), 7);
    }
}
