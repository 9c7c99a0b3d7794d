//! Object URL storage for inline workers
//!
//! Mirrors `URL.createObjectURL` / `URL.revokeObjectURL`: script text is
//! registered under a `blob:<origin>/<uuid>` URL which the worker
//! environment can later resolve.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Content registered under an object URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub content: String,
    pub content_type: String,
}

/// Registry of live object URLs
#[derive(Debug)]
pub struct BlobStore {
    origin: String,
    entries: Mutex<HashMap<String, BlobEntry>>,
}

impl BlobStore {
    /// Create an empty store whose URLs are scoped to `origin`
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn create_object_url(&self, content: String, content_type: String) -> String {
        let url = format!("blob:{}/{}", self.origin, uuid::Uuid::new_v4());
        self.entries.lock().insert(
            url.clone(),
            BlobEntry {
                content,
                content_type,
            },
        );
        tracing::trace!(%url, "object URL created");
        url
    }

    pub fn resolve(&self, url: &str) -> Option<BlobEntry> {
        self.entries.lock().get(url).cloned()
    }

    /// Revoke `url`. Unknown or already revoked URLs are ignored.
    pub fn revoke_object_url(&self, url: &str) {
        if self.entries.lock().remove(url).is_some() {
            tracing::trace!(%url, "object URL revoked");
        }
    }

    /// Number of live object URLs
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new("null")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_url() {
        let store = BlobStore::new("https://app.local");
        let url = store.create_object_url(
            "console.log('test')".to_string(),
            "application/javascript".to_string(),
        );
        assert!(url.starts_with("blob:https://app.local/"));

        let entry = store.resolve(&url).unwrap();
        assert_eq!(entry.content, "console.log('test')");
        assert_eq!(entry.content_type, "application/javascript");

        store.revoke_object_url(&url);
        assert!(store.resolve(&url).is_none());

        // revoking twice is harmless
        store.revoke_object_url(&url);
        assert!(store.is_empty());
    }

    #[test]
    fn test_urls_are_unique() {
        let store = BlobStore::default();
        let a = store.create_object_url("a".into(), "text/javascript".into());
        let b = store.create_object_url("a".into(), "text/javascript".into());
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }
}
