//! Authorization cache.
//!
//! Remembers the central system's verdict on recently seen idTags so a
//! session can start without a round-trip (LocalPreAuthorize) or with the
//! link down (LocalAuthorizeOffline). ClearCache empties it.

use std::collections::HashMap;

use tracing::debug;

/// Cached authorization verdicts, keyed by idTag.
#[derive(Debug, Default)]
pub struct AuthCache {
    entries: HashMap<String, bool>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the server's verdict for a tag.
    pub fn update(&mut self, id_tag: &str, accepted: bool) {
        debug!("auth cache: {} -> {}", id_tag, accepted);
        self.entries.insert(id_tag.to_string(), accepted);
    }

    /// Cached verdict, if the tag has been seen.
    pub fn lookup(&self, id_tag: &str) -> Option<bool> {
        self.entries.get(id_tag).copied()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_reflects_latest_verdict() {
        let mut cache = AuthCache::new();
        assert_eq!(cache.lookup("tag"), None);

        cache.update("tag", true);
        assert_eq!(cache.lookup("tag"), Some(true));

        cache.update("tag", false);
        assert_eq!(cache.lookup("tag"), Some(false));

        cache.clear();
        assert_eq!(cache.lookup("tag"), None);
    }
}
