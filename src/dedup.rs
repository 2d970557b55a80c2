//! Deduplication
//!
//! The same API response can be logged more than once (retries, resumed sessions,
//! copied transcripts). A record is identified by its `message_id:request_id` pair and
//! only the first occurrence within one pipeline run is counted.
//!
//! Deduplicators are cheap and built fresh per top-level query through
//! [`DedupMode::create`], so two concurrent queries never share seen-keys.

use crate::models::UsageEntry;
use dashmap::DashSet;
use tracing::debug;

pub trait Deduplicator: Send + Sync {
    /// `true` the first time an id pair is seen; records lacking both ids always pass
    fn should_include(&self, message_id: Option<&str>, request_id: Option<&str>) -> bool;

    fn reset(&self);

    fn should_include_entry(&self, entry: &UsageEntry) -> bool {
        self.should_include(entry.message_id.as_deref(), entry.request_id.as_deref())
    }
}

/// Build the dedup key, `None` when there is nothing to identify the record by
pub fn dedup_key(message_id: Option<&str>, request_id: Option<&str>) -> Option<String> {
    match (message_id, request_id) {
        (None, None) => None,
        (m, r) => Some(format!("{}:{}", m.unwrap_or_default(), r.unwrap_or_default())),
    }
}

#[derive(Debug, Default)]
pub struct HashDeduplicator {
    seen: DashSet<String>,
}

impl HashDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Deduplicator for HashDeduplicator {
    fn should_include(&self, message_id: Option<&str>, request_id: Option<&str>) -> bool {
        let Some(key) = dedup_key(message_id, request_id) else {
            return true;
        };

        let first = self.seen.insert(key);
        if !first {
            debug!(
                message_id = message_id.unwrap_or_default(),
                request_id = request_id.unwrap_or_default(),
                "Skipping duplicate entry"
            );
        }
        first
    }

    fn reset(&self) {
        self.seen.clear();
    }
}

/// Accepts everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDeduplicator;

impl Deduplicator for NoopDeduplicator {
    fn should_include(&self, _message_id: Option<&str>, _request_id: Option<&str>) -> bool {
        true
    }

    fn reset(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    Enabled,
    Disabled,
}

impl DedupMode {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }

    /// A fresh deduplicator with no seen keys
    pub fn create(self) -> Box<dyn Deduplicator> {
        match self {
            Self::Enabled => Box::new(HashDeduplicator::new()),
            Self::Disabled => Box::new(NoopDeduplicator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_occurrence_wins() {
        let dedup = HashDeduplicator::new();
        assert!(dedup.should_include(Some("msg123"), Some("req456")));
        assert!(!dedup.should_include(Some("msg123"), Some("req456")));
        assert!(dedup.should_include(Some("msg123"), Some("req789")));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_missing_ids_always_included() {
        let dedup = HashDeduplicator::new();
        assert!(dedup.should_include(None, None));
        assert!(dedup.should_include(None, None));
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_reset_accepts_again() {
        let dedup = HashDeduplicator::new();
        assert!(dedup.should_include(Some("m"), Some("r")));
        dedup.reset();
        assert!(dedup.should_include(Some("m"), Some("r")));
    }

    #[test]
    fn test_fresh_instances_are_independent() {
        let first = DedupMode::Enabled.create();
        let second = DedupMode::Enabled.create();
        assert!(first.should_include(Some("m"), Some("r")));
        assert!(second.should_include(Some("m"), Some("r")));
        assert!(!first.should_include(Some("m"), Some("r")));
    }

    #[test]
    fn test_disabled_mode_never_filters() {
        let dedup = DedupMode::from_enabled(false).create();
        assert!(dedup.should_include(Some("m"), Some("r")));
        assert!(dedup.should_include(Some("m"), Some("r")));
    }

    #[test]
    fn test_dedup_key_format() {
        assert_eq!(dedup_key(Some("msg123"), Some("req456")).as_deref(), Some("msg123:req456"));
        assert_eq!(dedup_key(Some("msg123"), None).as_deref(), Some("msg123:"));
        assert_eq!(dedup_key(None, None), None);
    }
}
