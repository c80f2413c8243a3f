use std::sync::Arc;

use tokio::sync::RwLock;

use crate::clock;
use crate::detector::batch_fingerprint;
use crate::types::{BroadcastPayload, MatchSnapshot};

#[derive(Debug, Default)]
struct Inner {
    matches: Arc<Vec<MatchSnapshot>>,
    fingerprint: u64,
    updated_at: String,
}

/// The latest successfully matched batch. Replaced wholesale once per ingestion cycle.
#[derive(Debug, Default)]
pub struct MatchCache {
    inner: RwLock<Inner>,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, matches: Vec<MatchSnapshot>) {
        let fingerprint = batch_fingerprint(&matches);
        let mut inner = self.inner.write().await;
        inner.matches = Arc::new(matches);
        inner.fingerprint = fingerprint;
        inner.updated_at = clock::now_beijing_string();
    }

    pub async fn fingerprint(&self) -> u64 {
        self.inner.read().await.fingerprint
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.matches.len()
    }

    /// Current broadcast payload, stamped with the time the batch was cached.
    pub async fn payload(&self) -> BroadcastPayload {
        let inner = self.inner.read().await;
        BroadcastPayload {
            timestamp: inner.updated_at.clone(),
            matches: inner.matches.as_ref().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_swaps_whole_batch() {
        let cache = MatchCache::new();
        assert_eq!(cache.len().await, 0);
        assert!(cache.payload().await.timestamp.is_empty());

        cache.replace(Vec::new()).await;
        assert_eq!(cache.len().await, 0);
        assert!(!cache.payload().await.timestamp.is_empty());
        assert_eq!(cache.fingerprint().await, batch_fingerprint(&[]));
    }
}
