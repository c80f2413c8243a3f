use tokio::sync::RwLock;

use crate::types::TrendWarning;

/// Consecutive-decrease warnings from the latest monitor cycle. Never persisted.
#[derive(Debug, Default)]
pub struct WarningCache {
    warnings: RwLock<Vec<TrendWarning>>,
}

impl WarningCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a cycle's full set; nothing from the previous cycle survives.
    pub async fn replace(&self, warnings: Vec<TrendWarning>) {
        *self.warnings.write().await = warnings;
    }

    pub async fn clear(&self) {
        self.warnings.write().await.clear();
    }

    pub async fn snapshot(&self) -> Vec<TrendWarning> {
        self.warnings.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.warnings.read().await.len()
    }
}
