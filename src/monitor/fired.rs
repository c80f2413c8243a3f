use dashmap::DashSet;

use crate::types::{MarketKind, Side, SourceId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FiredKey {
    pub match_id: i64,
    pub market: MarketKind,
    pub line: String,
    pub side: Side,
    pub source: SourceId,
}

/// Point-drop keys already written (or found already written) in this process.
#[derive(Debug, Default)]
pub struct FiredWarningSet {
    keys: DashSet<FiredKey>,
}

impl FiredWarningSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &FiredKey) -> bool {
        self.keys.contains(key)
    }

    /// Returns false when the key was already present.
    pub fn insert(&self, key: FiredKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
