use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use tracing::warn;

use crate::db::models::OddsPoint;
use crate::types::MatchSnapshot;

/// Hash of a match's filtered per-source quotes.
///
/// Sources, lines and sides are all held in ordered maps, so the JSON text is key-sorted and
/// equal quote sets always hash equal.
pub fn snapshot_hash(snapshot: &MatchSnapshot) -> u64 {
    let mut hasher = DefaultHasher::new();
    match serde_json::to_string(&snapshot.sources) {
        Ok(text) => text.hash(&mut hasher),
        Err(e) => {
            warn!(match_name = %snapshot.match_name, error = %e, "Snapshot serialization failed");
            snapshot.match_name.hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// One value for a whole batch: identities and quote hashes in order.
pub fn batch_fingerprint(snapshots: &[MatchSnapshot]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for s in snapshots {
        s.identity().hash(&mut hasher);
        snapshot_hash(s).hash(&mut hasher);
    }
    hasher.finish()
}

/// Last persisted quote hash per match identity.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    hashes: DashMap<String, u64>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_changed(&self, identity: &str, hash: u64) -> bool {
        self.hashes.get(identity).map_or(true, |h| *h != hash)
    }

    /// Records a hash after the match was persisted.
    pub fn record(&self, identity: String, hash: u64) {
        self.hashes.insert(identity, hash);
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Collapses runs of equal prices, keeping the latest timestamp of each run.
///
/// Input must be time-ascending.
pub fn dedupe_consecutive(series: Vec<OddsPoint>) -> Vec<OddsPoint> {
    let mut out: Vec<OddsPoint> = Vec::with_capacity(series.len());
    for point in series {
        match out.last_mut() {
            Some(last) if last.price == point.price => *last = point,
            _ => out.push(point),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketKind, QuoteBook, Side, SourceQuotes};
    use std::collections::BTreeMap;

    fn pt(price: f64, recorded_at: i64) -> OddsPoint {
        OddsPoint { price, recorded_at }
    }

    fn snapshot(price: f64) -> MatchSnapshot {
        let mut odds = QuoteBook::default();
        odds.insert(MarketKind::Spread, "-0.5", Side::Home, price);
        let mut sources = BTreeMap::new();
        sources.insert(
            2,
            SourceQuotes {
                league_name: "EPL".to_string(),
                home_team: "Arsenal".to_string(),
                away_team: "Chelsea".to_string(),
                odds,
            },
        );
        MatchSnapshot {
            match_name: "EPL - Arsenal vs Chelsea-2025-03-01 19:30:00".to_string(),
            start_time_beijing: "2025-03-01 19:30:00".to_string(),
            league_name: "EPL".to_string(),
            home_team: "Arsenal".to_string(),
            away_team: "Chelsea".to_string(),
            minutes_to_start: Some(90),
            event_id: None,
            line_id: None,
            league_id: None,
            margin_index: None,
            is_margin_189: false,
            total_margin_index: None,
            is_total_margin_189: false,
            sources,
        }
    }

    #[test]
    fn dedupe_keeps_latest_of_each_run() {
        let series = vec![pt(0.9, 1), pt(0.9, 2), pt(0.85, 3), pt(0.85, 4), pt(0.9, 5)];
        assert_eq!(dedupe_consecutive(series), vec![pt(0.9, 2), pt(0.85, 4), pt(0.9, 5)]);
        assert!(dedupe_consecutive(Vec::new()).is_empty());
    }

    #[test]
    fn hash_ignores_non_quote_fields() {
        let a = snapshot(0.94);
        let mut b = snapshot(0.94);
        b.minutes_to_start = Some(10);
        assert_eq!(snapshot_hash(&a), snapshot_hash(&b));
        assert_ne!(snapshot_hash(&a), snapshot_hash(&snapshot(0.93)));
    }

    #[test]
    fn tracker_reports_changes_until_recorded() {
        let tracker = ChangeTracker::new();
        let s = snapshot(0.94);
        let h = snapshot_hash(&s);
        assert!(tracker.has_changed(&s.identity(), h));
        tracker.record(s.identity(), h);
        assert!(!tracker.has_changed(&s.identity(), h));
        assert!(tracker.has_changed(&s.identity(), snapshot_hash(&snapshot(0.9))));
    }

    #[test]
    fn fingerprint_tracks_batch_contents() {
        let one = vec![snapshot(0.94)];
        let two = vec![snapshot(0.91)];
        assert_eq!(batch_fingerprint(&one), batch_fingerprint(&one.clone()));
        assert_ne!(batch_fingerprint(&one), batch_fingerprint(&two));
    }
}
