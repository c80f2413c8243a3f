use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::api::health::HealthState;
use crate::db::store::OddsStore;
use crate::detector::{snapshot_hash, ChangeTracker};
use crate::error::Result;
use crate::types::MatchSnapshot;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub persisted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub quotes_written: u64,
}

/// Receives matched batches from the ingestor and persists them to SQLite.
/// Runs as a dedicated background task so a slow disk never stalls ingestion.
pub struct DbWriter {
    store: OddsStore,
    batch_rx: mpsc::Receiver<Vec<MatchSnapshot>>,
    tracker: Arc<ChangeTracker>,
    health: Arc<HealthState>,
}

impl DbWriter {
    pub fn new(
        store: OddsStore,
        batch_rx: mpsc::Receiver<Vec<MatchSnapshot>>,
        tracker: Arc<ChangeTracker>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { store, batch_rx, tracker, health }
    }

    pub async fn run(mut self) {
        while let Some(batch) = self.batch_rx.recv().await {
            self.health.dec_write_queue_pending();
            let summary = write_batch(&self.store, &self.tracker, &batch).await;
            self.health.add_quotes_written(summary.quotes_written);
            info!(
                event = "DB_WRITE",
                persisted = summary.persisted,
                unchanged = summary.unchanged,
                failed = summary.failed,
                quotes = summary.quotes_written,
                "DB_WRITE | persisted={} unchanged={} failed={} quotes={}",
                summary.persisted,
                summary.unchanged,
                summary.failed,
                summary.quotes_written
            );
        }
        info!("DbWriter channel closed, exiting");
    }
}

/// Persists every changed match of a batch. A failing match is logged and skipped; its hash is
/// not recorded so the next cycle retries it.
pub async fn write_batch(
    store: &OddsStore,
    tracker: &ChangeTracker,
    batch: &[MatchSnapshot],
) -> WriteSummary {
    let mut summary = WriteSummary::default();
    for snapshot in batch {
        let identity = snapshot.identity();
        let hash = snapshot_hash(snapshot);
        if !tracker.has_changed(&identity, hash) {
            summary.unchanged += 1;
            continue;
        }
        match write_match(store, snapshot).await {
            Ok(written) => {
                tracker.record(identity, hash);
                summary.persisted += 1;
                summary.quotes_written += written;
            }
            Err(e) => {
                summary.failed += 1;
                error!(match_name = %snapshot.match_name, error = %e, "DB write error");
            }
        }
    }
    summary
}

async fn write_match(store: &OddsStore, snapshot: &MatchSnapshot) -> Result<u64> {
    let match_id = store.upsert_match(snapshot).await?;
    let mut written = 0;
    for (&source, quotes) in &snapshot.sources {
        for q in quotes.odds.quotes() {
            if store
                .append_quote(match_id, source, q.market, &q.line, q.side, q.price)
                .await?
            {
                written += 1;
            }
        }
    }
    debug!(match_name = %snapshot.match_name, match_id, written, "Match persisted");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::types::{MarketKind, QuoteBook, Side, SourceQuotes};

    fn snapshot(price: f64) -> MatchSnapshot {
        let mut odds = QuoteBook::default();
        odds.insert(MarketKind::Spread, "-0.5", Side::Home, price);
        odds.insert(MarketKind::Total, "2.5", Side::Over, 0.9);
        MatchSnapshot {
            match_name: "EPL - Arsenal vs Chelsea-2025-03-01 19:30:00".to_string(),
            start_time_beijing: "2025-03-01 19:30:00".to_string(),
            league_name: "EPL".to_string(),
            home_team: "Arsenal".to_string(),
            away_team: "Chelsea".to_string(),
            minutes_to_start: Some(30),
            event_id: None,
            line_id: None,
            league_id: None,
            margin_index: None,
            is_margin_189: false,
            total_margin_index: None,
            is_total_margin_189: false,
            sources: BTreeMap::from([(
                1,
                SourceQuotes {
                    league_name: "EPL".to_string(),
                    home_team: "Arsenal".to_string(),
                    away_team: "Chelsea".to_string(),
                    odds,
                },
            )]),
        }
    }

    #[tokio::test]
    async fn unchanged_matches_are_skipped() {
        let store = OddsStore::in_memory().await.unwrap();
        let tracker = ChangeTracker::new();

        let first = write_batch(&store, &tracker, &[snapshot(0.94)]).await;
        assert_eq!(first.persisted, 1);
        assert_eq!(first.quotes_written, 2);

        let second = write_batch(&store, &tracker, &[snapshot(0.94)]).await;
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.quotes_written, 0);

        let third = write_batch(&store, &tracker, &[snapshot(0.9)]).await;
        assert_eq!(third.persisted, 1);
        assert_eq!(third.quotes_written, 1);
    }

    #[tokio::test]
    async fn run_drains_channel() {
        let store = OddsStore::in_memory().await.unwrap();
        let tracker = Arc::new(ChangeTracker::new());
        let health = Arc::new(HealthState::new());
        let (tx, rx) = mpsc::channel(4);

        health.inc_write_queue_pending();
        tx.send(vec![snapshot(0.94)]).await.unwrap();
        drop(tx);
        DbWriter::new(store.clone(), rx, Arc::clone(&tracker), Arc::clone(&health))
            .run()
            .await;

        assert_eq!(tracker.len(), 1);
        let s = health.snapshot();
        assert_eq!(s.write_queue_pending, 0);
        assert_eq!(s.quotes_written, 2);
    }
}
