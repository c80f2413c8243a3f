use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::clock;
use crate::config::{Config, FAILURE_BACKOFF_SECS, INGEST_INTERVAL_SECS, STANDBY_SECS};
use crate::db::OddsStore;
use crate::detector::{margin_index, CommonOddsSet};
use crate::error::{AppError, Result};
use crate::ingest::fetcher::FeedFetcher;
use crate::matching::{resolve_fixture, BindingResolver, MatchStats};
use crate::normalizer::{index_feed, SourceIndex};
use crate::state::MatchCache;
use crate::types::{match_name, Fixture, MatchSnapshot, SourceId, SourceQuotes};

/// Polls every source, reconciles the feeds and hands the matched batch to the writer and the
/// latest-matches cache.
pub struct Ingestor {
    cfg: Config,
    fetcher: FeedFetcher,
    store: OddsStore,
    cache: Arc<MatchCache>,
    batch_tx: mpsc::Sender<Vec<MatchSnapshot>>,
    health: Arc<HealthState>,
}

impl Ingestor {
    pub fn new(
        cfg: Config,
        fetcher: FeedFetcher,
        store: OddsStore,
        cache: Arc<MatchCache>,
        batch_tx: mpsc::Sender<Vec<MatchSnapshot>>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { cfg, fetcher, store, cache, batch_tx, health }
    }

    pub async fn run(self) {
        info!(sources = ?self.cfg.source_ids(), canonical = self.cfg.canonical_source, "Ingestor started");
        loop {
            let pause = match self.cycle().await {
                Ok(0) => {
                    info!(
                        event = "INGEST_STANDBY",
                        secs = STANDBY_SECS,
                        "INGEST | no matched fixtures, standing by for {}s",
                        STANDBY_SECS
                    );
                    STANDBY_SECS
                }
                Ok(_) => INGEST_INTERVAL_SECS,
                Err(e) => {
                    self.health.record_ingest_failure();
                    error!(
                        event = "INGEST_FAILED",
                        error = %e,
                        "INGEST | cycle abandoned, retrying in {}s",
                        FAILURE_BACKOFF_SECS
                    );
                    FAILURE_BACKOFF_SECS
                }
            };
            tokio::time::sleep(Duration::from_secs(pause)).await;
        }
    }

    /// One full cycle. Returns the number of matched fixtures.
    async fn cycle(&self) -> Result<usize> {
        let feeds = self.fetcher.fetch_all(&self.cfg.sources).await?;
        let (matches, stats) = reconcile(
            &self.store,
            self.cfg.canonical_source,
            self.cfg.index_source,
            feeds,
            clock::now_beijing(),
        )
        .await?;

        info!(
            event = "INGEST_CYCLE",
            canonical = stats.canonical_fixtures,
            matched = stats.matched,
            no_team_mapping = stats.no_team_mapping,
            no_candidates = stats.no_candidates,
            no_index_hit = stats.no_index_hit,
            missing_start_time = stats.missing_start_time,
            empty_common_set = stats.empty_common_set,
            "INGEST | matched {}/{} fixtures",
            stats.matched,
            stats.canonical_fixtures
        );

        let matched = matches.len();
        if matched > 0 {
            self.health.inc_write_queue_pending();
            if self.batch_tx.send(matches.clone()).await.is_err() {
                self.health.dec_write_queue_pending();
                warn!("DbWriter channel closed, batch not persisted");
            }
        }
        self.cache.replace(matches).await;
        self.health.record_ingest(clock::now_ms(), matched);
        Ok(matched)
    }
}

/// Normalizes the feeds, joins them through the bindings and builds one snapshot per fixture
/// found in every source. Leagues are matched concurrently.
pub async fn reconcile(
    store: &OddsStore,
    canonical: SourceId,
    index_source: SourceId,
    feeds: BTreeMap<SourceId, Value>,
    now: NaiveDateTime,
) -> Result<(Vec<MatchSnapshot>, MatchStats)> {
    let mut indices = BTreeMap::new();
    for (source, feed) in &feeds {
        let (index, stats) = index_feed(*source, feed);
        info!(
            event = "NORMALIZE",
            source,
            total = stats.feed_total,
            fixtures = stats.fixtures,
            not_object = stats.rejected_not_object,
            missing_names = stats.rejected_missing_names,
            duplicates = stats.duplicate_keys,
            invalid_lines = stats.invalid_lines,
            absent_prices = stats.absent_prices,
            "NORMALIZE | source {} -> {} fixtures",
            source,
            index.len()
        );
        indices.insert(*source, index);
    }

    let canonical_index = indices
        .get(&canonical)
        .ok_or_else(|| AppError::Config(format!("canonical source {canonical} has no feed")))?;
    let leagues: Vec<String> = canonical_index.leagues().into_iter().collect();
    let rows = store.bindings_for_leagues(canonical, &leagues).await?;
    debug!(leagues = leagues.len(), bindings = rows.len(), "Bindings loaded");

    let sources: Vec<SourceId> = indices.keys().copied().collect();
    let resolver = Arc::new(BindingResolver::from_rows(canonical, &sources, &rows));
    let indices = Arc::new(indices);

    let handles = leagues.into_iter().map(|league| {
        let resolver = Arc::clone(&resolver);
        let indices = Arc::clone(&indices);
        tokio::spawn(async move { match_league(&league, &resolver, &indices, index_source, now) })
    });

    let mut matches = Vec::new();
    let mut stats = MatchStats::default();
    for joined in join_all(handles).await {
        match joined {
            Ok((league_matches, league_stats)) => {
                matches.extend(league_matches);
                stats.merge(&league_stats);
            }
            Err(e) => error!(error = %e, "League matching task failed"),
        }
    }
    matches.sort_by(|a, b| {
        a.start_time_beijing
            .cmp(&b.start_time_beijing)
            .then_with(|| a.match_name.cmp(&b.match_name))
    });
    Ok((matches, stats))
}

fn match_league(
    league: &str,
    resolver: &BindingResolver,
    indices: &BTreeMap<SourceId, SourceIndex>,
    index_source: SourceId,
    now: NaiveDateTime,
) -> (Vec<MatchSnapshot>, MatchStats) {
    let mut out = Vec::new();
    let mut stats = MatchStats::default();
    let Some(canonical_index) = indices.get(&resolver.canonical()) else {
        return (out, stats);
    };

    for fixture in canonical_index.fixtures().filter(|f| f.key.league == league) {
        stats.canonical_fixtures += 1;
        let found = match resolve_fixture(fixture, resolver, indices) {
            Ok(found) => found,
            Err(miss) => {
                debug!(fixture = %fixture.key, reason = %miss, "Fixture dropped");
                stats.record_miss(miss);
                continue;
            }
        };
        let start = fixture
            .start_time
            .clone()
            .or_else(|| found.get(&index_source).and_then(|f| f.start_time.clone()));
        let Some(start) = start else {
            debug!(fixture = %fixture.key, "Fixture dropped: no start time");
            stats.missing_start_time += 1;
            continue;
        };
        match build_snapshot(fixture, &found, index_source, &start, now) {
            Some(snapshot) => {
                stats.matched += 1;
                out.push(snapshot);
            }
            None => {
                debug!(fixture = %fixture.key, "Fixture dropped: no common odds");
                stats.empty_common_set += 1;
            }
        }
    }
    (out, stats)
}

/// Restricts every source to the common odds set and tags the match with the designated
/// source's indexes. None when no (market, line, side) is priced by every source.
pub fn build_snapshot(
    canonical: &Fixture,
    found: &BTreeMap<SourceId, &Fixture>,
    index_source: SourceId,
    start_time: &str,
    now: NaiveDateTime,
) -> Option<MatchSnapshot> {
    let common = CommonOddsSet::from_books(found.values().map(|f| &f.quotes));
    if common.is_empty() {
        return None;
    }

    let sources: BTreeMap<SourceId, SourceQuotes> = found
        .iter()
        .map(|(&source, f)| {
            let quotes = SourceQuotes {
                league_name: f.key.league.clone(),
                home_team: f.key.home.clone(),
                away_team: f.key.away.clone(),
                odds: common.filter(&f.quotes),
            };
            (source, quotes)
        })
        .collect();

    let index = sources
        .get(&index_source)
        .map(|q| margin_index(&q.odds))
        .unwrap_or_default();
    let designated = found.get(&index_source).copied();
    let key = &canonical.key;

    Some(MatchSnapshot {
        match_name: match_name(&key.league, &key.home, &key.away, start_time),
        start_time_beijing: start_time.to_string(),
        league_name: key.league.clone(),
        home_team: key.home.clone(),
        away_team: key.away.clone(),
        minutes_to_start: clock::minutes_until(start_time, now),
        event_id: designated.and_then(|f| f.event_id),
        line_id: designated.and_then(|f| f.line_id),
        league_id: designated.and_then(|f| f.league_id),
        margin_index: index.spread,
        is_margin_189: index.is_spread_189,
        total_margin_index: index.total,
        is_total_margin_189: index.is_total_189,
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::BindingRow;
    use crate::types::{MarketKind, Side};
    use serde_json::json;

    fn feeds() -> BTreeMap<SourceId, Value> {
        BTreeMap::from([
            (
                1,
                json!([{
                    "league_name": "ENG Premier",
                    "home_team": "Gunners",
                    "away_team": "Blues",
                    "odds": {
                        "spreads": {"-0.5": {"home": "0.90", "away": "-0.98"}, "+0.5": {"away": "-1.00"}},
                        "totals": {"2.5": {"over": "0.91"}}
                    }
                }]),
            ),
            (
                2,
                json!([{
                    "league_name": "England - Premier League",
                    "home_team": "Arsenal FC",
                    "away_team": "Chelsea FC",
                    "start_time_beijing": "2025-03-01 19:30:00",
                    "event_id": 42,
                    "odds": {
                        "spreads": {"-0.5": {"home": 0.94}, "0.5": {"away": -1.05}},
                        "totals": {"2.5": {"over": 0.88, "under": 0.98}}
                    }
                }]),
            ),
            (
                3,
                json!([
                    {
                        "league_name": "EPL",
                        "home_team": "Arsenal",
                        "away_team": "Chelsea",
                        "start_time_beijing": "2025-03-01 19:30:00",
                        "odds": {
                            "spreads": {"-0.5": {"home": 0.93}, "0.5": {"away": -1.02}},
                            "totals": {"2.5": {"over": 0.9, "under": 0.95}}
                        }
                    },
                    {
                        "league_name": "EPL",
                        "home_team": "Spurs",
                        "away_team": "Everton",
                        "start_time_beijing": "2025-03-01 22:00:00",
                        "odds": {"spreads": {"0": {"home": 0.9}}}
                    }
                ]),
            ),
        ])
    }

    async fn seeded_store() -> OddsStore {
        let store = OddsStore::in_memory().await.unwrap();
        store
            .insert_binding(&BindingRow {
                source1_league: Some("ENG Premier".to_string()),
                source1_home_team: Some("Gunners".to_string()),
                source1_away_team: Some("Blues".to_string()),
                source2_league: Some("England - Premier League".to_string()),
                source2_home_team: Some("Arsenal FC".to_string()),
                source2_away_team: Some("Chelsea FC".to_string()),
                source3_league: Some("EPL".to_string()),
                source3_home_team: Some("Arsenal".to_string()),
                source3_away_team: Some("Chelsea".to_string()),
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn reconciles_three_sources_into_one_match() {
        let store = seeded_store().await;
        let now = clock::parse_beijing("2025-03-01 18:00:00").unwrap();
        let (matches, stats) = reconcile(&store, 3, 2, feeds(), now).await.unwrap();

        assert_eq!(stats.canonical_fixtures, 2);
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.no_team_mapping, 1);
        assert_eq!(matches.len(), 1);

        let m = &matches[0];
        assert_eq!(m.match_name, "EPL - Arsenal vs Chelsea-2025-03-01 19:30:00");
        assert_eq!(m.minutes_to_start, Some(90));
        assert_eq!(m.event_id, Some(42));
        assert_eq!(m.sources[&1].home_team, "Gunners");

        // Only the tuples every source prices survive.
        for quotes in m.sources.values() {
            let q = quotes.odds.quotes();
            assert_eq!(q.len(), 3, "source {} {:?}", quotes.league_name, q);
            assert!(quotes.odds.price(MarketKind::Total, "2.5", Side::Under).is_none());
        }
        // Designated source: 0.94 @ -0.5 against -1.05 @ +0.5.
        assert_eq!(m.margin_index, Some(189.0));
        assert!(m.is_margin_189);
        assert_eq!(m.total_margin_index, None);
    }

    #[tokio::test]
    async fn missing_canonical_feed_is_an_error() {
        let store = OddsStore::in_memory().await.unwrap();
        let mut f = feeds();
        f.remove(&3);
        let now = clock::now_beijing();
        assert!(reconcile(&store, 3, 2, f, now).await.is_err());
    }

    #[tokio::test]
    async fn no_bindings_means_no_matches() {
        let store = OddsStore::in_memory().await.unwrap();
        let now = clock::now_beijing();
        let (matches, stats) = reconcile(&store, 3, 2, feeds(), now).await.unwrap();
        assert!(matches.is_empty());
        assert_eq!(stats.no_team_mapping, 2);
    }
}
