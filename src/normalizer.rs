use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tracing::debug;

use crate::clock::normalize_start_time;
use crate::odds::{clean_line, parse_price};
use crate::types::{Fixture, FixtureKey, MarketKind, QuoteBook, Side, SourceId};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NormalizeStats {
    pub feed_total: usize,
    pub rejected_not_object: usize,
    pub rejected_missing_names: usize,
    pub duplicate_keys: usize,
    pub invalid_lines: usize,
    /// Sides present in the feed whose price could not be parsed (treated as absent).
    pub absent_prices: usize,
    pub fixtures: usize,
}

enum Rejection {
    NotObject,
    MissingNames,
}

/// Converts one source's raw feed into canonical fixtures.
pub fn normalize_feed(source: SourceId, feed: &Value) -> (Vec<Fixture>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let items: &[Value] = feed.as_array().map(Vec::as_slice).unwrap_or(&[]);
    stats.feed_total = items.len();

    let mut fixtures = Vec::with_capacity(items.len());
    for item in items {
        match parse_fixture(source, item, &mut stats) {
            Ok(fixture) => fixtures.push(fixture),
            Err(Rejection::NotObject) => stats.rejected_not_object += 1,
            Err(Rejection::MissingNames) => stats.rejected_missing_names += 1,
        }
    }
    stats.fixtures = fixtures.len();
    (fixtures, stats)
}

fn parse_fixture(
    source: SourceId,
    item: &Value,
    stats: &mut NormalizeStats,
) -> Result<Fixture, Rejection> {
    if !item.is_object() {
        return Err(Rejection::NotObject);
    }
    let league = text_field(item, &["league_name", "league"]).ok_or(Rejection::MissingNames)?;
    let home = text_field(item, &["home_team"]).ok_or(Rejection::MissingNames)?;
    let away = text_field(item, &["away_team"]).ok_or(Rejection::MissingNames)?;

    let start_time = text_field(item, &["start_time_beijing", "time", "match_time"])
        .and_then(|raw| normalize_start_time(&raw));

    let mut quotes = QuoteBook::default();
    if let Some(odds) = item.get("odds") {
        read_market(odds.get("spreads"), MarketKind::Spread, &mut quotes, stats);
        read_market(odds.get("totals"), MarketKind::Total, &mut quotes, stats);
    }

    Ok(Fixture {
        source,
        key: FixtureKey { league, home, away },
        start_time,
        event_id: int_field(item, "event_id"),
        line_id: int_field(item, "line_id"),
        league_id: int_field(item, "league_id"),
        quotes,
    })
}

fn read_market(
    lines: Option<&Value>,
    market: MarketKind,
    quotes: &mut QuoteBook,
    stats: &mut NormalizeStats,
) {
    let Some(lines) = lines.and_then(Value::as_object) else {
        return;
    };
    for (raw_line, sides) in lines {
        let Some(line) = clean_line(raw_line) else {
            stats.invalid_lines += 1;
            continue;
        };
        let Some(sides) = sides.as_object() else {
            continue;
        };
        for side in market.sides() {
            let Some(raw_price) = sides.get(&side.to_string()) else {
                continue;
            };
            match parse_price(raw_price) {
                Some(price) => {
                    quotes.insert(market, &line, side, price);
                }
                None => stats.absent_prices += 1,
            }
        }
    }
}

fn text_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn int_field(item: &Value, key: &str) -> Option<i64> {
    match item.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// SourceIndex
// ---------------------------------------------------------------------------

/// Per-source lookup keyed by `(league, home, away)`. Built fresh each cycle.
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    source: SourceId,
    fixtures: HashMap<FixtureKey, Fixture>,
}

impl SourceIndex {
    /// Builds the index; on duplicate keys the first fixture wins. Returns the duplicate count.
    pub fn build(source: SourceId, fixtures: Vec<Fixture>) -> (Self, usize) {
        let mut map = HashMap::with_capacity(fixtures.len());
        let mut duplicates = 0;
        for fixture in fixtures {
            if map.contains_key(&fixture.key) {
                debug!(source, fixture = %fixture.key, "Duplicate fixture key in feed, keeping first");
                duplicates += 1;
                continue;
            }
            map.insert(fixture.key.clone(), fixture);
        }
        (Self { source, fixtures: map }, duplicates)
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn get(&self, key: &FixtureKey) -> Option<&Fixture> {
        self.fixtures.get(key)
    }

    pub fn leagues(&self) -> BTreeSet<String> {
        self.fixtures.keys().map(|k| k.league.clone()).collect()
    }

    pub fn fixtures(&self) -> impl Iterator<Item = &Fixture> {
        self.fixtures.values()
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

/// Normalizes and indexes one source's feed in a single step.
pub fn index_feed(source: SourceId, feed: &Value) -> (SourceIndex, NormalizeStats) {
    let (fixtures, mut stats) = normalize_feed(source, feed);
    let (index, duplicates) = SourceIndex::build(source, fixtures);
    stats.duplicate_keys = duplicates;
    (index, stats)
}

pub fn side_of(market: MarketKind, raw: &str) -> Option<Side> {
    let side: Side = raw.parse().ok()?;
    (side.market() == market).then_some(side)
}
