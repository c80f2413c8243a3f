//! Response shapes for the query API and the pure helpers that build them from stored rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock;
use crate::db::models::{MatchRow, OddsPoint, QuoteRow};
use crate::detector::dedupe_consecutive;
use crate::types::{CachedWarning, PointWarning, SourceId, TrendWarning};

// ---------------------------------------------------------------------------
// Odds history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsRecord {
    pub source: SourceId,
    pub odds: f64,
    pub time: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub status: &'static str,
    pub data: Vec<OddsRecord>,
}

/// Deduped history of one source, newest first, at most `limit` records.
pub fn history_records(source: SourceId, history: Vec<OddsPoint>, limit: usize) -> Vec<OddsRecord> {
    dedupe_consecutive(history)
        .into_iter()
        .rev()
        .take(limit)
        .map(|p| OddsRecord { source, odds: p.price, time: clock::format_ms(p.recorded_at) })
        .collect()
}

// ---------------------------------------------------------------------------
// Daily / upcoming dumps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePoint {
    pub odds: f64,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineHistory {
    pub line_value: String,
    pub side: String,
    pub sources: BTreeMap<SourceId, Vec<PricePoint>>,
}

#[derive(Debug, Serialize)]
pub struct MatchOdds {
    pub match_id: i64,
    pub match_name: String,
    pub league_name: String,
    pub home_team: String,
    pub away_team: String,
    pub start_time_beijing: String,
    pub full_time: Option<String>,
    pub half_time: Option<String>,
    pub spread_odds: Vec<LineHistory>,
    pub total_odds: Vec<LineHistory>,
}

impl MatchOdds {
    pub fn new(m: MatchRow, spread_odds: Vec<LineHistory>, total_odds: Vec<LineHistory>) -> Self {
        Self {
            match_id: m.id,
            match_name: m.match_name,
            league_name: m.league_name,
            home_team: m.home_team,
            away_team: m.away_team,
            start_time_beijing: m.start_time_beijing,
            full_time: m.full_time,
            half_time: m.half_time,
            spread_odds,
            total_odds,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DailyOddsResponse {
    pub status: &'static str,
    pub start_date: String,
    pub end_date: String,
    pub count: usize,
    pub data: Vec<MatchOdds>,
}

/// Groups quote rows by (line, side), then by source, deduping each source's series.
///
/// Rows must be time-ascending within each (line, side, source).
pub fn group_lines(rows: Vec<QuoteRow>) -> Vec<LineHistory> {
    let mut grouped: BTreeMap<(String, String), BTreeMap<SourceId, Vec<OddsPoint>>> = BTreeMap::new();
    for r in rows {
        let Ok(source) = SourceId::try_from(r.source) else {
            continue;
        };
        grouped
            .entry((r.line_value, r.side))
            .or_default()
            .entry(source)
            .or_default()
            .push(OddsPoint { price: r.price, recorded_at: r.recorded_at });
    }

    grouped
        .into_iter()
        .map(|((line_value, side), by_source)| LineHistory {
            line_value,
            side,
            sources: by_source
                .into_iter()
                .map(|(source, series)| {
                    let points = dedupe_consecutive(series)
                        .into_iter()
                        .map(|p| PricePoint { odds: p.price, time: clock::format_ms(p.recorded_at) })
                        .collect();
                    (source, points)
                })
                .collect(),
        })
        .collect()
}

/// Parses a `1,2,3` source list. Blank input means "no filter".
pub fn parse_source_filter(raw: Option<&str>) -> Option<Vec<SourceId>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return Some(Vec::new());
    }
    raw.split(',')
        .map(|s| s.trim().parse::<SourceId>().ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Both warning kinds, newest `warning_time` first.
pub fn merge_warnings(trend: Vec<TrendWarning>, point: Vec<PointWarning>) -> Vec<CachedWarning> {
    let mut all: Vec<CachedWarning> = trend
        .into_iter()
        .map(CachedWarning::Trend)
        .chain(point.into_iter().map(CachedWarning::Point))
        .collect();
    all.sort_by(|a, b| b.warning_time().cmp(a.warning_time()));
    all
}

// ---------------------------------------------------------------------------
// Match start-time lookup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartTimeQuery {
    pub league_name: Option<String>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub order_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTimeStatus {
    Success,
    MultipleMatches,
    NotFound,
    InvalidParams,
    InvalidTimeFormat,
    Error,
}

#[derive(Debug, Serialize)]
pub struct StartTimeResult {
    #[serde(flatten)]
    pub query: StartTimeQuery,
    pub match_start_time: Option<String>,
    pub status: StartTimeStatus,
}

/// Earliest candidate wins; more than one candidate is flagged but still answered.
pub fn start_time_outcome(candidates: Vec<String>) -> (Option<String>, StartTimeStatus) {
    let status = match candidates.len() {
        0 => StartTimeStatus::NotFound,
        1 => StartTimeStatus::Success,
        _ => StartTimeStatus::MultipleMatches,
    };
    (candidates.into_iter().next(), status)
}

#[derive(Debug, Serialize)]
pub struct StartTimeResponse {
    pub status: &'static str,
    pub results: Vec<StartTimeResult>,
}

// ---------------------------------------------------------------------------
// Misc request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MatchResultUpdate {
    pub match_name: String,
    pub start_time_beijing: String,
    pub full_time: Option<String>,
    pub half_time: Option<String>,
    pub result_value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MatchSummary {
    pub id: i64,
    pub match_name: String,
    pub start_time_beijing: String,
}

#[derive(Debug, Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}
