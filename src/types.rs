use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Feed identifier (1, 2, 3 in the default deployment).
pub type SourceId = u8;

// ---------------------------------------------------------------------------
// Markets and sides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Spread,
    Total,
}

impl MarketKind {
    pub const ALL: [MarketKind; 2] = [MarketKind::Spread, MarketKind::Total];

    /// Quote table holding this market's history.
    pub fn table(&self) -> &'static str {
        match self {
            MarketKind::Spread => "spread_odds",
            MarketKind::Total => "total_odds",
        }
    }

    pub fn sides(&self) -> [Side; 2] {
        match self {
            MarketKind::Spread => [Side::Home, Side::Away],
            MarketKind::Total => [Side::Over, Side::Under],
        }
    }
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketKind::Spread => "spread",
            MarketKind::Total => "total",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MarketKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "spread" => Ok(MarketKind::Spread),
            "total" => Ok(MarketKind::Total),
            other => Err(format!("unknown market '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
    Over,
    Under,
}

impl Side {
    pub fn market(&self) -> MarketKind {
        match self {
            Side::Home | Side::Away => MarketKind::Spread,
            Side::Over | Side::Under => MarketKind::Total,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
            Side::Over => Side::Under,
            Side::Under => Side::Over,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Side::Home => "home",
            Side::Away => "away",
            Side::Over => "over",
            Side::Under => "under",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "home" => Ok(Side::Home),
            "away" => Ok(Side::Away),
            "over" => Ok(Side::Over),
            "under" => Ok(Side::Under),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical quote book
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpreadLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub away: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub under: Option<f64>,
}

/// A single priced (market, line, side).
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub market: MarketKind,
    pub line: String,
    pub side: Side,
    pub price: f64,
}

/// One source's prices for one fixture. Line keys are canonical text (see `odds::format_line`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteBook {
    pub spreads: BTreeMap<String, SpreadLine>,
    pub totals: BTreeMap<String, TotalLine>,
}

impl QuoteBook {
    pub fn price(&self, market: MarketKind, line: &str, side: Side) -> Option<f64> {
        match (market, side) {
            (MarketKind::Spread, Side::Home) => self.spreads.get(line)?.home,
            (MarketKind::Spread, Side::Away) => self.spreads.get(line)?.away,
            (MarketKind::Total, Side::Over) => self.totals.get(line)?.over,
            (MarketKind::Total, Side::Under) => self.totals.get(line)?.under,
            _ => None,
        }
    }

    /// Sets a price. Returns false when the side does not belong to the market.
    pub fn insert(&mut self, market: MarketKind, line: &str, side: Side, price: f64) -> bool {
        match (market, side) {
            (MarketKind::Spread, Side::Home) => {
                self.spreads.entry(line.to_string()).or_default().home = Some(price)
            }
            (MarketKind::Spread, Side::Away) => {
                self.spreads.entry(line.to_string()).or_default().away = Some(price)
            }
            (MarketKind::Total, Side::Over) => {
                self.totals.entry(line.to_string()).or_default().over = Some(price)
            }
            (MarketKind::Total, Side::Under) => {
                self.totals.entry(line.to_string()).or_default().under = Some(price)
            }
            _ => return false,
        }
        true
    }

    /// Every present price, spreads first, in line order.
    pub fn quotes(&self) -> Vec<Quote> {
        let mut out = Vec::new();
        for (line, l) in &self.spreads {
            push_quote(&mut out, MarketKind::Spread, line, Side::Home, l.home);
            push_quote(&mut out, MarketKind::Spread, line, Side::Away, l.away);
        }
        for (line, l) in &self.totals {
            push_quote(&mut out, MarketKind::Total, line, Side::Over, l.over);
            push_quote(&mut out, MarketKind::Total, line, Side::Under, l.under);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.spreads.is_empty() && self.totals.is_empty()
    }

    /// Copy keeping only the prices accepted by `keep`; lines left without prices are dropped.
    pub fn filtered<F>(&self, mut keep: F) -> QuoteBook
    where
        F: FnMut(MarketKind, &str, Side) -> bool,
    {
        let mut out = QuoteBook::default();
        for q in self.quotes() {
            if keep(q.market, &q.line, q.side) {
                out.insert(q.market, &q.line, q.side, q.price);
            }
        }
        out
    }
}

fn push_quote(out: &mut Vec<Quote>, market: MarketKind, line: &str, side: Side, price: Option<f64>) {
    if let Some(price) = price {
        out.push(Quote { market, line: line.to_string(), side, price });
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FixtureKey {
    pub league: String,
    pub home: String,
    pub away: String,
}

impl FixtureKey {
    pub fn new(league: &str, home: &str, away: &str) -> Self {
        Self { league: league.to_string(), home: home.to_string(), away: away.to_string() }
    }
}

impl std::fmt::Display for FixtureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {} vs {}", self.league, self.home, self.away)
    }
}

/// One source's view of a fixture after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub source: SourceId,
    pub key: FixtureKey,
    /// Canonical `YYYY-MM-DD HH:MM:SS` Beijing time when the feed carries one.
    pub start_time: Option<String>,
    pub event_id: Option<i64>,
    pub line_id: Option<i64>,
    pub league_id: Option<i64>,
    pub quotes: QuoteBook,
}

// ---------------------------------------------------------------------------
// Matched fixtures: persisted, cached and broadcast
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceQuotes {
    pub league_name: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(flatten)]
    pub odds: QuoteBook,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSnapshot {
    pub match_name: String,
    pub start_time_beijing: String,
    pub league_name: String,
    pub home_team: String,
    pub away_team: String,
    pub minutes_to_start: Option<i64>,
    pub event_id: Option<i64>,
    pub line_id: Option<i64>,
    pub league_id: Option<i64>,
    pub margin_index: Option<f64>,
    pub is_margin_189: bool,
    pub total_margin_index: Option<f64>,
    pub is_total_margin_189: bool,
    /// Filtered quotes per source, restricted to the common odds set.
    pub sources: BTreeMap<SourceId, SourceQuotes>,
}

impl MatchSnapshot {
    pub fn identity(&self) -> String {
        format!("{}|{}", self.match_name, self.start_time_beijing)
    }
}

pub fn match_name(league: &str, home: &str, away: &str, start_time: &str) -> String {
    format!("{league} - {home} vs {away}-{start_time}")
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastPayload {
    pub timestamp: String,
    pub matches: Vec<MatchSnapshot>,
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarningHeader {
    pub match_name: String,
    pub start_time_beijing: String,
    #[serde(rename = "type")]
    pub market: MarketKind,
    pub value: String,
    pub side: Side,
    pub warning_time: String,
    pub sources: Vec<SourceId>,
    pub league_name: String,
    pub home_team: String,
    pub away_team: String,
    pub result_value: String,
}

/// Consecutive-decrease alert. Lives only in the monitor's ephemeral cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendWarning {
    #[serde(flatten)]
    pub header: WarningHeader,
    pub line_index: f64,
}

/// Point-drop alert. Persisted once per (match, market, line, side, first source).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointWarning {
    #[serde(flatten)]
    pub header: WarningHeader,
    /// Minutes looked back.
    pub time_window: i64,
    pub drop_points: f64,
    pub threshold_points: f64,
    pub previous_odds: f64,
    pub current_odds: f64,
}

/// Presentation-only merge of the two warning stores.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedWarning {
    Trend(TrendWarning),
    Point(PointWarning),
}

impl CachedWarning {
    pub fn warning_time(&self) -> &str {
        match self {
            CachedWarning::Trend(w) => &w.header.warning_time,
            CachedWarning::Point(w) => &w.header.warning_time,
        }
    }
}
