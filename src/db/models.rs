//! Row types for the tables in `migrations/`. Used with runtime-checked `sqlx::query_as`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{PointWarning, SourceId, WarningHeader};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BindingRow {
    pub source1_league: Option<String>,
    pub source1_home_team: Option<String>,
    pub source1_away_team: Option<String>,
    pub source2_league: Option<String>,
    pub source2_home_team: Option<String>,
    pub source2_away_team: Option<String>,
    pub source3_league: Option<String>,
    pub source3_home_team: Option<String>,
    pub source3_away_team: Option<String>,
}

/// One source's columns of a binding row; blank text reads as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingNames<'a> {
    pub league: Option<&'a str>,
    pub home: Option<&'a str>,
    pub away: Option<&'a str>,
}

impl BindingRow {
    pub fn names(&self, source: SourceId) -> BindingNames<'_> {
        let (league, home, away) = match source {
            1 => (&self.source1_league, &self.source1_home_team, &self.source1_away_team),
            2 => (&self.source2_league, &self.source2_home_team, &self.source2_away_team),
            3 => (&self.source3_league, &self.source3_home_team, &self.source3_away_team),
            _ => return BindingNames::default(),
        };
        BindingNames { league: non_blank(league), home: non_blank(home), away: non_blank(away) }
    }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Column holding a source's league name in `bindings`.
pub fn binding_league_column(source: SourceId) -> Option<&'static str> {
    match source {
        1 => Some("source1_league"),
        2 => Some("source2_league"),
        3 => Some("source3_league"),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MatchRow {
    pub id: i64,
    pub match_name: String,
    pub start_time_beijing: String,
    pub league_name: String,
    pub home_team: String,
    pub away_team: String,
    pub minutes_to_start: Option<i64>,
    pub event_id: Option<i64>,
    pub line_id: Option<i64>,
    pub league_id: Option<i64>,
    pub full_time: Option<String>,
    pub half_time: Option<String>,
    pub result_value: Option<String>,
    pub margin_index: Option<f64>,
    pub is_margin_189: bool,
    pub total_margin_index: Option<f64>,
    pub is_total_margin_189: bool,
    pub updated_at: i64,
}

/// A single stored price, time-ordered within one (match, market, line, side, source).
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct OddsPoint {
    pub price: f64,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LineRow {
    pub line_value: String,
    pub side: String,
}

/// History row across all sources of one match and market.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct QuoteRow {
    pub source: i64,
    pub line_value: String,
    pub side: String,
    pub price: f64,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PointWarningRow {
    pub match_name: String,
    pub start_time_beijing: String,
    pub market: String,
    pub line_value: String,
    pub side: String,
    pub warning_time: String,
    pub sources: String,
    pub league_name: String,
    pub home_team: String,
    pub away_team: String,
    pub result_value: String,
    pub time_window: i64,
    pub drop_points: f64,
    pub threshold_points: f64,
    pub previous_odds: f64,
    pub current_odds: f64,
}

impl PointWarningRow {
    /// `Ok(None)` for an unknown market or side; unreadable `sources` JSON is an error.
    pub fn into_warning(self) -> Result<Option<PointWarning>> {
        let sources: Vec<SourceId> = serde_json::from_str(&self.sources)?;
        let (Ok(market), Ok(side)) = (self.market.parse(), self.side.parse()) else {
            return Ok(None);
        };
        Ok(Some(PointWarning {
            header: WarningHeader {
                match_name: self.match_name,
                start_time_beijing: self.start_time_beijing,
                market,
                value: self.line_value,
                side,
                warning_time: self.warning_time,
                sources,
                league_name: self.league_name,
                home_team: self.home_team,
                away_team: self.away_team,
                result_value: self.result_value,
            },
            time_window: self.time_window,
            drop_points: self.drop_points,
            threshold_points: self.threshold_points,
            previous_odds: self.previous_odds,
            current_odds: self.current_odds,
        }))
    }
}
