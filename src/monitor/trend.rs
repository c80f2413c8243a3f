//! Detector logic over stored quote history. History slices are time-ascending, as returned by
//! the store.

use std::collections::BTreeMap;

use crate::db::models::{MatchRow, OddsPoint};
use crate::detector::line_index;
use crate::monitor::settings::MonitorSettings;
use crate::odds::{decimal, points};
use crate::types::{MarketKind, PointWarning, QuoteBook, Side, SourceId, TrendWarning, WarningHeader};

/// True when the newest `steps + 1` quotes fall strictly in decimal terms at every step.
pub fn consecutive_decrease(history: &[OddsPoint], steps: usize) -> bool {
    if steps == 0 || history.len() < steps + 1 {
        return false;
    }
    history[history.len() - steps - 1..]
        .windows(2)
        .all(|w| decimal(w[1].price) < decimal(w[0].price))
}

/// Positive prices must reach `min_odds`, negative prices must not exceed `max_odds`.
pub fn in_range(price: f64, min_odds: f64, max_odds: f64) -> bool {
    if price >= 0.0 {
        price >= min_odds
    } else {
        price <= max_odds
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointDrop {
    pub previous: f64,
    pub current: f64,
    pub drop: f64,
}

/// Latest quote against the most recent quote recorded at or before `boundary_ms`.
pub fn point_drop(history: &[OddsPoint], boundary_ms: i64) -> Option<PointDrop> {
    if history.len() < 2 {
        return None;
    }
    let current = history.last()?.price;
    let previous = history.iter().rev().find(|p| p.recorded_at <= boundary_ms)?.price;
    Some(PointDrop { previous, current, drop: points(previous, current) })
}

/// Where a candidate warning sits: the match and the quoted (market, line, side).
pub struct LineContext<'a> {
    pub m: &'a MatchRow,
    pub market: MarketKind,
    pub line: &'a str,
    pub side: Side,
    pub warning_time: &'a str,
}

impl LineContext<'_> {
    fn header(&self, sources: Vec<SourceId>, result_value: String) -> WarningHeader {
        WarningHeader {
            match_name: self.m.match_name.clone(),
            start_time_beijing: self.m.start_time_beijing.clone(),
            market: self.market,
            value: self.line.to_string(),
            side: self.side,
            warning_time: self.warning_time.to_string(),
            sources,
            league_name: self.m.league_name.clone(),
            home_team: self.m.home_team.clone(),
            away_team: self.m.away_team.clone(),
            result_value,
        }
    }
}

/// Detector A for one line: every required source decreasing, the designated source's latest
/// price in range, and the line's index at or above the threshold.
pub fn detect_trend(
    ctx: &LineContext<'_>,
    settings: &MonitorSettings,
    history: &BTreeMap<SourceId, Vec<OddsPoint>>,
    index_book: &QuoteBook,
    index_source: SourceId,
) -> Option<TrendWarning> {
    if settings.required_sources.is_empty() {
        return None;
    }
    let all_decreasing = settings.required_sources.iter().all(|s| {
        history
            .get(s)
            .is_some_and(|h| consecutive_decrease(h, settings.consecutive_decreases))
    });
    if !all_decreasing {
        return None;
    }

    let latest = history.get(&index_source)?.last()?.price;
    if !in_range(latest, settings.min_odds, settings.max_odds) {
        return None;
    }

    let index = line_index(index_book, ctx.market, ctx.line, ctx.side)?;
    if index < settings.threshold_189 {
        return None;
    }

    Some(TrendWarning {
        header: ctx.header(settings.required_sources.clone(), index.to_string()),
        line_index: index,
    })
}

/// Detector B for one source: a drop of at least `point_threshold` points over the window.
pub fn detect_point_drop(
    ctx: &LineContext<'_>,
    settings: &MonitorSettings,
    source: SourceId,
    history: &[OddsPoint],
    boundary_ms: i64,
) -> Option<PointWarning> {
    let d = point_drop(history, boundary_ms)?;
    if d.drop < settings.point_threshold {
        return None;
    }
    Some(PointWarning {
        header: ctx.header(vec![source], format!("drop {:.1}", d.drop)),
        time_window: settings.point_check_minutes,
        drop_points: d.drop,
        threshold_points: settings.point_threshold,
        previous_odds: d.previous,
        current_odds: d.current,
    })
}
