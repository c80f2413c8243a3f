pub mod fired;
pub mod settings;
pub mod trend;

pub use fired::{FiredKey, FiredWarningSet};
pub use settings::{MonitorHandle, MonitorSettings, MonitorSettingsUpdate};

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, error, info};

use crate::api::health::HealthState;
use crate::clock::{self, TIME_FORMAT};
use crate::config::{MONITOR_HORIZON_HOURS, MONITOR_IDLE_SECS};
use crate::db::OddsStore;
use crate::error::Result;
use crate::state::WarningCache;
use crate::types::{MarketKind, QuoteBook, SourceId};

use trend::{detect_point_drop, detect_trend, LineContext};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub matches: usize,
    pub lines: usize,
    pub trend_warnings: usize,
    pub point_new: usize,
    pub point_duplicate: usize,
    pub point_already_fired: usize,
}

/// Watches stored history of upcoming matches and raises trend and point-drop warnings.
pub struct TrendMonitor {
    store: OddsStore,
    handle: Arc<MonitorHandle>,
    warnings: Arc<WarningCache>,
    fired: Arc<FiredWarningSet>,
    health: Arc<HealthState>,
    index_source: SourceId,
}

impl TrendMonitor {
    pub fn new(
        store: OddsStore,
        handle: Arc<MonitorHandle>,
        warnings: Arc<WarningCache>,
        fired: Arc<FiredWarningSet>,
        health: Arc<HealthState>,
        index_source: SourceId,
    ) -> Self {
        Self { store, handle, warnings, fired, health, index_source }
    }

    pub async fn run(self) {
        info!(index_source = self.index_source, "TrendMonitor started");
        loop {
            let settings = self.handle.get().await;
            let pause = if !settings.enabled && !settings.point_monitor_enabled {
                self.warnings.clear().await;
                MONITOR_IDLE_SECS
            } else {
                let started = std::time::Instant::now();
                match self.check_cycle(&settings, clock::now_beijing(), clock::now_ms()).await {
                    Ok(report) => info!(
                        event = "MONITOR_CYCLE",
                        matches = report.matches,
                        lines = report.lines,
                        trend = report.trend_warnings,
                        point_new = report.point_new,
                        point_duplicate = report.point_duplicate,
                        point_already_fired = report.point_already_fired,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "MONITOR | {} matches, {} trend warnings, {} new point warnings",
                        report.matches,
                        report.trend_warnings,
                        report.point_new
                    ),
                    Err(e) => error!(error = %e, "Monitor cycle failed"),
                }
                settings.check_interval
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(pause)) => {}
                _ = self.handle.woken() => debug!("Monitor woken early"),
            }
        }
    }

    /// One pass over every match starting in `[now + time_window, now + horizon)`.
    pub async fn check_cycle(
        &self,
        settings: &MonitorSettings,
        now: NaiveDateTime,
        now_ms: i64,
    ) -> Result<CycleReport> {
        let from = (now + chrono::Duration::hours(settings.time_window))
            .format(TIME_FORMAT)
            .to_string();
        let to = (now + chrono::Duration::hours(MONITOR_HORIZON_HOURS))
            .format(TIME_FORMAT)
            .to_string();
        let warning_time = now.format(TIME_FORMAT).to_string();
        let boundary_ms = now_ms - settings.point_check_minutes * 60_000;

        let matches = self.store.matches_starting_in(&from, &to).await?;
        let mut report = CycleReport { matches: matches.len(), ..Default::default() };
        let mut trend_warnings = Vec::new();

        for m in &matches {
            let index_book = if settings.enabled {
                self.store.latest_book(m.id, self.index_source).await?
            } else {
                QuoteBook::default()
            };

            for market in MarketKind::ALL {
                for (line, side) in self.store.lines_for_match(m.id, market).await? {
                    report.lines += 1;
                    let history = self.store.history_by_source(m.id, market, &line, side).await?;
                    let ctx = LineContext { m, market, line: &line, side, warning_time: &warning_time };

                    if settings.enabled {
                        if let Some(w) =
                            detect_trend(&ctx, settings, &history, &index_book, self.index_source)
                        {
                            info!(
                                event = "TREND_WARNING",
                                match_name = %m.match_name,
                                market = %market,
                                line = %line,
                                side = %side,
                                index = w.line_index,
                                "TREND | {} {} {} {}",
                                m.match_name,
                                market,
                                line,
                                side
                            );
                            trend_warnings.push(w);
                        }
                    }

                    if !settings.point_monitor_enabled {
                        continue;
                    }
                    for &source in &settings.point_monitor_sources {
                        let Some(h) = history.get(&source) else {
                            continue;
                        };
                        let Some(w) = detect_point_drop(&ctx, settings, source, h, boundary_ms) else {
                            continue;
                        };
                        let key = FiredKey {
                            match_id: m.id,
                            market,
                            line: line.clone(),
                            side,
                            source,
                        };
                        if self.fired.contains(&key) {
                            report.point_already_fired += 1;
                            continue;
                        }
                        match self.store.insert_point_warning(&w).await {
                            Ok(fresh) => {
                                self.fired.insert(key);
                                if fresh {
                                    report.point_new += 1;
                                    info!(
                                        event = "POINT_WARNING",
                                        match_name = %m.match_name,
                                        market = %market,
                                        line = %line,
                                        side = %side,
                                        source,
                                        drop = w.drop_points,
                                        "POINT | {} {} {} {} {}",
                                        m.match_name,
                                        market,
                                        line,
                                        side,
                                        w.header.result_value
                                    );
                                } else {
                                    report.point_duplicate += 1;
                                }
                            }
                            Err(e) => error!(
                                match_name = %m.match_name,
                                error = %e,
                                "Point warning insert failed, will retry next cycle"
                            ),
                        }
                    }
                }
            }
        }

        report.trend_warnings = trend_warnings.len();
        if settings.enabled {
            self.warnings.replace(trend_warnings).await;
        } else {
            self.warnings.clear().await;
        }
        self.health.set_last_monitor_at_ms(now_ms);
        Ok(report)
    }
}
