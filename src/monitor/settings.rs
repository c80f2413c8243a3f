use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tracing::info;

use crate::config::MONITOR_HORIZON_HOURS;
use crate::error::{AppError, Result};
use crate::types::SourceId;

/// Runtime-tunable monitor options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Seconds between monitor cycles.
    pub check_interval: u64,
    /// Strictly decreasing steps Detector A requires per source.
    pub consecutive_decreases: usize,
    /// Hours from now before a match enters the monitor window.
    pub time_window: i64,
    /// Detector A switch.
    pub enabled: bool,
    pub min_odds: f64,
    pub max_odds: f64,
    pub required_sources: Vec<SourceId>,
    pub threshold_189: f64,
    /// Detector B switch.
    pub point_monitor_enabled: bool,
    pub point_check_minutes: i64,
    pub point_threshold: f64,
    pub point_monitor_sources: Vec<SourceId>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: 5,
            consecutive_decreases: 1,
            time_window: 2,
            enabled: false,
            min_odds: 0.8,
            max_odds: -0.85,
            required_sources: vec![1, 2],
            threshold_189: 188.0,
            point_monitor_enabled: false,
            point_check_minutes: 30,
            point_threshold: 30.0,
            point_monitor_sources: vec![1],
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorSettingsUpdate {
    pub check_interval: Option<u64>,
    pub consecutive_decreases: Option<usize>,
    pub time_window: Option<i64>,
    pub enabled: Option<bool>,
    pub min_odds: Option<f64>,
    pub max_odds: Option<f64>,
    pub required_sources: Option<Vec<SourceId>>,
    pub threshold_189: Option<f64>,
    pub point_monitor_enabled: Option<bool>,
    pub point_check_minutes: Option<i64>,
    pub point_threshold: Option<f64>,
    pub point_monitor_sources: Option<Vec<SourceId>>,
}

impl MonitorSettingsUpdate {
    /// True when the update switches either detector on.
    pub fn enables_detector(&self) -> bool {
        self.enabled == Some(true) || self.point_monitor_enabled == Some(true)
    }
}

impl MonitorSettings {
    /// Applies `update` atomically: on a validation error nothing changes.
    pub fn apply(&mut self, update: MonitorSettingsUpdate, known_sources: &[SourceId]) -> Result<()> {
        let mut next = self.clone();
        macro_rules! take {
            ($($field:ident),*) => {
                $(if let Some(v) = update.$field { next.$field = v; })*
            };
        }
        take!(
            check_interval,
            consecutive_decreases,
            time_window,
            enabled,
            min_odds,
            max_odds,
            required_sources,
            threshold_189,
            point_monitor_enabled,
            point_check_minutes,
            point_threshold,
            point_monitor_sources
        );
        next.validate(known_sources)?;
        *self = next;
        Ok(())
    }

    pub fn validate(&self, known_sources: &[SourceId]) -> Result<()> {
        let bad = |msg: String| Err(AppError::BadRequest(msg));
        if self.check_interval == 0 {
            return bad("check_interval must be at least 1 second".to_string());
        }
        if self.consecutive_decreases == 0 {
            return bad("consecutive_decreases must be at least 1".to_string());
        }
        if !(0..MONITOR_HORIZON_HOURS).contains(&self.time_window) {
            return bad(format!("time_window must be in 0..{MONITOR_HORIZON_HOURS} hours"));
        }
        if self.point_check_minutes <= 0 {
            return bad("point_check_minutes must be positive".to_string());
        }
        for (name, v) in [
            ("min_odds", self.min_odds),
            ("max_odds", self.max_odds),
            ("threshold_189", self.threshold_189),
            ("point_threshold", self.point_threshold),
        ] {
            if !v.is_finite() {
                return bad(format!("{name} must be a finite number"));
            }
        }
        for (name, list) in [
            ("required_sources", &self.required_sources),
            ("point_monitor_sources", &self.point_monitor_sources),
        ] {
            if list.is_empty() {
                return bad(format!("{name} must not be empty"));
            }
            if let Some(s) = list.iter().find(|s| !known_sources.contains(s)) {
                return bad(format!("{name} contains unknown source {s}"));
            }
        }
        Ok(())
    }
}

/// Shared settings plus a wake-up signal for the monitor loop.
pub struct MonitorHandle {
    settings: RwLock<MonitorSettings>,
    wake: Notify,
    known_sources: Vec<SourceId>,
}

impl MonitorHandle {
    pub fn new(settings: MonitorSettings, known_sources: Vec<SourceId>) -> Self {
        Self { settings: RwLock::new(settings), wake: Notify::new(), known_sources }
    }

    pub async fn get(&self) -> MonitorSettings {
        self.settings.read().await.clone()
    }

    pub async fn update(&self, update: MonitorSettingsUpdate) -> Result<MonitorSettings> {
        let wake = update.enables_detector();
        let current = {
            let mut guard = self.settings.write().await;
            guard.apply(update, &self.known_sources)?;
            guard.clone()
        };
        info!(
            event = "MONITOR_CONFIG",
            enabled = current.enabled,
            point_enabled = current.point_monitor_enabled,
            "MONITOR | settings updated"
        );
        if wake {
            self.wake.notify_one();
        }
        Ok(current)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<MonitorSettings> {
        self.update(MonitorSettingsUpdate { enabled: Some(enabled), ..Default::default() })
            .await
    }

    pub async fn set_point_enabled(&self, enabled: bool) -> Result<MonitorSettings> {
        self.update(MonitorSettingsUpdate {
            point_monitor_enabled: Some(enabled),
            ..Default::default()
        })
        .await
    }

    /// Resolves when a detector was switched on since the last wait.
    pub async fn woken(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn partial_update_keeps_other_fields() {
        let mut s = MonitorSettings::default();
        let update: MonitorSettingsUpdate =
            serde_json::from_str(r#"{"threshold_189": 150.0, "unknown": 1}"#).unwrap();
        s.apply(update, &[1, 2, 3]).unwrap();
        assert_eq!(s.threshold_189, 150.0);
        assert_eq!(s.required_sources, vec![1, 2]);
        assert_eq!(s.check_interval, 5);
    }

    #[test]
    fn invalid_update_changes_nothing() {
        let mut s = MonitorSettings::default();
        let update = MonitorSettingsUpdate {
            threshold_189: Some(150.0),
            required_sources: Some(vec![7]),
            ..Default::default()
        };
        assert!(matches!(s.apply(update, &[1, 2, 3]), Err(AppError::BadRequest(_))));
        assert_eq!(s, MonitorSettings::default());

        let zero = MonitorSettingsUpdate { consecutive_decreases: Some(0), ..Default::default() };
        assert!(s.apply(zero, &[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn enabling_wakes_the_loop() {
        let handle = MonitorHandle::new(MonitorSettings::default(), vec![1, 2, 3]);
        let s = handle.set_point_enabled(true).await.unwrap();
        assert!(s.point_monitor_enabled);
        // The permit was stored before anyone waited.
        tokio::time::timeout(Duration::from_secs(1), handle.woken())
            .await
            .unwrap();
    }
}
