use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, Method},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::LatencyStats;
use crate::api::views::{
    group_lines, history_records, merge_warnings, parse_source_filter, start_time_outcome,
    DailyOddsResponse, HistoryResponse, LatencyResponse, MatchOdds, MatchResultUpdate,
    MatchSummary, StartTimeQuery, StartTimeResponse, StartTimeResult, StartTimeStatus,
};
use crate::broadcast::PayloadRx;
use crate::clock::{self, TIME_FORMAT};
use crate::config::{HISTORY_LIMIT, POINT_WARNING_LOOKBACK_HOURS, UPCOMING_LOOKAHEAD_HOURS};
use crate::db::models::{BindingRow, MatchRow};
use crate::db::OddsStore;
use crate::detector::dedupe_consecutive;
use crate::error::AppError;
use crate::monitor::{MonitorHandle, MonitorSettings, MonitorSettingsUpdate};
use crate::normalizer::side_of;
use crate::odds::clean_line;
use crate::state::{MatchCache, WarningCache};
use crate::types::{BroadcastPayload, CachedWarning, MarketKind, Side, SourceId};

const DEBUG_SEARCH_LIMIT: i64 = 20;

#[derive(Clone)]
pub struct ApiState {
    pub store: OddsStore,
    pub cache: Arc<MatchCache>,
    pub warnings: Arc<WarningCache>,
    pub monitor: Arc<MonitorHandle>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub payload_rx: PayloadRx,
    /// Configured sources, ascending.
    pub sources: Vec<SourceId>,
    pub canonical_source: SourceId,
    pub index_source: SourceId,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/odds-history", get(get_odds_history))
        .route("/api/latest-odds", get(get_latest_odds))
        .route("/api/cached-warnings", get(get_cached_warnings))
        .route("/api/monitor/config", get(get_monitor_config).put(put_monitor_config))
        .route("/api/monitor/:status", post(toggle_monitor))
        .route("/api/monitor/point/:status", post(toggle_point_monitor))
        .route("/api/daily-odds", get(get_daily_odds))
        .route("/api/upcoming-odds-full", get(get_upcoming_odds))
        .route("/api/match-start-time", post(post_match_start_time))
        .route("/api/debug/matches", get(get_debug_matches))
        .route("/api/matches/result", put(put_match_result))
        .route("/api/matches/latest", get(get_latest_matches))
        .route("/api/bindings", post(post_binding))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LineQuery {
    pub match_name: String,
    pub start_time_beijing: String,
    #[serde(rename = "type")]
    pub market: String,
    pub value: String,
    pub side: String,
    /// Only read by the latest-odds endpoint.
    pub source: Option<SourceId>,
}

#[derive(Deserialize)]
pub struct DailyOddsQuery {
    pub start_date: String,
    pub end_date: Option<String>,
    /// Comma-separated source ids.
    pub sources: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub search: String,
}

/// A line query with its text fields parsed.
struct LineKey {
    market: MarketKind,
    line: String,
    side: Side,
}

impl LineQuery {
    fn key(&self) -> Result<LineKey, AppError> {
        let market: MarketKind = self.market.parse().map_err(AppError::BadRequest)?;
        let side = side_of(market, &self.side).ok_or_else(|| {
            AppError::BadRequest(format!("side '{}' is not a {market} side", self.side))
        })?;
        let line = clean_line(&self.value)
            .ok_or_else(|| AppError::BadRequest(format!("'{}' is not a line value", self.value)))?;
        Ok(LineKey { market, line, side })
    }
}

async fn find_match_id(state: &ApiState, name: &str, start: &str) -> Result<i64, AppError> {
    state
        .store
        .match_id(name, start)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("match '{name}' at {start}")))
}

// ---------------------------------------------------------------------------
// Odds history
// ---------------------------------------------------------------------------

async fn get_odds_history(
    State(state): State<ApiState>,
    Query(q): Query<LineQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let key = q.key()?;
    let match_id = find_match_id(&state, &q.match_name, &q.start_time_beijing).await?;

    let mut data = Vec::new();
    for &source in &state.sources {
        let history = state.store.history(match_id, key.market, &key.line, key.side, source).await?;
        data.extend(history_records(source, history, HISTORY_LIMIT));
    }
    debug!(match_id, records = data.len(), "Odds history served");
    Ok(Json(HistoryResponse { status: "success", data }))
}

async fn get_latest_odds(
    State(state): State<ApiState>,
    Query(q): Query<LineQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let key = q.key()?;
    let source = q.source.unwrap_or(state.index_source);
    if !state.sources.contains(&source) {
        return Err(AppError::BadRequest(format!("unknown source {source}")));
    }
    let match_id = find_match_id(&state, &q.match_name, &q.start_time_beijing).await?;

    let history = state.store.history(match_id, key.market, &key.line, key.side, source).await?;
    let latest: Vec<_> = dedupe_consecutive(history).into_iter().last().into_iter().collect();
    Ok(Json(HistoryResponse { status: "success", data: history_records(source, latest, 1) }))
}

// ---------------------------------------------------------------------------
// Warnings and monitor settings
// ---------------------------------------------------------------------------

async fn get_cached_warnings(
    State(state): State<ApiState>,
) -> Result<Json<Vec<CachedWarning>>, AppError> {
    let since = clock::now_ms() - POINT_WARNING_LOOKBACK_HOURS * 3_600_000;
    let point = state.store.recent_point_warnings(since).await?;
    let trend = state.warnings.snapshot().await;
    Ok(Json(merge_warnings(trend, point)))
}

async fn get_monitor_config(State(state): State<ApiState>) -> Json<MonitorSettings> {
    Json(state.monitor.get().await)
}

async fn put_monitor_config(
    State(state): State<ApiState>,
    Json(update): Json<MonitorSettingsUpdate>,
) -> Result<Json<MonitorSettings>, AppError> {
    Ok(Json(state.monitor.update(update).await?))
}

async fn toggle_monitor(
    State(state): State<ApiState>,
    Path(status): Path<bool>,
) -> Result<Json<serde_json::Value>, AppError> {
    let settings = state.monitor.set_enabled(status).await?;
    info!(enabled = settings.enabled, "Trend detector toggled");
    Ok(Json(serde_json::json!({ "status": "success", "enabled": settings.enabled })))
}

async fn toggle_point_monitor(
    State(state): State<ApiState>,
    Path(status): Path<bool>,
) -> Result<Json<serde_json::Value>, AppError> {
    let s = state.monitor.set_point_enabled(status).await?;
    info!(enabled = s.point_monitor_enabled, "Point-drop detector toggled");
    Ok(Json(serde_json::json!({
        "status": "success",
        "point_monitor_enabled": s.point_monitor_enabled,
        "current_settings": {
            "time_window_minutes": s.point_check_minutes,
            "threshold_points": s.point_threshold,
            "sources": s.point_monitor_sources,
        }
    })))
}

// ---------------------------------------------------------------------------
// Daily and upcoming dumps
// ---------------------------------------------------------------------------

async fn match_odds(
    store: &OddsStore,
    matches: Vec<MatchRow>,
    sources: &[SourceId],
) -> Result<Vec<MatchOdds>, AppError> {
    let mut out = Vec::with_capacity(matches.len());
    for m in matches {
        let spreads = store.quotes_for_match(m.id, MarketKind::Spread, sources).await?;
        let totals = store.quotes_for_match(m.id, MarketKind::Total, sources).await?;
        out.push(MatchOdds::new(m, group_lines(spreads), group_lines(totals)));
    }
    Ok(out)
}

async fn get_daily_odds(
    State(state): State<ApiState>,
    Query(q): Query<DailyOddsQuery>,
) -> Result<Json<DailyOddsResponse>, AppError> {
    let end_date = q.end_date.clone().unwrap_or_else(|| q.start_date.clone());
    let parse = |raw: &str| {
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| AppError::BadRequest(format!("'{raw}' is not a YYYY-MM-DD date")))
    };
    let start = parse(&q.start_date)?;
    let end = parse(&end_date)?;
    if start > end {
        return Err(AppError::BadRequest("start_date is after end_date".to_string()));
    }
    // No `sources` parameter means every source.
    let sources = match q.sources.as_deref() {
        None => Vec::new(),
        raw => parse_source_filter(raw).ok_or_else(|| {
            AppError::BadRequest("sources must be a comma-separated id list".to_string())
        })?,
    };

    // Whole days, end date inclusive.
    let from = start.and_hms_opt(0, 0, 0).map(|t| t.format(TIME_FORMAT).to_string());
    let to = (end + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|t| t.format(TIME_FORMAT).to_string());
    let (Some(from), Some(to)) = (from, to) else {
        return Err(AppError::BadRequest("date range out of bounds".to_string()));
    };

    let matches = state.store.matches_starting_in(&from, &to).await?;
    let data = match_odds(&state.store, matches, &sources).await?;
    Ok(Json(DailyOddsResponse {
        status: "success",
        start_date: q.start_date,
        end_date,
        count: data.len(),
        data,
    }))
}

async fn get_upcoming_odds(
    State(state): State<ApiState>,
) -> Result<Json<DailyOddsResponse>, AppError> {
    let now = clock::now_beijing();
    let until = now + Duration::hours(UPCOMING_LOOKAHEAD_HOURS);
    let matches = state
        .store
        .matches_starting_in(
            &now.format(TIME_FORMAT).to_string(),
            &until.format(TIME_FORMAT).to_string(),
        )
        .await?;
    let data = match_odds(&state.store, matches, &[]).await?;
    Ok(Json(DailyOddsResponse {
        status: "success",
        start_date: now.format("%Y-%m-%d").to_string(),
        end_date: until.format("%Y-%m-%d").to_string(),
        count: data.len(),
        data,
    }))
}

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

async fn post_match_start_time(
    State(state): State<ApiState>,
    Json(queries): Json<Vec<StartTimeQuery>>,
) -> Json<StartTimeResponse> {
    let mut results = Vec::with_capacity(queries.len());
    for query in queries {
        let (match_start_time, status) = lookup_start_time(&state.store, &query).await;
        results.push(StartTimeResult { query, match_start_time, status });
    }
    Json(StartTimeResponse { status: "success", results })
}

async fn lookup_start_time(
    store: &OddsStore,
    q: &StartTimeQuery,
) -> (Option<String>, StartTimeStatus) {
    let (Some(league), Some(home), Some(away), Some(order_time)) = (
        non_blank(&q.league_name),
        non_blank(&q.home_team),
        non_blank(&q.away_team),
        non_blank(&q.order_time),
    ) else {
        return (None, StartTimeStatus::InvalidParams);
    };
    let Some(order_time) = clock::parse_beijing(order_time) else {
        return (None, StartTimeStatus::InvalidTimeFormat);
    };

    let after = order_time.format(TIME_FORMAT).to_string();
    match store.start_times_after(league, home, away, &after).await {
        Ok(candidates) => start_time_outcome(candidates),
        Err(e) => {
            warn!(league, home, away, error = %e, "Start-time lookup failed");
            (None, StartTimeStatus::Error)
        }
    }
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

async fn get_debug_matches(
    State(state): State<ApiState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let term = q.search.trim();
    if term.is_empty() {
        return Err(AppError::BadRequest("search must not be empty".to_string()));
    }
    let data: Vec<MatchSummary> = state
        .store
        .search_matches(term, DEBUG_SEARCH_LIMIT)
        .await?
        .into_iter()
        .map(|m| MatchSummary {
            id: m.id,
            match_name: m.match_name,
            start_time_beijing: m.start_time_beijing,
        })
        .collect();
    Ok(Json(serde_json::json!({ "status": "success", "data": data })))
}

async fn put_match_result(
    State(state): State<ApiState>,
    Json(body): Json<MatchResultUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state
        .store
        .set_result(
            &body.match_name,
            &body.start_time_beijing,
            body.full_time.as_deref(),
            body.half_time.as_deref(),
            body.result_value.as_deref(),
        )
        .await?;
    if !updated {
        return Err(AppError::NotFound(format!(
            "match '{}' at {}",
            body.match_name, body.start_time_beijing
        )));
    }
    info!(match_name = %body.match_name, "Match result updated");
    let row = state.store.get_match(&body.match_name, &body.start_time_beijing).await?;
    Ok(Json(serde_json::json!({ "status": "success", "data": row })))
}

async fn get_latest_matches(State(state): State<ApiState>) -> Json<BroadcastPayload> {
    Json(state.cache.payload().await)
}

async fn post_binding(
    State(state): State<ApiState>,
    Json(row): Json<BindingRow>,
) -> Result<Json<serde_json::Value>, AppError> {
    let complete = |s: SourceId| {
        let n = row.names(s);
        n.league.is_some() && n.home.is_some() && n.away.is_some()
    };
    if !complete(state.canonical_source) {
        return Err(AppError::BadRequest(format!(
            "binding needs league and team names for source {}",
            state.canonical_source
        )));
    }
    if !state.sources.iter().any(|&s| s != state.canonical_source && complete(s)) {
        return Err(AppError::BadRequest(
            "binding needs names for at least one other source".to_string(),
        ));
    }
    let id = state.store.insert_binding(&row).await?;
    info!(id, "Binding added");
    Ok(Json(serde_json::json!({ "status": "success", "id": id })))
}

// ---------------------------------------------------------------------------
// Health, stats and the broadcast socket
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_us, p95_us, p99_us) = state.latency.percentiles();
    Json(LatencyResponse { samples: state.latency.len(), p50_us, p95_us, p99_us })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    let rx = state.payload_rx.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, rx))
}

/// Sends the current payload, then every newly published one until either side goes away.
async fn handle_socket(mut socket: WebSocket, mut rx: PayloadRx) {
    let current = rx.borrow_and_update().clone();
    if let Some(text) = current {
        if socket.send(Message::Text(text.to_string())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = rx.borrow_and_update().clone();
                if let Some(text) = current {
                    if socket.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("WebSocket subscriber left");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::types::{match_name, MatchSnapshot};

    const START: &str = "2025-03-01 19:30:00";

    async fn test_state() -> ApiState {
        let (_tx, payload_rx) = crate::broadcast::channel();
        ApiState {
            store: OddsStore::in_memory().await.unwrap(),
            cache: Arc::new(MatchCache::new()),
            warnings: Arc::new(WarningCache::new()),
            monitor: Arc::new(MonitorHandle::new(MonitorSettings::default(), vec![1, 2, 3])),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
            payload_rx,
            sources: vec![1, 2, 3],
            canonical_source: 3,
            index_source: 2,
        }
    }

    async fn seed(store: &OddsStore) -> String {
        let name = match_name("EPL", "Arsenal", "Chelsea", START);
        let id = store
            .upsert_match(&MatchSnapshot {
                match_name: name.clone(),
                start_time_beijing: START.to_string(),
                league_name: "EPL".to_string(),
                home_team: "Arsenal".to_string(),
                away_team: "Chelsea".to_string(),
                minutes_to_start: None,
                event_id: None,
                line_id: None,
                league_id: None,
                margin_index: None,
                is_margin_189: false,
                total_margin_index: None,
                is_total_margin_189: false,
                sources: BTreeMap::new(),
            })
            .await
            .unwrap();
        let base = 1_740_000_000_000;
        for (i, price) in [0.9, 0.9, 0.85, 0.9].into_iter().enumerate() {
            // The store itself skips the repeated 0.9.
            store
                .append_quote_at(id, 2, MarketKind::Spread, "-0.5", Side::Home, price, base + i as i64 * 1_000)
                .await
                .unwrap();
        }
        store
            .append_quote_at(id, 1, MarketKind::Spread, "-0.5", Side::Home, 0.95, base)
            .await
            .unwrap();
        name
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn line_uri(path: &str, name: &str, extra: &str) -> String {
        format!(
            "{path}?match_name={}&start_time_beijing={}&type=spread&value=-0.5&side=home{extra}",
            name.replace(' ', "%20"),
            START.replace(' ', "%20")
        )
    }

    #[tokio::test]
    async fn odds_history_per_source_newest_first() {
        let state = test_state().await;
        let name = seed(&state.store).await;
        let (status, json) = send(router(state), get(&line_uri("/api/odds-history", &name, ""))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data[0]["source"], 1);
        let source2: Vec<f64> = data[1..].iter().map(|r| r["odds"].as_f64().unwrap()).collect();
        assert_eq!(source2, vec![0.9, 0.85, 0.9]);
    }

    #[tokio::test]
    async fn latest_odds_defaults_to_index_source() {
        let state = test_state().await;
        let name = seed(&state.store).await;
        let (status, json) = send(router(state), get(&line_uri("/api/latest-odds", &name, ""))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        assert_eq!(json["data"][0]["source"], 2);
        assert_eq!(json["data"][0]["odds"], 0.9);
    }

    #[tokio::test]
    async fn unknown_match_is_404_and_bad_side_is_400() {
        let state = test_state().await;
        let app = router(state);
        let (status, _) = send(app.clone(), get(&line_uri("/api/odds-history", "nope", ""))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = "/api/odds-history?match_name=x&start_time_beijing=y&type=total&value=2.5&side=home";
        let (status, _) = send(app, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn monitor_config_partial_update() {
        let state = test_state().await;
        let app = router(state);
        let (status, json) = send(
            app.clone(),
            json_req("PUT", "/api/monitor/config", serde_json::json!({ "threshold_189": 150.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["threshold_189"], 150.0);
        assert_eq!(json["required_sources"], serde_json::json!([1, 2]));

        let (status, _) = send(
            app.clone(),
            json_req("PUT", "/api/monitor/config", serde_json::json!({ "check_interval": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, json) = send(app, get("/api/monitor/config")).await;
        assert_eq!(json["check_interval"], 5);
    }

    #[tokio::test]
    async fn toggles_echo_settings() {
        let state = test_state().await;
        let app = router(state);
        let req = Request::builder().method("POST").uri("/api/monitor/point/true").body(Body::empty()).unwrap();
        let (status, json) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["point_monitor_enabled"], true);
        assert_eq!(json["current_settings"]["time_window_minutes"], 30);

        let req = Request::builder().method("POST").uri("/api/monitor/true").body(Body::empty()).unwrap();
        let (_, json) = send(app, req).await;
        assert_eq!(json["enabled"], true);
    }

    #[tokio::test]
    async fn daily_odds_groups_by_line() {
        let state = test_state().await;
        seed(&state.store).await;
        let app = router(state);
        let (status, json) = send(app.clone(), get("/api/daily-odds?start_date=2025-03-01")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 1);
        let spread = &json["data"][0]["spread_odds"][0];
        assert_eq!(spread["line_value"], "-0.5");
        assert_eq!(spread["sources"]["2"].as_array().unwrap().len(), 3);

        let (_, json) = send(app.clone(), get("/api/daily-odds?start_date=2025-03-01&sources=1")).await;
        assert!(json["data"][0]["spread_odds"][0]["sources"].get("2").is_none());

        let (status, _) =
            send(app.clone(), get("/api/daily-odds?start_date=2025-03-01&sources=1,x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app, get("/api/daily-odds?start_date=2025-03-02&end_date=2025-03-01")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn match_start_time_statuses() {
        let state = test_state().await;
        seed(&state.store).await;
        let body = serde_json::json!([
            {"league_name": "EPL", "home_team": "Arsenal", "away_team": "Chelsea", "order_time": "2025-03-01 10:00:00.250"},
            {"league_name": "EPL", "home_team": "Arsenal", "away_team": "Chelsea", "order_time": "2025-03-02 10:00:00"},
            {"league_name": "EPL", "home_team": "Arsenal", "order_time": "2025-03-01 10:00:00"},
            {"league_name": "EPL", "home_team": "Arsenal", "away_team": "Chelsea", "order_time": "soon"}
        ]);
        let (status, json) = send(router(state), json_req("POST", "/api/match-start-time", body)).await;
        assert_eq!(status, StatusCode::OK);
        let r = json["results"].as_array().unwrap();
        assert_eq!(r[0]["status"], "success");
        assert_eq!(r[0]["match_start_time"], START);
        assert_eq!(r[0]["league_name"], "EPL");
        assert_eq!(r[1]["status"], "not_found");
        assert_eq!(r[2]["status"], "invalid_params");
        assert_eq!(r[3]["status"], "invalid_time_format");
    }

    #[tokio::test]
    async fn result_update_and_search() {
        let state = test_state().await;
        let name = seed(&state.store).await;
        let app = router(state);
        let body = serde_json::json!({
            "match_name": name,
            "start_time_beijing": START,
            "full_time": "2-1",
        });
        let (status, json) = send(app.clone(), json_req("PUT", "/api/matches/result", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["full_time"], "2-1");

        let body = serde_json::json!({ "match_name": "nope", "start_time_beijing": START });
        let (status, _) = send(app.clone(), json_req("PUT", "/api/matches/result", body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, json) = send(app, get("/api/debug/matches?search=Arsenal")).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bindings_need_canonical_and_one_counterpart() {
        let state = test_state().await;
        let app = router(state);
        let partial = serde_json::json!({
            "source3_league": "EPL", "source3_home_team": "Arsenal", "source3_away_team": "Chelsea"
        });
        let (status, _) = send(app.clone(), json_req("POST", "/api/bindings", partial)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let full = serde_json::json!({
            "source3_league": "EPL", "source3_home_team": "Arsenal", "source3_away_team": "Chelsea",
            "source1_league": "England Premier", "source1_home_team": "Arsenal FC", "source1_away_team": "Chelsea FC"
        });
        let (status, json) = send(app, json_req("POST", "/api/bindings", full)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["id"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn health_and_latency_respond() {
        let state = test_state().await;
        state.latency.record_us(1_500);
        let app = router(state);
        let (status, json) = send(app.clone(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["relay_connected"], false);

        let (_, json) = send(app.clone(), get("/stats/latency")).await;
        assert_eq!(json["samples"], 1);
        assert!(json["p50_us"].as_u64().is_some());

        let (_, json) = send(app, get("/api/cached-warnings")).await;
        assert_eq!(json, serde_json::json!([]));
    }
}
