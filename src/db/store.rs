use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, warn};

use crate::clock;
use crate::config::{DB_ACQUIRE_TIMEOUT_SECS, DB_BUSY_TIMEOUT_SECS, DB_QUERY_TIMEOUT_SECS};
use crate::db::models::{
    binding_league_column, BindingRow, LineRow, MatchRow, OddsPoint, PointWarningRow, QuoteRow,
};
use crate::error::{AppError, Result};
use crate::types::{MarketKind, MatchSnapshot, PointWarning, QuoteBook, Side, SourceId};

const MATCH_COLUMNS: &str = "id, match_name, start_time_beijing, league_name, home_team, away_team, \
     minutes_to_start, event_id, line_id, league_id, full_time, half_time, result_value, \
     margin_index, is_margin_189, total_margin_index, is_total_margin_189, updated_at";

/// Runs `fut` under `limit`, turning an overrun into `AppError::Timeout`.
async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => {
            warn!(query = what, limit_ms = limit.as_millis() as u64, "Query deadline exceeded");
            Err(AppError::Timeout(format!("{what} exceeded {}ms", limit.as_millis())))
        }
    }
}

fn query_deadline() -> Duration {
    Duration::from_secs(DB_QUERY_TIMEOUT_SECS)
}

/// Matches, quote history, bindings and persisted point warnings.
#[derive(Debug, Clone)]
pub struct OddsStore {
    pool: SqlitePool,
}

impl OddsStore {
    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn connect(path: &str, min_connections: u32, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(DB_BUSY_TIMEOUT_SECS));
        let pool = SqlitePoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(DB_ACQUIRE_TIMEOUT_SECS))
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(path, min_connections, max_connections, "Odds store ready");
        Ok(Self { pool })
    }

    /// Single-connection in-memory database, migrated. Each call is an independent database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    // -----------------------------------------------------------------------
    // Matches
    // -----------------------------------------------------------------------

    /// Inserts or refreshes a match by (match_name, start_time_beijing). Results are untouched.
    pub async fn upsert_match(&self, m: &MatchSnapshot) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO matches (
                match_name, start_time_beijing, league_name, home_team, away_team,
                minutes_to_start, event_id, line_id, league_id,
                margin_index, is_margin_189, total_margin_index, is_total_margin_189, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (match_name, start_time_beijing) DO UPDATE SET
                league_name = excluded.league_name,
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                minutes_to_start = excluded.minutes_to_start,
                event_id = COALESCE(excluded.event_id, matches.event_id),
                line_id = COALESCE(excluded.line_id, matches.line_id),
                league_id = COALESCE(excluded.league_id, matches.league_id),
                margin_index = excluded.margin_index,
                is_margin_189 = excluded.is_margin_189,
                total_margin_index = excluded.total_margin_index,
                is_total_margin_189 = excluded.is_total_margin_189,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&m.match_name)
        .bind(&m.start_time_beijing)
        .bind(&m.league_name)
        .bind(&m.home_team)
        .bind(&m.away_team)
        .bind(m.minutes_to_start)
        .bind(m.event_id)
        .bind(m.line_id)
        .bind(m.league_id)
        .bind(m.margin_index)
        .bind(m.is_margin_189)
        .bind(m.total_margin_index)
        .bind(m.is_total_margin_189)
        .bind(clock::now_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn match_id(&self, match_name: &str, start_time_beijing: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM matches WHERE match_name = ? AND start_time_beijing = ?")
                .bind(match_name)
                .bind(start_time_beijing)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn get_match(&self, match_name: &str, start_time_beijing: &str) -> Result<Option<MatchRow>> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE match_name = ? AND start_time_beijing = ?"
        );
        let row = sqlx::query_as::<_, MatchRow>(&sql)
            .bind(match_name)
            .bind(start_time_beijing)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Matches with `from <= start_time_beijing < to`, earliest first.
    pub async fn matches_starting_in(&self, from: &str, to: &str) -> Result<Vec<MatchRow>> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches \
             WHERE start_time_beijing >= ? AND start_time_beijing < ? \
             ORDER BY start_time_beijing ASC, id ASC"
        );
        let fetch = async {
            let rows = sqlx::query_as::<_, MatchRow>(&sql)
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await?;
            Ok::<_, AppError>(rows)
        };
        bounded(query_deadline(), "matches_starting_in", fetch).await
    }

    /// Matches whose name contains `term`, most recent start first.
    pub async fn search_matches(&self, term: &str, limit: i64) -> Result<Vec<MatchRow>> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE match_name LIKE ? \
             ORDER BY start_time_beijing DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, MatchRow>(&sql)
            .bind(format!("%{term}%"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Start times strictly after `after` for the given names, earliest first.
    pub async fn start_times_after(
        &self,
        league: &str,
        home: &str,
        away: &str,
        after: &str,
    ) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT start_time_beijing FROM matches
            WHERE league_name = ? AND home_team = ? AND away_team = ? AND start_time_beijing > ?
            ORDER BY start_time_beijing ASC
            "#,
        )
        .bind(league)
        .bind(home)
        .bind(away)
        .bind(after)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    /// Sets the out-of-band result fields. Returns false when the match does not exist.
    pub async fn set_result(
        &self,
        match_name: &str,
        start_time_beijing: &str,
        full_time: Option<&str>,
        half_time: Option<&str>,
        result_value: Option<&str>,
    ) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE matches SET
                full_time = COALESCE(?, full_time),
                half_time = COALESCE(?, half_time),
                result_value = COALESCE(?, result_value)
            WHERE match_name = ? AND start_time_beijing = ?
            "#,
        )
        .bind(full_time)
        .bind(half_time)
        .bind(result_value)
        .bind(match_name)
        .bind(start_time_beijing)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Quote history
    // -----------------------------------------------------------------------

    pub async fn append_quote(
        &self,
        match_id: i64,
        source: SourceId,
        market: MarketKind,
        line: &str,
        side: Side,
        price: f64,
    ) -> Result<bool> {
        self.append_quote_at(match_id, source, market, line, side, price, clock::now_ms())
            .await
    }

    /// Appends a price only when it differs from the latest stored price for the same key.
    /// Returns whether a row was written.
    #[allow(clippy::too_many_arguments)]
    pub async fn append_quote_at(
        &self,
        match_id: i64,
        source: SourceId,
        market: MarketKind,
        line: &str,
        side: Side,
        price: f64,
        recorded_at: i64,
    ) -> Result<bool> {
        if side.market() != market {
            return Err(AppError::BadRequest(format!("side {side} does not belong to {market}")));
        }
        let table = market.table();
        let side = side.to_string();

        let latest: Option<(f64,)> = sqlx::query_as(&format!(
            "SELECT price FROM {table} \
             WHERE match_id = ? AND line_value = ? AND side = ? AND source = ? \
             ORDER BY recorded_at DESC, id DESC LIMIT 1"
        ))
        .bind(match_id)
        .bind(line)
        .bind(&side)
        .bind(i64::from(source))
        .fetch_optional(&self.pool)
        .await?;

        if matches!(latest, Some((p,)) if p == price) {
            return Ok(false);
        }

        sqlx::query(&format!(
            "INSERT INTO {table} (match_id, source, line_value, side, price, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?)"
        ))
        .bind(match_id)
        .bind(i64::from(source))
        .bind(line)
        .bind(&side)
        .bind(price)
        .bind(recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    /// Time-ascending history of one source for one (match, market, line, side).
    pub async fn history(
        &self,
        match_id: i64,
        market: MarketKind,
        line: &str,
        side: Side,
        source: SourceId,
    ) -> Result<Vec<OddsPoint>> {
        let sql = format!(
            "SELECT price, recorded_at FROM {} \
             WHERE match_id = ? AND line_value = ? AND side = ? AND source = ? \
             ORDER BY recorded_at ASC, id ASC",
            market.table()
        );
        let fetch = async {
            let rows = sqlx::query_as::<_, OddsPoint>(&sql)
                .bind(match_id)
                .bind(line)
                .bind(side.to_string())
                .bind(i64::from(source))
                .fetch_all(&self.pool)
                .await?;
            Ok::<_, AppError>(rows)
        };
        bounded(query_deadline(), "history", fetch).await
    }

    /// Time-ascending history of every source for one (match, market, line, side).
    pub async fn history_by_source(
        &self,
        match_id: i64,
        market: MarketKind,
        line: &str,
        side: Side,
    ) -> Result<BTreeMap<SourceId, Vec<OddsPoint>>> {
        let sql = format!(
            "SELECT source, price, recorded_at FROM {} \
             WHERE match_id = ? AND line_value = ? AND side = ? \
             ORDER BY recorded_at ASC, id ASC",
            market.table()
        );
        let fetch = async {
            let rows: Vec<(i64, f64, i64)> = sqlx::query_as(&sql)
                .bind(match_id)
                .bind(line)
                .bind(side.to_string())
                .fetch_all(&self.pool)
                .await?;
            Ok::<_, AppError>(rows)
        };
        let rows = bounded(query_deadline(), "history_by_source", fetch).await?;

        let mut out: BTreeMap<SourceId, Vec<OddsPoint>> = BTreeMap::new();
        for (source, price, recorded_at) in rows {
            let Ok(source) = SourceId::try_from(source) else {
                continue;
            };
            out.entry(source).or_default().push(OddsPoint { price, recorded_at });
        }
        Ok(out)
    }

    /// Distinct (line, side) pairs ever stored for a match and market.
    pub async fn lines_for_match(&self, match_id: i64, market: MarketKind) -> Result<Vec<(String, Side)>> {
        let rows = sqlx::query_as::<_, LineRow>(&format!(
            "SELECT DISTINCT line_value, side FROM {} WHERE match_id = ? ORDER BY line_value, side",
            market.table()
        ))
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| match r.side.parse::<Side>() {
                Ok(side) if side.market() == market => Some((r.line_value, side)),
                _ => {
                    warn!(match_id, line = %r.line_value, side = %r.side, "Skipping stored line with bad side");
                    None
                }
            })
            .collect())
    }

    /// Latest stored price per (line, side) of one source, as a quote book.
    pub async fn latest_book(&self, match_id: i64, source: SourceId) -> Result<QuoteBook> {
        let mut book = QuoteBook::default();
        for market in MarketKind::ALL {
            let rows: Vec<(String, String, f64)> = sqlx::query_as(&format!(
                "SELECT line_value, side, price FROM {} \
                 WHERE match_id = ? AND source = ? ORDER BY recorded_at ASC, id ASC",
                market.table()
            ))
            .bind(match_id)
            .bind(i64::from(source))
            .fetch_all(&self.pool)
            .await?;
            for (line, side, price) in rows {
                if let Ok(side) = side.parse::<Side>() {
                    book.insert(market, &line, side, price);
                }
            }
        }
        Ok(book)
    }

    /// Every stored quote of a match and market, optionally limited to `sources`, ordered by
    /// (line, side, source, time).
    pub async fn quotes_for_match(
        &self,
        match_id: i64,
        market: MarketKind,
        sources: &[SourceId],
    ) -> Result<Vec<QuoteRow>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT source, line_value, side, price, recorded_at FROM {} WHERE match_id = ",
            market.table()
        ));
        qb.push_bind(match_id);
        if !sources.is_empty() {
            qb.push(" AND source IN (");
            let mut sep = qb.separated(", ");
            for s in sources {
                sep.push_bind(i64::from(*s));
            }
            sep.push_unseparated(")");
        }
        qb.push(" ORDER BY line_value, side, source, recorded_at ASC, id ASC");

        let fetch = async {
            let rows = qb.build_query_as::<QuoteRow>().fetch_all(&self.pool).await?;
            Ok::<_, AppError>(rows)
        };
        bounded(query_deadline(), "quotes_for_match", fetch).await
    }

    // -----------------------------------------------------------------------
    // Point warnings
    // -----------------------------------------------------------------------

    /// Insert-or-ignore keyed by (match_name, market, line, side, first source).
    /// Returns true when a new row was written, false for a duplicate.
    pub async fn insert_point_warning(&self, w: &PointWarning) -> Result<bool> {
        let h = &w.header;
        let first_source = h.sources.first().copied().map(i64::from).unwrap_or_default();
        let sources = serde_json::to_string(&h.sources)?;

        let done = sqlx::query(
            r#"
            INSERT INTO point_warnings (
                match_name, start_time_beijing, market, line_value, side, warning_time,
                sources, first_source, league_name, home_team, away_team, result_value,
                time_window, drop_points, threshold_points, previous_odds, current_odds, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (match_name, market, line_value, side, first_source) DO NOTHING
            "#,
        )
        .bind(&h.match_name)
        .bind(&h.start_time_beijing)
        .bind(h.market.to_string())
        .bind(&h.value)
        .bind(h.side.to_string())
        .bind(&h.warning_time)
        .bind(sources)
        .bind(first_source)
        .bind(&h.league_name)
        .bind(&h.home_team)
        .bind(&h.away_team)
        .bind(&h.result_value)
        .bind(w.time_window)
        .bind(w.drop_points)
        .bind(w.threshold_points)
        .bind(w.previous_odds)
        .bind(w.current_odds)
        .bind(clock::now_ms())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Point warnings created at or after `since_ms`, newest first.
    pub async fn recent_point_warnings(&self, since_ms: i64) -> Result<Vec<PointWarning>> {
        let rows = sqlx::query_as::<_, PointWarningRow>(
            r#"
            SELECT match_name, start_time_beijing, market, line_value, side, warning_time,
                   sources, league_name, home_team, away_team, result_value,
                   time_window, drop_points, threshold_points, previous_odds, current_odds
            FROM point_warnings
            WHERE created_at >= ?
            ORDER BY warning_time DESC, id DESC
            "#,
        )
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let match_name = row.match_name.clone();
            match row.into_warning() {
                Ok(Some(w)) => out.push(w),
                Ok(None) => {}
                Err(e) => warn!(
                    match_name = %match_name,
                    error = %e,
                    "Skipping point warning with unreadable sources"
                ),
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Bindings
    // -----------------------------------------------------------------------

    /// Binding rows whose canonical league column is one of `leagues`, in insertion order.
    pub async fn bindings_for_leagues(
        &self,
        canonical: SourceId,
        leagues: &[String],
    ) -> Result<Vec<BindingRow>> {
        if leagues.is_empty() {
            return Ok(Vec::new());
        }
        let column = binding_league_column(canonical)
            .ok_or_else(|| AppError::Config(format!("no binding columns for source {canonical}")))?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT source1_league, source1_home_team, source1_away_team, \
             source2_league, source2_home_team, source2_away_team, \
             source3_league, source3_home_team, source3_away_team \
             FROM bindings WHERE ",
        );
        qb.push(column).push(" IN (");
        let mut sep = qb.separated(", ");
        for league in leagues {
            sep.push_bind(league.as_str());
        }
        sep.push_unseparated(") ORDER BY id ASC");

        let rows = qb.build_query_as::<BindingRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn insert_binding(&self, row: &BindingRow) -> Result<i64> {
        let done = sqlx::query(
            r#"
            INSERT INTO bindings (
                source1_league, source1_home_team, source1_away_team,
                source2_league, source2_home_team, source2_away_team,
                source3_league, source3_home_team, source3_away_team
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.source1_league)
        .bind(&row.source1_home_team)
        .bind(&row.source1_away_team)
        .bind(&row.source2_league)
        .bind(&row.source2_home_team)
        .bind(&row.source2_away_team)
        .bind(&row.source3_league)
        .bind(&row.source3_home_team)
        .bind(&row.source3_away_team)
        .execute(&self.pool)
        .await?;
        Ok(done.last_insert_rowid())
    }
}
