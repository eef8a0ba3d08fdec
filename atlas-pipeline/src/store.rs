//! Strategy lineage store.
//!
//! Every generated strategy is recorded, including the ones that failed
//! verification or backtesting, so lineage and failure rates stay queryable.

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Lifecycle state of a stored strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Pending,
    Seed,
    /// Rejected by verification
    Failed,
    BacktestFailed,
    Analyzing,
    Completed,
}

impl StrategyStatus {
    pub const ALL: [StrategyStatus; 6] = [
        Self::Pending,
        Self::Seed,
        Self::Failed,
        Self::BacktestFailed,
        Self::Analyzing,
        Self::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Seed => "seed",
            Self::Failed => "failed",
            Self::BacktestFailed => "backtest_failed",
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::BacktestFailed)
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .with_context(|| format!("unknown strategy status '{s}'"))
    }
}

/// A strategy to insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewStrategy {
    pub code: String,
    pub motivation: Option<String>,
    pub parent_id: Option<i64>,
    pub metrics: Option<serde_json::Value>,
    pub analysis: Option<String>,
    pub status: Option<StrategyStatus>,
}

impl NewStrategy {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn with_motivation(mut self, motivation: impl Into<String>) -> Self {
        self.motivation = Some(motivation.into());
        self
    }

    pub fn with_parent(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.analysis = Some(analysis.into());
        self
    }

    pub fn with_status(mut self, status: StrategyStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// A stored strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<i64>,
    /// Generation number: 1 for roots, parent version + 1 otherwise
    pub version: i64,
    pub code: String,
    pub motivation: Option<String>,
    pub metrics: Option<serde_json::Value>,
    pub analysis: Option<String>,
    pub status: StrategyStatus,
}

impl StrategyRecord {
    /// Numeric metric from the stored metrics object.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.as_ref()?.get(name)?.as_f64()
    }
}

/// Persistence for strategies and their lineage.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    /// Insert and return the assigned id.
    async fn store(&self, strategy: NewStrategy) -> anyhow::Result<i64>;

    async fn update_metrics(&self, id: i64, metrics: serde_json::Value) -> anyhow::Result<()>;

    async fn update_analysis(&self, id: i64, analysis: &str) -> anyhow::Result<()>;

    async fn update_status(&self, id: i64, status: StrategyStatus) -> anyhow::Result<()>;

    async fn get(&self, id: i64) -> anyhow::Result<Option<StrategyRecord>>;

    /// Completed strategies ordered by a metric, best first.
    async fn top_k(&self, metric: &str, k: usize) -> anyhow::Result<Vec<StrategyRecord>>;

    /// Direct children, oldest first.
    async fn children(&self, id: i64) -> anyhow::Result<Vec<StrategyRecord>>;

    /// All descendants, breadth first by generation then age.
    async fn descendants(&self, id: i64) -> anyhow::Result<Vec<StrategyRecord>>;

    async fn status_counts(&self) -> anyhow::Result<BTreeMap<StrategyStatus, usize>>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS strategies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    parent_id INTEGER,
    version INTEGER NOT NULL DEFAULT 1,
    code TEXT NOT NULL,
    motivation TEXT,
    metrics TEXT,
    analysis TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    FOREIGN KEY (parent_id) REFERENCES strategies (id)
);

CREATE INDEX IF NOT EXISTS idx_strategies_created_at ON strategies (created_at);
CREATE INDEX IF NOT EXISTS idx_strategies_parent_id ON strategies (parent_id);
CREATE INDEX IF NOT EXISTS idx_strategies_status ON strategies (status);
"#;

const COLUMNS: &str =
    "id, created_at, parent_id, version, code, motivation, metrics, analysis, status";

static METRIC_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// SQLite-backed [`StrategyStore`].
#[derive(Clone)]
pub struct SqliteStrategyStore {
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for SqliteStrategyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStrategyStore").finish_non_exhaustive()
    }
}

impl SqliteStrategyStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening strategy store at {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("strategy store connection poisoned"))?;
            f(&guard)
        })
        .await?
    }

    fn query(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> anyhow::Result<Vec<StrategyRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, read_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    fn update(conn: &Connection, id: i64, column: &str, value: Option<String>) -> anyhow::Result<()> {
        let changed = conn.execute(
            &format!("UPDATE strategies SET {column} = ?1 WHERE id = ?2"),
            params![value, id],
        )?;
        if changed == 0 {
            bail!("strategy {id} not found");
        }
        Ok(())
    }
}

/// Raw column values, converted outside the rusqlite closure.
struct RawRow {
    id: i64,
    created_at: String,
    parent_id: Option<i64>,
    version: i64,
    code: String,
    motivation: Option<String>,
    metrics: Option<String>,
    analysis: Option<String>,
    status: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        created_at: row.get(1)?,
        parent_id: row.get(2)?,
        version: row.get(3)?,
        code: row.get(4)?,
        motivation: row.get(5)?,
        metrics: row.get(6)?,
        analysis: row.get(7)?,
        status: row.get(8)?,
    })
}

impl TryFrom<RawRow> for StrategyRecord {
    type Error = anyhow::Error;

    fn try_from(raw: RawRow) -> anyhow::Result<Self> {
        let created_at = DateTime::parse_from_rfc3339(&raw.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("strategy {} has bad timestamp", raw.id))?;
        let metrics = raw
            .metrics
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .with_context(|| format!("strategy {} has malformed metrics", raw.id))?;
        Ok(Self {
            id: raw.id,
            created_at,
            parent_id: raw.parent_id,
            version: raw.version,
            code: raw.code,
            motivation: raw.motivation,
            metrics,
            analysis: raw.analysis,
            status: raw.status.parse()?,
        })
    }
}

#[async_trait]
impl StrategyStore for SqliteStrategyStore {
    async fn store(&self, strategy: NewStrategy) -> anyhow::Result<i64> {
        self.with_conn(move |conn| {
            let version: i64 = match strategy.parent_id {
                Some(parent) => conn
                    .query_row(
                        "SELECT version FROM strategies WHERE id = ?1",
                        params![parent],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?
                    .with_context(|| format!("parent strategy {parent} not found"))?
                    + 1,
                None => 1,
            };
            let metrics = strategy
                .metrics
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let status = strategy.status.unwrap_or(StrategyStatus::Pending);

            conn.execute(
                "INSERT INTO strategies \
                 (created_at, parent_id, version, code, motivation, metrics, analysis, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    Utc::now().to_rfc3339(),
                    strategy.parent_id,
                    version,
                    strategy.code,
                    strategy.motivation,
                    metrics,
                    strategy.analysis,
                    status.as_str(),
                ],
            )?;
            let id = conn.last_insert_rowid();
            tracing::debug!(id, status = %status, version, "Strategy stored");
            Ok(id)
        })
        .await
    }

    async fn update_metrics(&self, id: i64, metrics: serde_json::Value) -> anyhow::Result<()> {
        let json = serde_json::to_string(&metrics)?;
        self.with_conn(move |conn| Self::update(conn, id, "metrics", Some(json)))
            .await
    }

    async fn update_analysis(&self, id: i64, analysis: &str) -> anyhow::Result<()> {
        let analysis = analysis.to_string();
        self.with_conn(move |conn| Self::update(conn, id, "analysis", Some(analysis)))
            .await
    }

    async fn update_status(&self, id: i64, status: StrategyStatus) -> anyhow::Result<()> {
        self.with_conn(move |conn| {
            Self::update(conn, id, "status", Some(status.as_str().to_string()))
        })
        .await
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<StrategyRecord>> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {COLUMNS} FROM strategies WHERE id = ?1");
            Ok(Self::query(conn, &sql, params![id])?.into_iter().next())
        })
        .await
    }

    async fn top_k(&self, metric: &str, k: usize) -> anyhow::Result<Vec<StrategyRecord>> {
        if !METRIC_NAME.is_match(metric) {
            bail!("invalid metric name '{metric}'");
        }
        let path = format!("$.{metric}");
        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM strategies \
                 WHERE metrics IS NOT NULL AND status = 'completed' \
                   AND json_extract(metrics, ?1) IS NOT NULL \
                 ORDER BY json_extract(metrics, ?1) DESC, id ASC \
                 LIMIT ?2"
            );
            Self::query(conn, &sql, params![path, limit])
        })
        .await
    }

    async fn children(&self, id: i64) -> anyhow::Result<Vec<StrategyRecord>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM strategies WHERE parent_id = ?1 ORDER BY created_at ASC, id ASC"
            );
            Self::query(conn, &sql, params![id])
        })
        .await
    }

    async fn descendants(&self, id: i64) -> anyhow::Result<Vec<StrategyRecord>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "WITH RECURSIVE lineage(id, depth) AS ( \
                     SELECT id, 1 FROM strategies WHERE parent_id = ?1 \
                     UNION ALL \
                     SELECT s.id, l.depth + 1 FROM strategies s JOIN lineage l ON s.parent_id = l.id \
                 ) \
                 SELECT {} FROM strategies s JOIN lineage l ON s.id = l.id \
                 ORDER BY l.depth ASC, s.created_at ASC, s.id ASC",
                COLUMNS
                    .split(", ")
                    .map(|c| format!("s.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Self::query(conn, &sql, params![id])
        })
        .await
    }

    async fn status_counts(&self) -> anyhow::Result<BTreeMap<StrategyStatus, usize>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM strategies GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut counts = BTreeMap::new();
            for row in rows {
                let (status, count) = row?;
                counts.insert(status.parse()?, usize::try_from(count).unwrap_or(0));
            }
            Ok(counts)
        })
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn completed(store: &SqliteStrategyStore, parent: Option<i64>, sharpe: f64) -> i64 {
        let id = store
            .store(NewStrategy::new(format!("signals = {sharpe}")).with_parent(parent))
            .await
            .unwrap();
        store
            .update_metrics(id, json!({ "test_sharpe": sharpe }))
            .await
            .unwrap();
        store.update_status(id, StrategyStatus::Completed).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let store = SqliteStrategyStore::open_in_memory().unwrap();
        let id = store
            .store(
                NewStrategy::new("signals = 1.0")
                    .with_motivation("hold")
                    .with_status(StrategyStatus::Seed),
            )
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.code, "signals = 1.0");
        assert_eq!(record.motivation.as_deref(), Some("hold"));
        assert_eq!(record.status, StrategyStatus::Seed);
        assert_eq!(record.version, 1);
        assert!(record.metrics.is_none());
        assert!(store.get(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_top_k_orders_completed_by_metric() {
        let store = SqliteStrategyStore::open_in_memory().unwrap();
        let low = completed(&store, None, 0.2).await;
        let high = completed(&store, None, 1.4).await;
        let mid = completed(&store, None, 0.9).await;
        // Not completed, must be ignored
        store
            .store(NewStrategy::new("x").with_status(StrategyStatus::Failed))
            .await
            .unwrap();

        let top: Vec<i64> = store
            .top_k("test_sharpe", 2)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(top, vec![high, mid]);
        assert_eq!(store.top_k("test_sharpe", 10).await.unwrap().len(), 3);
        assert_eq!(store.top_k("test_sharpe", 10).await.unwrap()[2].id, low);
        assert!(store.top_k("test_return", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_k_rejects_injection() {
        let store = SqliteStrategyStore::open_in_memory().unwrap();
        assert!(store.top_k("x') DESC; DROP TABLE strategies; --", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_lineage_queries() {
        let store = SqliteStrategyStore::open_in_memory().unwrap();
        let root = completed(&store, None, 0.5).await;
        let child_a = completed(&store, Some(root), 0.6).await;
        let child_b = completed(&store, Some(root), 0.4).await;
        let grandchild = completed(&store, Some(child_a), 0.7).await;

        let children: Vec<i64> = store.children(root).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(children, vec![child_a, child_b]);

        let descendants = store.descendants(root).await.unwrap();
        let ids: Vec<i64> = descendants.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![child_a, child_b, grandchild]);
        assert_eq!(descendants[2].version, 3);
        assert!(store.descendants(grandchild).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_parent_rejected() {
        let store = SqliteStrategyStore::open_in_memory().unwrap();
        let err = store
            .store(NewStrategy::new("signals = 0").with_parent(Some(42)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("parent strategy 42 not found"));
    }

    #[tokio::test]
    async fn test_update_missing_strategy_fails() {
        let store = SqliteStrategyStore::open_in_memory().unwrap();
        assert!(store.update_status(7, StrategyStatus::Completed).await.is_err());
    }

    #[tokio::test]
    async fn test_status_counts_and_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("strategies.db");
        {
            let store = SqliteStrategyStore::open(&path).unwrap();
            store
                .store(NewStrategy::new("a").with_status(StrategyStatus::Failed))
                .await
                .unwrap();
            store
                .store(NewStrategy::new("b").with_status(StrategyStatus::Failed))
                .await
                .unwrap();
            completed(&store, None, 1.0).await;
        }

        let reopened = SqliteStrategyStore::open(&path).unwrap();
        let counts = reopened.status_counts().await.unwrap();
        assert_eq!(counts.get(&StrategyStatus::Failed), Some(&2));
        assert_eq!(counts.get(&StrategyStatus::Completed), Some(&1));
        assert_eq!(counts.get(&StrategyStatus::Seed), None);
    }

    #[test]
    fn test_status_round_trip_through_text() {
        for status in StrategyStatus::ALL {
            assert_eq!(status.as_str().parse::<StrategyStatus>().unwrap(), status);
        }
        assert!("archived".parse::<StrategyStatus>().is_err());
        assert!(StrategyStatus::BacktestFailed.is_failure());
    }
}
