//! SQLite persistence for positions and the trade ledger.
//!
//! Persists session state to survive restarts:
//! - Positions still open at session end (restored into `bought`)
//! - Closed trades, keyed by session date

use crate::pipeline::PositionRecord;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

/// Storage of positions across sessions.
#[cfg_attr(test, mockall::automock)]
pub trait TradeStore: Send + Sync {
    /// Positions left open by the previous session.
    fn load_open_positions(&self) -> Result<Vec<PositionRecord>>;

    /// Replace the stored open positions.
    fn store_open_positions(&self, records: &[PositionRecord]) -> Result<()>;

    /// Append closed trades to the ledger of `date`.
    fn append_trades(&self, date: NaiveDate, records: &[PositionRecord]) -> Result<()>;

    /// Ledger of `date`, in insertion order.
    fn trades_on(&self, date: NaiveDate) -> Result<Vec<PositionRecord>>;
}

/// SQLite-based trade store.
pub struct SqliteTradeStore {
    conn: Mutex<Connection>,
}

impl SqliteTradeStore {
    /// Open the store, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        init_schema(&conn)?;

        info!("Trade store initialized at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used for paper sessions without a database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Trade store connection poisoned"))?;
        f(&mut conn)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Positions carried to the next session
        CREATE TABLE IF NOT EXISTS open_positions (
            symbol TEXT PRIMARY KEY,
            opened_at TEXT NOT NULL,
            cost_basis TEXT,
            unrealized_plpc TEXT NOT NULL,
            max_unrealized_plpc TEXT NOT NULL
        );

        -- Closed trades per session date
        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_date TEXT NOT NULL,
            symbol TEXT NOT NULL,
            opened_at TEXT NOT NULL,
            closed_at TEXT,
            cost_basis TEXT,
            unrealized_plpc TEXT NOT NULL,
            max_unrealized_plpc TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trades_date ON trades(session_date);
        "#,
    )
    .context("Failed to initialize schema")?;

    debug!("Database schema initialized");
    Ok(())
}

fn parse_decimal(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap_or_default()
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Columns: symbol, opened_at, cost_basis, unrealized_plpc, max_unrealized_plpc, closed_at
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PositionRecord> {
    Ok(PositionRecord {
        symbol: row.get(0)?,
        opened_at: parse_time(&row.get::<_, String>(1)?),
        cost_basis: row
            .get::<_, Option<String>>(2)?
            .map(|v| parse_decimal(&v)),
        unrealized_plpc: parse_decimal(&row.get::<_, String>(3)?),
        max_unrealized_plpc: parse_decimal(&row.get::<_, String>(4)?),
        closed_at: row.get::<_, Option<String>>(5)?.map(|v| parse_time(&v)),
    })
}

impl TradeStore for SqliteTradeStore {
    fn load_open_positions(&self) -> Result<Vec<PositionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT symbol, opened_at, cost_basis, unrealized_plpc, max_unrealized_plpc, NULL
                FROM open_positions
                ORDER BY symbol
                "#,
            )?;
            let records: Vec<PositionRecord> = stmt
                .query_map([], record_from_row)?
                .filter_map(|r| r.ok())
                .collect();

            info!(positions = records.len(), "Loaded open positions");
            Ok(records)
        })
    }

    fn store_open_positions(&self, records: &[PositionRecord]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM open_positions", [])?;
            for record in records {
                tx.execute(
                    r#"
                    INSERT INTO open_positions (symbol, opened_at, cost_basis,
                                                unrealized_plpc, max_unrealized_plpc)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        record.symbol,
                        record.opened_at.to_rfc3339(),
                        record.cost_basis.map(|v| v.to_string()),
                        record.unrealized_plpc.to_string(),
                        record.max_unrealized_plpc.to_string(),
                    ],
                )?;
            }
            tx.commit()?;

            debug!(positions = records.len(), "Open positions saved");
            Ok(())
        })
    }

    fn append_trades(&self, date: NaiveDate, records: &[PositionRecord]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for record in records {
                tx.execute(
                    r#"
                    INSERT INTO trades (session_date, symbol, opened_at, closed_at, cost_basis,
                                        unrealized_plpc, max_unrealized_plpc)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        date.to_string(),
                        record.symbol,
                        record.opened_at.to_rfc3339(),
                        record.closed_at.map(|t| t.to_rfc3339()),
                        record.cost_basis.map(|v| v.to_string()),
                        record.unrealized_plpc.to_string(),
                        record.max_unrealized_plpc.to_string(),
                    ],
                )?;
            }
            tx.commit()?;

            info!(%date, trades = records.len(), "Trades appended to ledger");
            Ok(())
        })
    }

    fn trades_on(&self, date: NaiveDate) -> Result<Vec<PositionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT symbol, opened_at, cost_basis, unrealized_plpc, max_unrealized_plpc,
                       closed_at
                FROM trades
                WHERE session_date = ?1
                ORDER BY id
                "#,
            )?;
            let records = stmt
                .query_map([date.to_string()], record_from_row)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(records)
        })
    }
}
