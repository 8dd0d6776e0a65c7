use crate::errors::{EngineError, EngineResult};
use crate::portfolio::allocator::AllocationPlan;
use crate::portfolio::report::RunReport;
use crate::state::DbCommand;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

const SCHEMA: &str = include_str!("../migrations/001_init.sql");

pub fn init_db(data_dir: &Path) -> EngineResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("confident_kelly.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

/// Throwaway database with the same schema.
pub fn init_memory_db() -> EngineResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Dedicated DB writer task. Reads commands from bounded channel, executes SQL.
/// This is the ONLY task that writes to the database connection.
pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        if let Err(e) = execute_command(&db, cmd) {
            tracing::error!("db write error: {e}");
        }
    }

    tracing::info!("db writer task shutting down");
}

pub fn execute_command(db: &DbPool, cmd: DbCommand) -> EngineResult<()> {
    let mut conn = db.lock().map_err(|e| EngineError::Database(format!("lock poisoned: {e}")))?;

    match cmd {
        DbCommand::InsertRun(report) => insert_run(&mut conn, &report)?,
        DbCommand::InsertFailure { timestamp, error } => {
            conn.execute(
                "INSERT INTO allocation_runs (run_id, timestamp, strategy, status, error)
                 VALUES (?1, ?2, '', 'failed', ?3)",
                rusqlite::params![uuid::Uuid::new_v4().to_string(), timestamp, error],
            )?;
        }
    }

    Ok(())
}

fn insert_run(conn: &mut Connection, report: &RunReport) -> EngineResult<()> {
    let tx = conn.transaction()?;
    let eq = &report.equity_plan;

    tx.execute(
        "INSERT INTO allocation_runs (run_id, timestamp, strategy, status, portfolio_value, equity_allocated, equity_cash,
                                      options_allocated, positions, option_positions, excluded)
         VALUES (?1, ?2, ?3, 'completed', ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            report.run_id,
            report.timestamp,
            report.strategy,
            eq.portfolio_value,
            eq.total_allocated,
            eq.cash_remaining,
            report.options_plan.total_allocated,
            eq.entries.len() as i64,
            report.options_plan.entries.len() as i64,
            report.all_exclusions().count() as i64,
        ],
    )?;

    insert_entries(&tx, &report.run_id, "equity", eq)?;
    insert_entries(&tx, &report.run_id, "options", &report.options_plan)?;

    {
        let mut stmt = tx.prepare("INSERT INTO exclusions (run_id, ticker, stage, reason) VALUES (?1, ?2, ?3, ?4)")?;
        for x in report.all_exclusions() {
            stmt.execute(rusqlite::params![report.run_id, x.ticker, x.stage, x.reason])?;
        }
    }

    tx.commit()?;
    Ok(())
}

fn insert_entries(tx: &rusqlite::Transaction<'_>, run_id: &str, book: &str, plan: &AllocationPlan) -> EngineResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO allocation_entries (run_id, book, rank, ticker, current_price, dollar_allocation, shares,
                                         unified_score, confidence_factor, kelly_fraction_used, scaled_kelly)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for (rank, e) in plan.entries.iter().enumerate() {
        stmt.execute(rusqlite::params![
            run_id,
            book,
            rank as i64,
            e.ticker,
            e.current_price,
            e.dollar_allocation,
            e.shares as i64,
            e.unified_score,
            e.confidence_factor,
            e.kelly_fraction_used,
            e.scaled_kelly,
        ])?;
    }
    Ok(())
}

// ── Queries (read path, used by HTTP handlers) ──

pub fn get_recent_runs(db: &DbPool, limit: usize) -> EngineResult<Vec<RunRow>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let mut stmt = conn.prepare(
        "SELECT run_id, timestamp, strategy, status, error, portfolio_value, equity_allocated, equity_cash,
                options_allocated, positions, option_positions, excluded
         FROM allocation_runs ORDER BY timestamp DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
        Ok(RunRow {
            run_id: row.get(0)?,
            timestamp: row.get(1)?,
            strategy: row.get(2)?,
            status: row.get(3)?,
            error: row.get(4)?,
            portfolio_value: row.get(5)?,
            equity_allocated: row.get(6)?,
            equity_cash: row.get(7)?,
            options_allocated: row.get(8)?,
            positions: row.get(9)?,
            option_positions: row.get(10)?,
            excluded: row.get(11)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Entries and exclusions of one run; `None` if the run is unknown.
pub fn get_run_detail(db: &DbPool, run_id: &str) -> EngineResult<Option<RunDetail>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;

    let known: i64 = conn.query_row(
        "SELECT COUNT(*) FROM allocation_runs WHERE run_id = ?1",
        rusqlite::params![run_id],
        |row| row.get(0),
    )?;
    if known == 0 {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        "SELECT book, rank, ticker, current_price, dollar_allocation, shares, unified_score,
                confidence_factor, kelly_fraction_used, scaled_kelly
         FROM allocation_entries WHERE run_id = ?1 ORDER BY book, rank",
    )?;
    let entries = stmt
        .query_map(rusqlite::params![run_id], |row| {
            Ok(EntryRow {
                book: row.get(0)?,
                rank: row.get(1)?,
                ticker: row.get(2)?,
                current_price: row.get(3)?,
                dollar_allocation: row.get(4)?,
                shares: row.get(5)?,
                unified_score: row.get(6)?,
                confidence_factor: row.get(7)?,
                kelly_fraction_used: row.get(8)?,
                scaled_kelly: row.get(9)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn.prepare("SELECT ticker, stage, reason FROM exclusions WHERE run_id = ?1 ORDER BY id")?;
    let exclusions = stmt
        .query_map(rusqlite::params![run_id], |row| {
            Ok(ExclusionRow {
                ticker: row.get(0)?,
                stage: row.get(1)?,
                reason: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Some(RunDetail {
        run_id: run_id.to_string(),
        entries,
        exclusions,
    }))
}

// ── Row types ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunRow {
    pub run_id: String,
    pub timestamp: String,
    pub strategy: String,
    pub status: String,
    pub error: Option<String>,
    pub portfolio_value: f64,
    pub equity_allocated: f64,
    pub equity_cash: f64,
    pub options_allocated: f64,
    pub positions: i64,
    pub option_positions: i64,
    pub excluded: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EntryRow {
    pub book: String,
    pub rank: i64,
    pub ticker: String,
    pub current_price: f64,
    pub dollar_allocation: f64,
    pub shares: i64,
    pub unified_score: f64,
    pub confidence_factor: f64,
    pub kelly_fraction_used: f64,
    pub scaled_kelly: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExclusionRow {
    pub ticker: String,
    pub stage: String,
    pub reason: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunDetail {
    pub run_id: String,
    pub entries: Vec<EntryRow>,
    pub exclusions: Vec<ExclusionRow>,
}
