//! Store connection setup and schema (§6.2).
//!
//! Grounded in `examples/kov-interest/src/db/mod.rs` for the
//! open-and-tune-a-connection shape; the tuning pragmas here follow §4.4's
//! explicit storage-tuning expectations. Each component that needs the
//! store opens its own connection, per §5's "connection owned per
//! component" shared-resource policy.

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;

/// Open a connection at `path` (or `:memory:`) tuned for long bulk loads
/// with concurrent readers: WAL journalling, `synchronous=normal`, and a
/// multi-second busy timeout so transient writer contention resolves inside
/// the engine rather than surfacing as an error.
pub fn open(path: impl AsRef<Path>, busy_timeout_secs: u64) -> Result<Connection> {
    let conn = Connection::open(path)?;
    tune(&conn, busy_timeout_secs)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory(busy_timeout_secs: u64) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    tune(&conn, busy_timeout_secs)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

fn tune(conn: &Connection, busy_timeout_secs: u64) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(busy_timeout_secs))?;
    Ok(())
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS quotes (
            date TEXT NOT NULL,
            ticker TEXT NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL,
            trade_count INTEGER NOT NULL,
            quantity INTEGER NOT NULL,
            PRIMARY KEY (date, ticker)
        );
        CREATE INDEX IF NOT EXISTS idx_quotes_date ON quotes(date);
        CREATE INDEX IF NOT EXISTS idx_quotes_ticker ON quotes(ticker);

        CREATE TABLE IF NOT EXISTS files_processed (
            archive_name TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            rows_added INTEGER NOT NULL,
            content_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS corporate_actions (
            ticker TEXT NOT NULL,
            effective_date TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('split', 'reverse_split')),
            factor REAL NOT NULL CHECK (factor > 0),
            recorded_at TEXT NOT NULL,
            PRIMARY KEY (ticker, effective_date, kind)
        );
        CREATE INDEX IF NOT EXISTS idx_corporate_actions_ticker ON corporate_actions(ticker);
        ",
    )?;
    Ok(())
}
