//! SQLite persistence layer for session accounting and transport records.
//!
//! Uses `rusqlite` with bundled SQLite. Handles:
//! - Per-session statistics (append-only, queried by transport and time range)
//! - Transport limits and persisted connection-mask state

mod sessions;
mod transports;

use std::path::Path;

use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::Connection;

pub use sessions::TransportUsageSummary;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS session_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        transport_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        source_ip TEXT NOT NULL,
        is_duplex INTEGER NOT NULL DEFAULT 0,
        transport_kind TEXT NOT NULL DEFAULT 'udp',
        bytes_read INTEGER NOT NULL DEFAULT 0,
        bytes_written INTEGER NOT NULL DEFAULT 0,
        events_received INTEGER NOT NULL DEFAULT 0,
        overhead_bytes INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_session_transport_time
        ON session_stats(transport_id, timestamp);

    CREATE TABLE IF NOT EXISTS transport (
        transport_id TEXT PRIMARY KEY,
        total_max_conn INTEGER NOT NULL DEFAULT 0,
        total_max_conn_per_min INTEGER NOT NULL DEFAULT 0,
        duplex_max_conn INTEGER NOT NULL DEFAULT 0,
        duplex_max_conn_per_min INTEGER NOT NULL DEFAULT 0,
        unit_limit_interval INTEGER NOT NULL DEFAULT 60,
        ip_address_valid TEXT NOT NULL DEFAULT '',
        max_ping_count INTEGER NOT NULL DEFAULT 0,
        total_profile_mask BLOB NOT NULL DEFAULT x'',
        duplex_profile_mask BLOB NOT NULL DEFAULT x'',
        last_total_connect_time INTEGER NOT NULL DEFAULT 0,
        last_duplex_connect_time INTEGER NOT NULL DEFAULT 0,
        total_ping_count INTEGER NOT NULL DEFAULT 0,
        last_ping_time INTEGER NOT NULL DEFAULT 0
    );
";

/// Owns the SQLite connection backing both collaborator contracts.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        // WAL lets accounting queries read while sessions are appended.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, for embedding and tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}
