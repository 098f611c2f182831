//! Session statistics table: append and range aggregation.

use std::net::IpAddr;

use anyhow::Result;
use rusqlite::params;
use rusqlite::types::Type;
use serde::Serialize;

use super::Database;
use crate::core::{SessionRecord, SessionStore, TransportKind, UsageReport};
use crate::error::GateError;

/// Per-transport traffic totals over a time window.
#[derive(Debug, Clone, Serialize)]
pub struct TransportUsageSummary {
    pub transport_id: String,
    pub total_read: i64,
    pub total_written: i64,
    pub total_overhead: i64,
    pub total_bytes: i64,
    pub sessions: u64,
}

impl Database {
    /// Append one session row.
    pub fn insert_session(&self, r: &SessionRecord) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO session_stats (transport_id, timestamp, source_ip, is_duplex, transport_kind,
                                        bytes_read, bytes_written, events_received, overhead_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        stmt.execute(params![
            r.transport_id,
            r.timestamp,
            r.source_ip.to_string(),
            r.is_duplex,
            r.transport_kind.as_str(),
            r.bytes_read,
            r.bytes_written,
            r.events_received,
            r.overhead_bytes,
        ])?;
        Ok(())
    }

    /// Sessions for a transport with `start <= timestamp < end`, oldest first.
    pub fn query_sessions(&self, transport_id: &str, start: i64, end: i64) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT transport_id, timestamp, source_ip, is_duplex, transport_kind,
                    bytes_read, bytes_written, events_received, overhead_bytes
             FROM session_stats
             WHERE transport_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![transport_id, start, end], map_session_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Aggregate usage for a transport over `[start, end)` in one query.
    pub fn session_usage(&self, transport_id: &str, start: i64, end: i64) -> Result<UsageReport> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COALESCE(SUM(bytes_read), 0),
                    COALESCE(SUM(bytes_written), 0),
                    COALESCE(SUM(overhead_bytes), 0),
                    COALESCE(SUM(events_received), 0),
                    COALESCE(SUM(CASE WHEN is_duplex = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_duplex != 0 THEN 1 ELSE 0 END), 0)
             FROM session_stats
             WHERE transport_id = ?1 AND timestamp >= ?2 AND timestamp < ?3",
        )?;

        let report = stmt.query_row(params![transport_id, start, end], |row| {
            Ok(UsageReport {
                bytes_read: row.get(0)?,
                bytes_written: row.get(1)?,
                overhead_bytes: row.get(2)?,
                events_received: row.get(3)?,
                total_connections: row.get::<_, i64>(4)? as u64,
                duplex_connections: row.get::<_, i64>(5)? as u64,
            })
        })?;
        Ok(report)
    }

    /// Transports ranked by payload plus overhead over `[start, end)`.
    pub fn top_transports(&self, start: i64, end: i64, limit: usize) -> Result<Vec<TransportUsageSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT transport_id,
                    SUM(bytes_read) AS total_read,
                    SUM(bytes_written) AS total_written,
                    SUM(overhead_bytes) AS total_overhead,
                    SUM(bytes_read) + SUM(bytes_written) + SUM(overhead_bytes) AS total_bytes,
                    COUNT(*) AS sessions
             FROM session_stats
             WHERE timestamp >= ?1 AND timestamp < ?2
             GROUP BY transport_id
             ORDER BY total_bytes DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![start, end, limit as i64], |row| {
            Ok(TransportUsageSummary {
                transport_id: row.get(0)?,
                total_read: row.get(1)?,
                total_written: row.get(2)?,
                total_overhead: row.get(3)?,
                total_bytes: row.get(4)?,
                sessions: row.get::<_, i64>(5)? as u64,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

impl SessionStore for Database {
    fn append(&self, record: &SessionRecord) -> Result<(), GateError> {
        Ok(self.insert_session(record)?)
    }

    fn records_in_range(&self, transport_id: &str, start: i64, end: i64) -> Result<Vec<SessionRecord>, GateError> {
        Ok(self.query_sessions(transport_id, start, end)?)
    }

    fn usage_in_range(&self, transport_id: &str, start: i64, end: i64) -> Result<UsageReport, GateError> {
        Ok(self.session_usage(transport_id, start, end)?)
    }
}

fn map_session_row(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
    let source_ip: String = row.get(2)?;
    let source_ip = source_ip
        .parse::<IpAddr>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let kind: String = row.get(4)?;
    let transport_kind = kind
        .parse::<TransportKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(SessionRecord {
        transport_id: row.get(0)?,
        timestamp: row.get(1)?,
        source_ip,
        is_duplex: row.get(3)?,
        transport_kind,
        bytes_read: row.get(5)?,
        bytes_written: row.get(6)?,
        events_received: row.get(7)?,
        overhead_bytes: row.get(8)?,
    })
}
