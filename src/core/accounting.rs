//! Per-session byte and packet accounting.
//!
//! Every completed session becomes one immutable [`SessionRecord`] carrying
//! payload byte counts plus the protocol framing overhead charged for it.
//! Aggregate queries use the half-open range `[start, end)`.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// IP header, per packet.
pub const IP_OVERHEAD: i64 = 20;
/// UDP + IP headers, per datagram.
pub const UDP_OVERHEAD: i64 = 8 + IP_OVERHEAD;
/// TCP + IP headers, per packet.
pub const TCP_OVERHEAD: i64 = 24 + IP_OVERHEAD;
/// Handshake and teardown, once per TCP session.
pub const TCP_SESSION_OVERHEAD: i64 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Tcp,
}

impl TransportKind {
    /// Protocol assumed when the caller does not know it: duplex sessions
    /// run over TCP, simplex sessions over UDP.
    pub fn for_session(is_duplex: bool) -> Self {
        if is_duplex {
            TransportKind::Tcp
        } else {
            TransportKind::Udp
        }
    }

    /// Framing bytes charged for a session of `packets` packets.
    pub fn session_overhead(self, packets: i64) -> i64 {
        match self {
            TransportKind::Udp => UDP_OVERHEAD * packets,
            TransportKind::Tcp => TCP_OVERHEAD * packets + TCP_SESSION_OVERHEAD,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
        }
    }
}

impl FromStr for TransportKind {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportKind::Udp),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(GateError::InvalidInput(format!("unknown transport kind '{other}'"))),
        }
    }
}

/// One completed device session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub transport_id: String,
    pub timestamp: i64,
    pub source_ip: IpAddr,
    pub is_duplex: bool,
    pub transport_kind: TransportKind,
    pub bytes_read: i64,
    pub bytes_written: i64,
    pub events_received: i64,
    pub overhead_bytes: i64,
}

/// Aggregates over a set of session records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub bytes_read: i64,
    pub bytes_written: i64,
    pub overhead_bytes: i64,
    pub events_received: i64,
    /// Simplex (non-duplex) sessions.
    pub total_connections: u64,
    pub duplex_connections: u64,
}

impl UsageReport {
    pub fn add(&mut self, record: &SessionRecord) {
        self.bytes_read += record.bytes_read;
        self.bytes_written += record.bytes_written;
        self.overhead_bytes += record.overhead_bytes;
        self.events_received += record.events_received;
        if record.is_duplex {
            self.duplex_connections += 1;
        } else {
            self.total_connections += 1;
        }
    }

    /// Payload plus overhead, both directions.
    pub fn billable_bytes(&self) -> i64 {
        self.bytes_read + self.bytes_written + self.overhead_bytes
    }
}

/// Append-only accounting store collaborator.
pub trait SessionStore: Send + Sync {
    fn append(&self, record: &SessionRecord) -> Result<(), GateError>;

    /// Records for `transport_id` with `start <= timestamp < end`, oldest first.
    fn records_in_range(
        &self,
        transport_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<SessionRecord>, GateError>;

    fn usage_in_range(
        &self,
        transport_id: &str,
        start: i64,
        end: i64,
    ) -> Result<UsageReport, GateError> {
        let mut report = UsageReport::default();
        for record in self.records_in_range(transport_id, start, end)? {
            report.add(&record);
        }
        Ok(report)
    }
}

/// In-process store. Appends for different transports never contend.
#[derive(Default)]
pub struct MemorySessionStore {
    records: DashMap<String, Vec<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn append(&self, record: &SessionRecord) -> Result<(), GateError> {
        self.records
            .entry(record.transport_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn records_in_range(
        &self,
        transport_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<SessionRecord>, GateError> {
        let Some(records) = self.records.get(transport_id) else {
            return Ok(Vec::new());
        };
        let mut matching: Vec<SessionRecord> = records
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.timestamp);
        Ok(matching)
    }
}

pub struct SessionAccountant {
    store: Arc<dyn SessionStore>,
}

impl SessionAccountant {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Record a completed session, charging one packet of framing overhead
    /// (plus session setup for TCP).
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        transport_id: &str,
        timestamp: i64,
        source_ip: IpAddr,
        is_duplex: bool,
        bytes_read: i64,
        bytes_written: i64,
        events_received: i64,
        transport_kind: TransportKind,
    ) -> Result<SessionRecord, GateError> {
        if bytes_read < 0 || bytes_written < 0 {
            return Err(GateError::InvalidInput(format!(
                "negative byte count for '{transport_id}': read={bytes_read} written={bytes_written}"
            )));
        }
        if events_received < 0 {
            return Err(GateError::InvalidInput(format!(
                "negative event count for '{transport_id}': {events_received}"
            )));
        }

        let record = SessionRecord {
            transport_id: transport_id.to_string(),
            timestamp,
            source_ip,
            is_duplex,
            transport_kind,
            bytes_read,
            bytes_written,
            events_received,
            overhead_bytes: transport_kind.session_overhead(1),
        };
        self.store.append(&record)?;

        tracing::debug!(
            "Session '{transport_id}' from {source_ip}: read={bytes_read} written={bytes_written} overhead={} events={events_received} ({})",
            record.overhead_bytes,
            transport_kind.as_str()
        );
        Ok(record)
    }

    /// `(bytes_read, bytes_written)` summed over `[start, end)`.
    pub fn byte_counts(&self, transport_id: &str, start: i64, end: i64) -> Result<(i64, i64), GateError> {
        let report = self.usage_report(transport_id, start, end)?;
        Ok((report.bytes_read, report.bytes_written))
    }

    /// `(total, duplex)` session counts over `[start, end)`, partitioned by
    /// the duplex flag.
    pub fn connection_counts(
        &self,
        transport_id: &str,
        start: i64,
        end: i64,
    ) -> Result<(u64, u64), GateError> {
        let report = self.usage_report(transport_id, start, end)?;
        Ok((report.total_connections, report.duplex_connections))
    }

    pub fn usage_report(&self, transport_id: &str, start: i64, end: i64) -> Result<UsageReport, GateError> {
        validate_range(start, end)?;
        self.store.usage_in_range(transport_id, start, end)
    }

    pub fn sessions(&self, transport_id: &str, start: i64, end: i64) -> Result<Vec<SessionRecord>, GateError> {
        validate_range(start, end)?;
        self.store.records_in_range(transport_id, start, end)
    }
}

pub(crate) fn validate_range(start: i64, end: i64) -> Result<(), GateError> {
    if start > end {
        return Err(GateError::InvalidRange(format!(
            "range start {start} is after end {end}"
        )));
    }
    Ok(())
}
