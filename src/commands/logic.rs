//! Pure helpers behind the command handlers.
//!
//! These take plain parameters (no shared state) so they can be unit-tested
//! without a database or network.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::core::{TransportKind, TransportProfile, UsageReport};
use crate::error::GateError;

/// Largest number of rows a ranking query may return.
pub const MAX_TOP_LIMIT: usize = 100;

/// A session as reported by a connection handler.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInput {
    pub transport_id: String,
    pub timestamp: i64,
    pub source_ip: String,
    #[serde(default)]
    pub is_duplex: bool,
    #[serde(default)]
    pub bytes_read: i64,
    #[serde(default)]
    pub bytes_written: i64,
    #[serde(default)]
    pub events_received: i64,
    /// Falls back to the kind implied by `is_duplex`.
    #[serde(default)]
    pub transport_kind: Option<TransportKind>,
}

/// Usage totals plus the derived billable figure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub transport_id: String,
    pub start: i64,
    pub end: i64,
    #[serde(flatten)]
    pub report: UsageReport,
    pub billable_bytes: i64,
}

/// Point-in-time view of one transport's admission state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportStatus {
    pub transport_id: String,
    pub unit_limit_interval_minutes: u32,
    pub total_window_count: u32,
    pub total_minute_count: u32,
    pub total_max_conn: i32,
    pub total_max_conn_per_min: i32,
    pub duplex_window_count: u32,
    pub duplex_minute_count: u32,
    pub duplex_max_conn: i32,
    pub duplex_max_conn_per_min: i32,
    pub last_total_connect_time: i64,
    pub last_duplex_connect_time: i64,
    pub ip_allow_list: String,
    pub ping_count: i32,
    pub max_ping_count: i32,
    pub last_ping_time: i64,
    pub suggested_attributes: Vec<String>,
    pub pending_flush: bool,
}

pub fn parse_source_ip(raw: &str) -> Result<IpAddr, GateError> {
    raw.trim()
        .parse()
        .map_err(|_| GateError::InvalidInput(format!("invalid source IP '{raw}'")))
}

pub fn resolve_kind(kind: Option<TransportKind>, is_duplex: bool) -> TransportKind {
    kind.unwrap_or_else(|| TransportKind::for_session(is_duplex))
}

/// Clamp a requested ranking size to `1..=MAX_TOP_LIMIT`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_TOP_LIMIT)
}

pub fn summarize_usage(transport_id: &str, start: i64, end: i64, report: UsageReport) -> UsageSummary {
    UsageSummary {
        transport_id: transport_id.to_string(),
        start,
        end,
        billable_bytes: report.billable_bytes(),
        report,
    }
}

/// Build a status view of `profile` as seen at minute `now_minute`.
pub fn status_snapshot(profile: &TransportProfile, now_minute: i64) -> TransportStatus {
    let interval = profile.unit_limit_interval_minutes;
    TransportStatus {
        transport_id: profile.transport_id.clone(),
        unit_limit_interval_minutes: interval,
        total_window_count: profile.total_mask.count_in_interval(now_minute, interval),
        total_minute_count: profile.total_mask.count_in_interval(now_minute, 1),
        total_max_conn: profile.total_max_conn,
        total_max_conn_per_min: profile.total_max_conn_per_min,
        duplex_window_count: profile.duplex_mask.count_in_interval(now_minute, interval),
        duplex_minute_count: profile.duplex_mask.count_in_interval(now_minute, 1),
        duplex_max_conn: profile.duplex_max_conn,
        duplex_max_conn_per_min: profile.duplex_max_conn_per_min,
        last_total_connect_time: profile.last_total_connect_time,
        last_duplex_connect_time: profile.last_duplex_connect_time,
        ip_allow_list: profile.ip_allow_list.to_string(),
        ping_count: profile.ping_count,
        max_ping_count: profile.max_ping_count,
        last_ping_time: profile.last_ping_time,
        suggested_attributes: profile.suggested_attributes(),
        pending_flush: profile.is_dirty(),
    }
}
