//! Session admission and accounting commands.

use crate::core::{Decision, SessionRecord};
use crate::error::GateError;

use super::logic::{parse_source_ip, resolve_kind, SessionInput};
use super::state::GateState;

/// Decide whether an inbound session from `source_ip` may proceed.
pub fn authorize_session(
    state: &GateState,
    transport_id: &str,
    is_duplex: bool,
    source_ip: &str,
    now: i64,
) -> Result<Decision, GateError> {
    let ip = parse_source_ip(source_ip)?;
    state.controller.authorize_transport(transport_id, is_duplex, ip, now)
}

/// Record a completed session with its overhead.
pub fn record_session(state: &GateState, input: SessionInput) -> Result<SessionRecord, GateError> {
    let ip = parse_source_ip(&input.source_ip)?;
    let kind = resolve_kind(input.transport_kind, input.is_duplex);
    state.accountant.record(
        &input.transport_id,
        input.timestamp,
        ip,
        input.is_duplex,
        input.bytes_read,
        input.bytes_written,
        input.events_received,
        kind,
    )
}
