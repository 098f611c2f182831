//! Usage reporting commands.

use crate::core::accounting::validate_range;
use crate::db::TransportUsageSummary;
use crate::error::GateError;

use super::logic::{clamp_limit, summarize_usage, UsageSummary};
use super::state::GateState;

/// Usage for one transport over `[start, end)`.
pub fn usage_report(state: &GateState, transport_id: &str, start: i64, end: i64) -> Result<UsageSummary, GateError> {
    let report = state.accountant.usage_report(transport_id, start, end)?;
    Ok(summarize_usage(transport_id, start, end, report))
}

/// Heaviest transports over `[start, end)`.
pub fn top_transports(
    state: &GateState,
    start: i64,
    end: i64,
    limit: usize,
) -> Result<Vec<TransportUsageSummary>, GateError> {
    validate_range(start, end)?;
    Ok(state.database.top_transports(start, end, clamp_limit(limit))?)
}
