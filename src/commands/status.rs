//! Transport status and persistence commands.

use crate::core::minute_of;
use crate::error::GateError;

use super::logic::{status_snapshot, TransportStatus};
use super::state::GateState;

pub fn transport_status(state: &GateState, transport_id: &str, now: i64) -> Result<TransportStatus, GateError> {
    let profile = state.cache().get_or_load(transport_id)?;
    let guard = profile.lock();
    Ok(status_snapshot(&guard, minute_of(now)))
}

/// IDs of every transport the directory knows about.
pub fn list_transports(state: &GateState) -> Result<Vec<String>, GateError> {
    Ok(state.database.list_transports()?)
}

/// Write dirty profile state back to the directory now.
pub fn flush_profiles(state: &GateState) -> usize {
    let saved = state.cache().flush_dirty();
    if saved > 0 {
        tracing::info!("Flushed {saved} transport profiles");
    }
    saved
}
