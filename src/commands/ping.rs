//! Operator ping ("locate now") command.

use crate::dispatch::{DeviceRef, ResultCode, DEFAULT_COMMAND_TYPE, PING_COMMAND};
use crate::error::GateError;

use super::state::GateState;

/// Ask the device to report in, charging its ping budget on success.
///
/// Returns the result code rather than failing: over-limit and unsupported
/// devices are refused without anything being sent.
pub async fn ping_device(
    state: &GateState,
    transport_id: &str,
    device: &DeviceRef,
    now: i64,
) -> Result<ResultCode, GateError> {
    let profile = state.cache().get_or_load(transport_id)?;

    if !state.dispatcher.is_ping_supported(device) {
        return Ok(ResultCode::NotSupported);
    }
    // Check and claim the slot in one critical section; the lock is not held
    // across the send.
    if !profile.lock().try_reserve_ping() {
        tracing::info!("Ping for '{transport_id}' refused: ping limit reached");
        return Ok(ResultCode::OverLimit);
    }

    let response = state
        .dispatcher
        .dispatch(device, DEFAULT_COMMAND_TYPE, PING_COMMAND, &[])
        .await;

    let mut guard = profile.lock();
    if response.is_success() {
        if guard.commit_ping(now) {
            tracing::info!("Transport '{transport_id}' has used its ping budget ({})", guard.ping_count);
        }
    } else {
        guard.release_ping();
    }
    Ok(response.result)
}
