//! Transport directory collaborator: resolves transport IDs to stored records
//! and accepts write-back of mutable state.

use dashmap::DashMap;

use crate::core::transport_profile::{TransportRecord, TransportState};
use crate::error::GateError;

/// Synchronous source of transport configuration.
///
/// Implementations report lookup failures (unknown ID, backend offline) as
/// [`GateError::Unavailable`].
pub trait TransportDirectory: Send + Sync {
    fn load_transport(&self, transport_id: &str) -> Result<TransportRecord, GateError>;

    fn save_transport_state(
        &self,
        transport_id: &str,
        state: &TransportState,
    ) -> Result<(), GateError>;
}

/// In-process directory keyed by transport ID.
#[derive(Default)]
pub struct MemoryDirectory {
    records: DashMap<String, TransportRecord>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: TransportRecord) {
        self.records.insert(record.transport_id.clone(), record);
    }

    pub fn get(&self, transport_id: &str) -> Option<TransportRecord> {
        self.records.get(transport_id).map(|r| r.value().clone())
    }
}

impl TransportDirectory for MemoryDirectory {
    fn load_transport(&self, transport_id: &str) -> Result<TransportRecord, GateError> {
        self.get(transport_id)
            .ok_or_else(|| GateError::Unavailable(format!("unknown transport '{transport_id}'")))
    }

    fn save_transport_state(
        &self,
        transport_id: &str,
        state: &TransportState,
    ) -> Result<(), GateError> {
        match self.records.get_mut(transport_id) {
            Some(mut record) => {
                record.state = state.clone();
                Ok(())
            }
            None => Err(GateError::Unavailable(format!(
                "unknown transport '{transport_id}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport_profile::TransportLimits;

    #[test]
    fn test_load_unknown_transport_is_unavailable() {
        let dir = MemoryDirectory::new();
        let err = dir.load_transport("ghost").unwrap_err();
        assert_eq!(err.kind(), "Unavailable");
    }

    #[test]
    fn test_save_state_replaces_stored_state() {
        let dir = MemoryDirectory::new();
        dir.insert(TransportRecord::new("dev1", TransportLimits::default()));

        let state = TransportState {
            total_ping_count: 3,
            last_total_connect_time: 1_700_000_000,
            ..TransportState::default()
        };
        dir.save_transport_state("dev1", &state).unwrap();

        let loaded = dir.load_transport("dev1").unwrap();
        assert_eq!(loaded.state, state);
    }

    #[test]
    fn test_save_state_for_unknown_transport_fails() {
        let dir = MemoryDirectory::new();
        let err = dir
            .save_transport_state("ghost", &TransportState::default())
            .unwrap_err();
        assert_eq!(err.kind(), "Unavailable");
    }
}
