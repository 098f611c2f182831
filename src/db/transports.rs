//! Transport table: limits plus persisted mask and ping state.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::core::{TransportDirectory, TransportLimits, TransportRecord, TransportState};
use crate::error::GateError;

impl Database {
    /// Insert or replace a transport, limits and state together.
    pub fn upsert_transport(&self, record: &TransportRecord) -> Result<()> {
        let l = &record.limits;
        let s = &record.state;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO transport (transport_id, total_max_conn, total_max_conn_per_min,
                 duplex_max_conn, duplex_max_conn_per_min, unit_limit_interval, ip_address_valid,
                 max_ping_count, total_profile_mask, duplex_profile_mask, last_total_connect_time,
                 last_duplex_connect_time, total_ping_count, last_ping_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                record.transport_id,
                l.total_max_conn,
                l.total_max_conn_per_min,
                l.duplex_max_conn,
                l.duplex_max_conn_per_min,
                l.unit_limit_interval_minutes,
                l.ip_address_valid,
                l.max_ping_count,
                s.total_profile_mask,
                s.duplex_profile_mask,
                s.last_total_connect_time,
                s.last_duplex_connect_time,
                s.total_ping_count,
                s.last_ping_time,
            ],
        )?;
        Ok(())
    }

    /// Load one transport, `None` if the ID is unknown.
    pub fn load_transport_record(&self, transport_id: &str) -> Result<Option<TransportRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT total_max_conn, total_max_conn_per_min, duplex_max_conn, duplex_max_conn_per_min,
                    unit_limit_interval, ip_address_valid, max_ping_count,
                    total_profile_mask, duplex_profile_mask, last_total_connect_time,
                    last_duplex_connect_time, total_ping_count, last_ping_time
             FROM transport WHERE transport_id = ?1",
        )?;

        let record = stmt
            .query_row(params![transport_id], |row| {
                Ok(TransportRecord {
                    transport_id: transport_id.to_string(),
                    limits: TransportLimits {
                        total_max_conn: row.get(0)?,
                        total_max_conn_per_min: row.get(1)?,
                        duplex_max_conn: row.get(2)?,
                        duplex_max_conn_per_min: row.get(3)?,
                        unit_limit_interval_minutes: row.get(4)?,
                        ip_address_valid: row.get(5)?,
                        max_ping_count: row.get(6)?,
                    },
                    state: TransportState {
                        total_profile_mask: row.get(7)?,
                        duplex_profile_mask: row.get(8)?,
                        last_total_connect_time: row.get(9)?,
                        last_duplex_connect_time: row.get(10)?,
                        total_ping_count: row.get(11)?,
                        last_ping_time: row.get(12)?,
                    },
                })
            })
            .optional()?;
        Ok(record)
    }

    /// Write back mutable state. Returns the number of rows updated.
    pub fn update_transport_state(&self, transport_id: &str, s: &TransportState) -> Result<usize> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "UPDATE transport SET total_profile_mask = ?2, duplex_profile_mask = ?3,
                 last_total_connect_time = ?4, last_duplex_connect_time = ?5,
                 total_ping_count = ?6, last_ping_time = ?7
             WHERE transport_id = ?1",
        )?;
        let updated = stmt.execute(params![
            transport_id,
            s.total_profile_mask,
            s.duplex_profile_mask,
            s.last_total_connect_time,
            s.last_duplex_connect_time,
            s.total_ping_count,
            s.last_ping_time,
        ])?;
        Ok(updated)
    }

    /// All known transport IDs, sorted.
    pub fn list_transports(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT transport_id FROM transport ORDER BY transport_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

impl TransportDirectory for Database {
    fn load_transport(&self, transport_id: &str) -> Result<TransportRecord, GateError> {
        self.load_transport_record(transport_id)?
            .ok_or_else(|| GateError::Unavailable(format!("unknown transport '{transport_id}'")))
    }

    fn save_transport_state(&self, transport_id: &str, state: &TransportState) -> Result<(), GateError> {
        match self.update_transport_state(transport_id, state)? {
            0 => Err(GateError::Unavailable(format!(
                "cannot save state for unknown transport '{transport_id}'"
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Arc;

    use super::super::tests::open_memory_db;
    use super::*;
    use crate::core::{AdmissionController, Decision, ProfileCache};

    fn limits(total_max_conn_per_min: i32) -> TransportLimits {
        TransportLimits {
            total_max_conn_per_min,
            ip_address_valid: "10.0.0.0/8".to_string(),
            max_ping_count: 3,
            ..TransportLimits::default()
        }
    }

    #[test]
    fn test_upsert_and_load_transport() {
        let db = open_memory_db();
        let mut record = TransportRecord::new("dev1", limits(2));
        record.state.total_profile_mask = vec![0b0000_0101; 8];
        record.state.last_total_connect_time = 1_700_000_000;
        db.upsert_transport(&record).unwrap();

        let loaded = db.load_transport_record("dev1").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(db.load_transport_record("dev2").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let db = open_memory_db();
        db.upsert_transport(&TransportRecord::new("dev1", limits(2))).unwrap();
        db.upsert_transport(&TransportRecord::new("dev1", limits(5))).unwrap();

        let loaded = db.load_transport("dev1").unwrap();
        assert_eq!(loaded.limits.total_max_conn_per_min, 5);
        assert_eq!(db.list_transports().unwrap(), vec!["dev1".to_string()]);
    }

    #[test]
    fn test_update_state_keeps_limits() {
        let db = open_memory_db();
        db.upsert_transport(&TransportRecord::new("dev1", limits(2))).unwrap();

        let state = TransportState {
            duplex_profile_mask: vec![1, 2, 3],
            total_ping_count: 2,
            last_ping_time: 99,
            ..TransportState::default()
        };
        db.save_transport_state("dev1", &state).unwrap();

        let loaded = db.load_transport("dev1").unwrap();
        assert_eq!(loaded.state, state);
        assert_eq!(loaded.limits, limits(2));
    }

    #[test]
    fn test_unknown_transport_is_unavailable() {
        let db = open_memory_db();
        let err = db.load_transport("ghost").unwrap_err();
        assert_eq!(err.kind(), "Unavailable");
        let err = db
            .save_transport_state("ghost", &TransportState::default())
            .unwrap_err();
        assert_eq!(err.kind(), "Unavailable");
    }

    #[test]
    fn test_list_transports_sorted() {
        let db = open_memory_db();
        for id in ["c", "a", "b"] {
            db.upsert_transport(&TransportRecord::new(id, limits(0))).unwrap();
        }
        assert_eq!(db.list_transports().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_admission_state_survives_reload_from_sqlite() {
        let db = Arc::new(open_memory_db());
        db.upsert_transport(&TransportRecord::new("dev1", limits(1))).unwrap();
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        let now = 1_700_000_000;

        let controller = AdmissionController::new(Arc::new(ProfileCache::new(db.clone())));
        assert_eq!(controller.authorize_transport("dev1", false, ip, now).unwrap(), Decision::Accept);
        assert_eq!(controller.cache().flush_dirty(), 1);

        // A fresh cache reloads the mask and keeps enforcing the per-minute limit.
        let controller = AdmissionController::new(Arc::new(ProfileCache::new(db.clone())));
        assert_eq!(
            controller.authorize_transport("dev1", false, ip, now + 10).unwrap(),
            Decision::RejectRate
        );
        assert_eq!(
            controller.authorize_transport("dev1", false, "192.168.0.1".parse().unwrap(), now).unwrap(),
            Decision::RejectIp
        );
    }
}
