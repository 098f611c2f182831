//! Per-transport admission configuration and mutable connection state.
//!
//! A [`TransportProfile`] is built from a [`TransportRecord`] handed out by the
//! transport directory. Static limits come from [`TransportLimits`]; the parts
//! that change on every accepted connection or ping are round-tripped through
//! [`TransportState`] so they survive restarts.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_LIMIT_INTERVAL_MINUTES;
use crate::core::ip_list::IpAllowList;
use crate::core::profile_mask::ProfileMask;
use crate::error::GateError;

/// Operator-configured limits. Zero or negative limits mean "unlimited".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportLimits {
    pub total_max_conn: i32,
    pub total_max_conn_per_min: i32,
    pub duplex_max_conn: i32,
    pub duplex_max_conn_per_min: i32,
    pub unit_limit_interval_minutes: u32,
    /// Stored allow-list form, see [`IpAllowList`].
    pub ip_address_valid: String,
    pub max_ping_count: i32,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            total_max_conn: 0,
            total_max_conn_per_min: 0,
            duplex_max_conn: 0,
            duplex_max_conn_per_min: 0,
            unit_limit_interval_minutes: DEFAULT_LIMIT_INTERVAL_MINUTES,
            ip_address_valid: String::new(),
            max_ping_count: 0,
        }
    }
}

/// Persisted mutable state of a transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportState {
    pub total_profile_mask: Vec<u8>,
    pub duplex_profile_mask: Vec<u8>,
    pub last_total_connect_time: i64,
    pub last_duplex_connect_time: i64,
    pub total_ping_count: i32,
    pub last_ping_time: i64,
}

/// What the transport directory stores for one transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRecord {
    pub transport_id: String,
    #[serde(default)]
    pub limits: TransportLimits,
    #[serde(default)]
    pub state: TransportState,
}

impl TransportRecord {
    pub fn new(transport_id: impl Into<String>, limits: TransportLimits) -> Self {
        Self {
            transport_id: transport_id.into(),
            limits,
            state: TransportState::default(),
        }
    }
}

/// Budget selected for one kind of session.
pub struct Budget<'a> {
    pub mask: &'a ProfileMask,
    pub max_conn: i32,
    pub max_conn_per_min: i32,
}

#[derive(Debug, Clone)]
pub struct TransportProfile {
    pub transport_id: String,
    pub total_mask: ProfileMask,
    pub duplex_mask: ProfileMask,
    pub total_max_conn: i32,
    pub total_max_conn_per_min: i32,
    pub duplex_max_conn: i32,
    pub duplex_max_conn_per_min: i32,
    pub unit_limit_interval_minutes: u32,
    pub last_total_connect_time: i64,
    pub last_duplex_connect_time: i64,
    pub ip_allow_list: IpAllowList,
    pub ping_count: i32,
    pub max_ping_count: i32,
    pub last_ping_time: i64,
    pending_pings: i32,
    dirty: bool,
}

impl TransportProfile {
    /// Build a live profile from its stored record.
    ///
    /// A zero limit interval falls back to [`DEFAULT_LIMIT_INTERVAL_MINUTES`];
    /// masks stored at a different width are resized to the interval.
    pub fn from_record(record: TransportRecord) -> Result<Self, GateError> {
        let TransportRecord {
            transport_id,
            limits,
            state,
        } = record;

        let interval = if limits.unit_limit_interval_minutes == 0 {
            DEFAULT_LIMIT_INTERVAL_MINUTES
        } else {
            limits.unit_limit_interval_minutes
        };
        let ip_allow_list: IpAllowList = limits.ip_address_valid.parse()?;

        let mut total_mask =
            ProfileMask::from_bytes(state.total_profile_mask, state.last_total_connect_time);
        total_mask.set_limit_interval(interval);
        let mut duplex_mask =
            ProfileMask::from_bytes(state.duplex_profile_mask, state.last_duplex_connect_time);
        duplex_mask.set_limit_interval(interval);

        Ok(Self {
            transport_id,
            total_mask,
            duplex_mask,
            total_max_conn: limits.total_max_conn,
            total_max_conn_per_min: limits.total_max_conn_per_min,
            duplex_max_conn: limits.duplex_max_conn,
            duplex_max_conn_per_min: limits.duplex_max_conn_per_min,
            unit_limit_interval_minutes: interval,
            last_total_connect_time: state.last_total_connect_time,
            last_duplex_connect_time: state.last_duplex_connect_time,
            ip_allow_list,
            ping_count: state.total_ping_count,
            max_ping_count: limits.max_ping_count,
            last_ping_time: state.last_ping_time,
            pending_pings: 0,
            dirty: false,
        })
    }

    pub fn is_ip_allowed(&self, addr: IpAddr) -> bool {
        self.ip_allow_list.allows(addr)
    }

    /// Count one ping. Returns true once the ping budget is used up; always
    /// false when `max_ping_count <= 0`.
    pub fn record_ping(&mut self) -> bool {
        self.ping_count = self.ping_count.saturating_add(1);
        self.dirty = true;
        self.exceeds_max_ping_count()
    }

    /// True if no further pings may be sent.
    pub fn exceeds_max_ping_count(&self) -> bool {
        self.max_ping_count > 0 && self.ping_count >= self.max_ping_count
    }

    /// Claim a ping slot before sending. Slots held by in-flight pings count
    /// against the budget, so concurrent senders cannot overshoot it.
    /// Returns false when the budget is already spent or fully claimed.
    pub fn try_reserve_ping(&mut self) -> bool {
        if self.max_ping_count > 0
            && self.ping_count.saturating_add(self.pending_pings) >= self.max_ping_count
        {
            return false;
        }
        self.pending_pings += 1;
        true
    }

    /// Turn a reserved slot into a counted ping stamped at `now`.
    /// Returns true once the ping budget is used up.
    pub fn commit_ping(&mut self, now: i64) -> bool {
        self.pending_pings = self.pending_pings.saturating_sub(1).max(0);
        self.last_ping_time = self.last_ping_time.max(now);
        self.record_ping()
    }

    /// Give back a reserved slot whose ping was not acknowledged.
    pub fn release_ping(&mut self) {
        self.pending_pings = self.pending_pings.saturating_sub(1).max(0);
    }

    pub fn pending_pings(&self) -> i32 {
        self.pending_pings
    }

    pub fn budget(&self, is_duplex: bool) -> Budget<'_> {
        if is_duplex {
            Budget {
                mask: &self.duplex_mask,
                max_conn: self.duplex_max_conn,
                max_conn_per_min: self.duplex_max_conn_per_min,
            }
        } else {
            Budget {
                mask: &self.total_mask,
                max_conn: self.total_max_conn,
                max_conn_per_min: self.total_max_conn_per_min,
            }
        }
    }

    /// Record an accepted connection into the matching mask and timestamp.
    ///
    /// The stored connect time never moves backwards: it is the mask anchor
    /// on reload, so it must stay on the latest recorded minute.
    pub(crate) fn record_connection(&mut self, is_duplex: bool, now: i64, now_minute: i64) {
        if is_duplex {
            self.duplex_mask.record_connection(now_minute);
            self.last_duplex_connect_time = self.last_duplex_connect_time.max(now);
        } else {
            self.total_mask.record_connection(now_minute);
            self.last_total_connect_time = self.last_total_connect_time.max(now);
        }
        self.dirty = true;
    }

    /// Snapshot of everything that must be written back to the directory.
    pub fn state(&self) -> TransportState {
        TransportState {
            total_profile_mask: self.total_mask.as_bytes().to_vec(),
            duplex_profile_mask: self.duplex_mask.as_bytes().to_vec(),
            last_total_connect_time: self.last_total_connect_time,
            last_duplex_connect_time: self.last_duplex_connect_time,
            total_ping_count: self.ping_count,
            last_ping_time: self.last_ping_time,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the dirty flag, returning whether it was set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Device-side communication settings matching this transport's limits,
    /// as `key=value` strings.
    pub fn suggested_attributes(&self) -> Vec<String> {
        let interval_secs = i64::from(self.unit_limit_interval_minutes) * 60;

        let min_delay = if self.duplex_max_conn > 0 {
            let delay = (interval_secs as f64 / f64::from(self.duplex_max_conn)).round() as i64;
            delay.max(60)
        } else {
            60
        };

        let per_min_rate = |max_per_min: i32| {
            if max_per_min > 0 {
                (60.0 / f64::from(max_per_min)).round() as i64
            } else {
                0
            }
        };
        let min_rate = per_min_rate(self.total_max_conn_per_min)
            .max(per_min_rate(self.duplex_max_conn_per_min));

        vec![
            format!(
                "com.maxconn={},{},{}",
                self.total_max_conn, self.duplex_max_conn, self.unit_limit_interval_minutes
            ),
            format!("com.mindelay={min_delay}"),
            format!("com.minrate={min_rate}"),
            "com.maxrate=3600".to_string(),
            "com.maxduplex=10".to_string(),
            "com.maxsimplex=2".to_string(),
        ]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::profile_mask::minute_of;

    pub(crate) fn make_record(id: &str, total_max: i32, duplex_max: i32) -> TransportRecord {
        TransportRecord::new(
            id,
            TransportLimits {
                total_max_conn: total_max,
                duplex_max_conn: duplex_max,
                ..TransportLimits::default()
            },
        )
    }

    #[test]
    fn test_from_record_defaults_zero_interval() {
        let mut record = make_record("dev1", 3, 2);
        record.limits.unit_limit_interval_minutes = 0;
        let profile = TransportProfile::from_record(record).unwrap();
        assert_eq!(profile.unit_limit_interval_minutes, DEFAULT_LIMIT_INTERVAL_MINUTES);
        assert_eq!(profile.total_mask.slot_count(), 64);
        assert_eq!(profile.duplex_mask.slot_count(), 64);
        assert!(!profile.is_dirty());
    }

    #[test]
    fn test_from_record_rejects_bad_allow_list() {
        let mut record = make_record("dev1", 3, 2);
        record.limits.ip_address_valid = "10.0.0.0/8,bogus".into();
        let err = TransportProfile::from_record(record).unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[test]
    fn test_is_ip_allowed() {
        let mut record = make_record("dev1", 0, 0);
        let open = TransportProfile::from_record(record.clone()).unwrap();
        assert!(open.is_ip_allowed("1.2.3.4".parse().unwrap()));

        record.limits.ip_address_valid = "192.168.1.0/24".into();
        let restricted = TransportProfile::from_record(record).unwrap();
        assert!(restricted.is_ip_allowed("192.168.1.9".parse().unwrap()));
        assert!(!restricted.is_ip_allowed("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn test_record_ping_reaches_limit() {
        let mut record = make_record("dev1", 0, 0);
        record.limits.max_ping_count = 2;
        let mut profile = TransportProfile::from_record(record).unwrap();
        assert!(!profile.record_ping());
        assert!(profile.record_ping());
        assert_eq!(profile.ping_count, 2);
        assert!(profile.exceeds_max_ping_count());
        assert!(profile.is_dirty());
    }

    #[test]
    fn test_record_ping_unlimited_never_reaches_limit() {
        let mut profile = TransportProfile::from_record(make_record("dev1", 0, 0)).unwrap();
        for _ in 0..100 {
            assert!(!profile.record_ping());
        }
        assert_eq!(profile.ping_count, 100);
    }

    #[test]
    fn test_ping_reservation_holds_budget() {
        let mut record = make_record("dev1", 0, 0);
        record.limits.max_ping_count = 1;
        let mut profile = TransportProfile::from_record(record).unwrap();

        assert!(profile.try_reserve_ping());
        // The in-flight ping already claims the only slot.
        assert!(!profile.try_reserve_ping());
        profile.release_ping();
        assert_eq!(profile.pending_pings(), 0);
        assert_eq!(profile.ping_count, 0);

        assert!(profile.try_reserve_ping());
        assert!(profile.commit_ping(42));
        assert_eq!(profile.ping_count, 1);
        assert_eq!(profile.last_ping_time, 42);
        assert_eq!(profile.pending_pings(), 0);
        assert!(!profile.try_reserve_ping());
    }

    #[test]
    fn test_ping_reservation_unlimited() {
        let mut profile = TransportProfile::from_record(make_record("dev1", 0, 0)).unwrap();
        for _ in 0..10 {
            assert!(profile.try_reserve_ping());
        }
        assert_eq!(profile.pending_pings(), 10);
    }

    #[test]
    fn test_clock_backwards_keeps_latest_connect_time() {
        let mut profile = TransportProfile::from_record(make_record("dev1", 5, 0)).unwrap();
        let now = 1_700_000_000;
        profile.record_connection(false, now, minute_of(now));
        profile.record_connection(false, now - 120, minute_of(now - 120));
        assert_eq!(profile.last_total_connect_time, now);

        let mut record = make_record("dev1", 5, 0);
        record.state = profile.state();
        let restored = TransportProfile::from_record(record).unwrap();
        assert_eq!(restored.total_mask, profile.total_mask);
        assert_eq!(
            restored.total_mask.count_in_interval(minute_of(now), 60),
            profile.total_mask.count_in_interval(minute_of(now), 60)
        );
        assert_eq!(restored.total_mask.count_in_interval(minute_of(now), 1), 1);
    }

    #[test]
    fn test_state_round_trips_through_record() {
        let mut profile = TransportProfile::from_record(make_record("dev1", 5, 5)).unwrap();
        let now = 1_700_000_000;
        profile.record_connection(false, now, minute_of(now));
        profile.record_connection(true, now + 120, minute_of(now + 120));
        profile.record_ping();
        profile.last_ping_time = now + 5;

        let mut record = make_record("dev1", 5, 5);
        record.state = profile.state();
        let restored = TransportProfile::from_record(record).unwrap();

        assert_eq!(restored.total_mask, profile.total_mask);
        assert_eq!(restored.duplex_mask, profile.duplex_mask);
        assert_eq!(restored.last_total_connect_time, now);
        assert_eq!(restored.last_duplex_connect_time, now + 120);
        assert_eq!(restored.ping_count, 1);
        assert_eq!(restored.last_ping_time, now + 5);
    }

    #[test]
    fn test_take_dirty_clears_flag() {
        let mut profile = TransportProfile::from_record(make_record("dev1", 0, 0)).unwrap();
        profile.mark_dirty();
        assert!(profile.take_dirty());
        assert!(!profile.take_dirty());
    }

    #[test]
    fn test_budget_selects_by_session_kind() {
        let mut record = make_record("dev1", 20, 12);
        record.limits.total_max_conn_per_min = 4;
        record.limits.duplex_max_conn_per_min = 2;
        let profile = TransportProfile::from_record(record).unwrap();

        let total = profile.budget(false);
        assert_eq!((total.max_conn, total.max_conn_per_min), (20, 4));
        let duplex = profile.budget(true);
        assert_eq!((duplex.max_conn, duplex.max_conn_per_min), (12, 2));
    }

    #[test]
    fn test_suggested_attributes() {
        let mut record = make_record("dev1", 20, 12);
        record.limits.total_max_conn_per_min = 4;
        record.limits.duplex_max_conn_per_min = 2;
        let profile = TransportProfile::from_record(record).unwrap();

        assert_eq!(
            profile.suggested_attributes(),
            vec![
                "com.maxconn=20,12,60",
                "com.mindelay=300",
                "com.minrate=30",
                "com.maxrate=3600",
                "com.maxduplex=10",
                "com.maxsimplex=2",
            ]
        );
    }

    #[test]
    fn test_suggested_attributes_unlimited() {
        let profile = TransportProfile::from_record(make_record("dev1", 0, 0)).unwrap();
        let attrs = profile.suggested_attributes();
        assert_eq!(attrs[1], "com.mindelay=60");
        assert_eq!(attrs[2], "com.minrate=0");
    }
}
