//! Connection admission: IP allow-list check, then interval-wide and per-minute
//! budget checks against the transport's rolling mask.
//!
//! [`authorize`] is the decision algorithm over an exclusively borrowed
//! profile. [`AdmissionController`] wraps it with the per-transport profile
//! cache so that the check-then-record sequence always runs under that
//! transport's own mutex.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::directory::TransportDirectory;
use crate::core::profile_mask::minute_of;
use crate::core::transport_profile::TransportProfile;
use crate::error::GateError;

/// Outcome of an admission check. Rejections are expected outcomes, not faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accept,
    RejectIp,
    RejectRate,
}

impl Decision {
    pub fn is_accept(self) -> bool {
        self == Decision::Accept
    }
}

/// Decide whether a session may proceed, recording it on acceptance.
///
/// A rejected attempt leaves masks and timestamps untouched.
pub fn authorize(
    profile: &mut TransportProfile,
    is_duplex: bool,
    source_ip: IpAddr,
    now: i64,
) -> Decision {
    if !profile.is_ip_allowed(source_ip) {
        return Decision::RejectIp;
    }

    let now_minute = minute_of(now);
    let budget = profile.budget(is_duplex);

    let window_count = budget
        .mask
        .count_in_interval(now_minute, profile.unit_limit_interval_minutes);
    if budget.max_conn > 0 && i64::from(window_count) >= i64::from(budget.max_conn) {
        return Decision::RejectRate;
    }

    let recent_count = budget.mask.count_in_interval(now_minute, 1);
    if budget.max_conn_per_min > 0 && i64::from(recent_count) >= i64::from(budget.max_conn_per_min)
    {
        return Decision::RejectRate;
    }

    profile.record_connection(is_duplex, now, now_minute);
    Decision::Accept
}

/// Process-lifetime cache of live transport profiles, one mutex per transport.
pub struct ProfileCache {
    directory: Arc<dyn TransportDirectory>,
    profiles: DashMap<String, Arc<Mutex<TransportProfile>>>,
}

impl ProfileCache {
    pub fn new(directory: Arc<dyn TransportDirectory>) -> Self {
        Self {
            directory,
            profiles: DashMap::new(),
        }
    }

    /// Return the cached profile, loading it from the directory on first use.
    ///
    /// When two callers race on the first load, the first inserted profile wins
    /// and the other load is discarded.
    pub fn get_or_load(&self, transport_id: &str) -> Result<Arc<Mutex<TransportProfile>>, GateError> {
        if let Some(profile) = self.profiles.get(transport_id) {
            return Ok(Arc::clone(profile.value()));
        }

        let record = self.directory.load_transport(transport_id)?;
        let profile = TransportProfile::from_record(record)?;
        tracing::debug!("Loaded transport profile '{transport_id}'");

        let entry = self
            .profiles
            .entry(transport_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(profile)));
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, transport_id: &str) -> Option<Arc<Mutex<TransportProfile>>> {
        self.profiles.get(transport_id).map(|p| Arc::clone(p.value()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn directory(&self) -> &Arc<dyn TransportDirectory> {
        &self.directory
    }

    /// Write every dirty profile's state back to the directory.
    /// Returns the number of profiles saved. A failed save re-marks the
    /// profile dirty so the next flush retries it.
    pub fn flush_dirty(&self) -> usize {
        let profiles: Vec<(String, Arc<Mutex<TransportProfile>>)> = self
            .profiles
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut saved = 0;
        for (transport_id, profile) in profiles {
            let state = {
                let mut guard = profile.lock();
                if !guard.take_dirty() {
                    continue;
                }
                guard.state()
            };

            match self.directory.save_transport_state(&transport_id, &state) {
                Ok(()) => saved += 1,
                Err(e) => {
                    tracing::warn!("Failed to persist state for transport '{transport_id}': {e}");
                    profile.lock().mark_dirty();
                }
            }
        }
        saved
    }
}

/// Admission entry point used by connection-handling workers.
pub struct AdmissionController {
    cache: Arc<ProfileCache>,
}

impl AdmissionController {
    pub fn new(cache: Arc<ProfileCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ProfileCache> {
        &self.cache
    }

    /// Resolve the transport and run [`authorize`] under its lock.
    ///
    /// Fails with the directory's error (no decision) when the profile cannot
    /// be loaded.
    pub fn authorize_transport(
        &self,
        transport_id: &str,
        is_duplex: bool,
        source_ip: IpAddr,
        now: i64,
    ) -> Result<Decision, GateError> {
        let profile = self.cache.get_or_load(transport_id)?;
        let decision = {
            let mut guard = profile.lock();
            authorize(&mut guard, is_duplex, source_ip, now)
        };

        let kind = if is_duplex { "duplex" } else { "total" };
        match decision {
            Decision::Accept => {
                tracing::debug!("Accepted {kind} session for '{transport_id}' from {source_ip}")
            }
            Decision::RejectIp => {
                tracing::info!("Rejected {kind} session for '{transport_id}': {source_ip} not in allow-list")
            }
            Decision::RejectRate => {
                tracing::info!("Rejected {kind} session for '{transport_id}' from {source_ip}: connection limit reached")
            }
        }
        Ok(decision)
    }
}
