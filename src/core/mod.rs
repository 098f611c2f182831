//! Core logic: connection masks, transport profiles, admission, accounting.
//!
//! - [`ProfileMask`] - minute-resolution rolling connection bitmask
//! - [`TransportProfile`] - per-transport limits, masks, and ping counters
//! - [`AdmissionController`] / [`ProfileCache`] - accept/reject under a per-transport lock
//! - [`SessionAccountant`] - session byte/overhead records and range queries
//! - [`TransportDirectory`] / [`SessionStore`] - collaborator contracts

pub mod accounting;
pub mod admission;
pub mod directory;
pub mod ip_list;
pub mod profile_mask;
pub mod transport_profile;

pub use accounting::{
    MemorySessionStore, SessionAccountant, SessionRecord, SessionStore, TransportKind, UsageReport,
};
pub use admission::{authorize, AdmissionController, Decision, ProfileCache};
pub use directory::{MemoryDirectory, TransportDirectory};
pub use ip_list::IpAllowList;
pub use profile_mask::{minute_of, ProfileMask};
pub use transport_profile::{TransportLimits, TransportProfile, TransportRecord, TransportState};
