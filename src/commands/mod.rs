//! Operator command handlers, organized by functional domain.
//!
//! - `session`: admission decisions and session accounting
//! - `usage`: per-transport and ranked usage reports
//! - `ping`: operator "locate now" pings through the dispatcher
//! - `status`: transport status, listing, and state flushing
//! - `logic`: Pure helper functions (unit-testable)
//! - `state`: Shared `GateState` definition

pub mod logic;
pub mod ping;
pub mod session;
mod state;
pub mod status;
pub mod usage;

pub use logic::{SessionInput, TransportStatus, UsageSummary};
pub use ping::ping_device;
pub use session::{authorize_session, record_session};
pub use state::GateState;
pub use status::{flush_profiles, list_transports, transport_status};
pub use usage::{top_transports, usage_report};
