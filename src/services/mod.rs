//! Services - session protocol, check correlation, inactivity watchdog
//!
//! - `protocol` - WebSocket client and the session state machine
//! - `pending` - correlation of checks to their results
//! - `watchdog` - autonomous closure of idle sessions

pub mod pending;
pub mod protocol;
pub mod watchdog;

pub use pending::PendingChecks;
pub use protocol::{run_scan_dispatch, ProtocolClient, ProtocolCore};
pub use watchdog::InactivityMonitor;
