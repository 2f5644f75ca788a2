//! Infrastructure: configuration, scan log, persisted sequence

pub mod config;
pub mod scan_log;
pub mod sequence;

pub use config::Config;
pub use scan_log::ScanLog;
pub use sequence::AcceptanceCodes;
