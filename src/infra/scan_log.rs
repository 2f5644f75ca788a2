//! Append-only scan log
//!
//! One file per key under the log directory: `system.log` for gateway
//! lifecycle events plus `session_{id}.log` per session. Line format
//! is `{UTC timestamp} — {LEVEL} — {message}`, one event per line.
//!
//! The log is best-effort: a failed append is reported through tracing
//! and otherwise ignored so it can never stall a gateway loop.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::domain::types::SessionId;

/// Append-only log sink keyed by session id or "system"
#[derive(Debug, Clone)]
pub struct ScanLog {
    dir: PathBuf,
}

impl ScanLog {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        info!(dir = %dir.display(), "scan_log_initialized");
        Self { dir }
    }

    /// Record an INFO event against a session (or the system log)
    pub fn info(&self, session: Option<SessionId>, message: &str) {
        self.append(session, "INFO", message);
    }

    /// Record an ERROR event against a session (or the system log)
    pub fn error(&self, session: Option<SessionId>, message: &str) {
        self.append(session, "ERROR", message);
    }

    fn append(&self, session: Option<SessionId>, level: &str, message: &str) {
        let name = match session {
            Some(id) => format!("session_{}.log", id),
            None => "system.log".to_string(),
        };
        let ts = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("{} — {} — {}", ts, level, message);

        if let Err(e) = self.append_line(&name, &line) {
            error!(file = %name, error = %e, "scan_log_append_failed");
        }
    }

    fn append_line(&self, name: &str, line: &str) -> std::io::Result<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }

        let path = self.dir.join(name);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %path.display(), bytes = %line.len(), "scan_log_written");

        Ok(())
    }
}
