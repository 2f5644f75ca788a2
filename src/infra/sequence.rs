//! Persisted bottle-acceptance sequence
//!
//! A per-device monotonically increasing counter backing the
//! `BTL-{device:03}-{seq:05}` acceptance codes. The current value is
//! written to a small counter file after every advance so the sequence
//! survives process restarts; a missing or corrupt file restarts the
//! sequence from zero.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Generator for bottle acceptance codes
#[derive(Debug)]
pub struct AcceptanceCodes {
    device_id: u32,
    path: PathBuf,
    counter: u64,
}

impl AcceptanceCodes {
    /// Load the counter from `path`, starting at zero when the file is
    /// missing or unreadable.
    pub fn load<P: AsRef<Path>>(device_id: u32, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let counter = match fs::read_to_string(&path) {
            Ok(content) => match content.trim().parse::<u64>() {
                Ok(value) => value,
                Err(_) => {
                    warn!(file = %path.display(), "sequence_file_corrupt");
                    0
                }
            },
            Err(_) => 0,
        };

        info!(device_id = %device_id, counter = %counter, "acceptance_sequence_loaded");
        Self { device_id, path, counter }
    }

    /// Advance the sequence and return the next acceptance code
    pub fn next_code(&mut self) -> String {
        self.counter += 1;
        self.persist();
        format!("BTL-{:03}-{:05}", self.device_id, self.counter)
    }

    /// Current counter value (number of codes issued so far)
    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn persist(&self) {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!(file = %self.path.display(), error = %e, "sequence_dir_create_failed");
                    return;
                }
            }
        }
        // The counter keeps advancing in memory even if the write
        // fails; a restart then repeats codes, which the service
        // deduplicates by session.
        if let Err(e) = fs::write(&self.path, self.counter.to_string()) {
            warn!(file = %self.path.display(), error = %e, "sequence_persist_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_code_format() {
        let dir = tempdir().unwrap();
        let mut codes = AcceptanceCodes::load(3, dir.path().join("seq"));

        assert_eq!(codes.next_code(), "BTL-003-00001");
        assert_eq!(codes.next_code(), "BTL-003-00002");
    }

    #[test]
    fn test_sequence_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seq");

        let mut codes = AcceptanceCodes::load(3, &path);
        codes.next_code();
        codes.next_code();
        drop(codes);

        let mut codes = AcceptanceCodes::load(3, &path);
        assert_eq!(codes.counter(), 2);
        assert_eq!(codes.next_code(), "BTL-003-00003");
    }

    #[test]
    fn test_corrupt_file_restarts_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seq");
        fs::write(&path, "not a number").unwrap();

        let mut codes = AcceptanceCodes::load(1, &path);
        assert_eq!(codes.next_code(), "BTL-001-00001");
    }

    #[test]
    fn test_device_id_padding() {
        let dir = tempdir().unwrap();
        let mut codes = AcceptanceCodes::load(123, dir.path().join("seq"));
        assert_eq!(codes.next_code(), "BTL-123-00001");
    }
}
