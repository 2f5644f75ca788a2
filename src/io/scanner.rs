//! Barcode scanner serial link
//!
//! Scanners in the field are messy: bursts split across reads, CRLF or
//! bare CR terminators, and some units that never send a terminator at
//! all. `LineAssembler` reassembles the raw byte stream into discrete
//! barcode lines; `ScannerLink` owns the port, applies the idle-flush
//! timer, and hands each line to the check dispatcher while a session
//! is active.
//!
//! Dispatch is serialized: the loop waits for each check exchange to
//! resolve before reading the next line, so at most one check is in
//! flight and a burst of scans cannot queue up unbounded.

use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::domain::session::SessionState;
use crate::domain::types::CheckOutcome;
use crate::infra::{Config, ScanLog};

/// One barcode handed to the protocol for checking. `done` resolves
/// when the check finishes (result, not-found, or timeout); the
/// scanner loop blocks on it for backpressure.
#[derive(Debug)]
pub struct ScanRequest {
    pub sku: String,
    pub done: oneshot::Sender<Option<CheckOutcome>>,
}

/// Reassembles raw serial chunks into trimmed barcode lines
#[derive(Debug)]
pub struct LineAssembler {
    buffer: BytesMut,
    max_line_len: usize,
    log_raw_chunks: bool,
}

impl LineAssembler {
    pub fn new(max_line_len: usize, log_raw_chunks: bool) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_line_len),
            max_line_len,
            log_raw_chunks,
        }
    }

    /// Feed one received chunk, returning every complete line it
    /// produced. A line is complete at LF or CR; one extra terminator
    /// byte after it is absorbed so CRLF never yields an empty line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.log_raw_chunks {
            let ascii: String = chunk
                .iter()
                .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
                .collect();
            debug!(len = chunk.len(), hex = %hex::encode(chunk), ascii = %ascii, "scanner_chunk");
        }

        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r') {
            let raw = self.buffer.split_to(idx);
            self.buffer.advance(1);
            if matches!(self.buffer.first(), Some(&b'\n') | Some(&b'\r')) {
                self.buffer.advance(1);
            }
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }

        // Terminator never came; bound memory under malformed input
        if self.buffer.len() > self.max_line_len {
            warn!(len = self.buffer.len(), "scanner_buffer_overflow");
            if let Some(line) = self.flush() {
                lines.push(line);
            }
        }

        lines
    }

    /// Emit whatever is buffered as one line (idle flush for scanners
    /// that omit terminators). Returns None when the buffer holds
    /// nothing printable.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Serial link to the barcode scanner
pub struct ScannerLink {
    port_path: String,
    baud: u32,
    retry_delay: Duration,
    flush_timeout: Duration,
    assembler: LineAssembler,
    session: SessionState,
    log: ScanLog,
    dispatch_tx: mpsc::Sender<ScanRequest>,
}

impl ScannerLink {
    pub fn new(
        config: &Config,
        session: SessionState,
        log: ScanLog,
        dispatch_tx: mpsc::Sender<ScanRequest>,
    ) -> Self {
        Self {
            port_path: config.scanner_port().to_string(),
            baud: config.baud(),
            retry_delay: config.serial_retry_delay(),
            flush_timeout: config.flush_timeout(),
            assembler: LineAssembler::new(config.max_line_len(), config.log_raw_chunks()),
            session,
            log,
            dispatch_tx,
        }
    }

    /// Run the link until shutdown, reopening the port with a fixed
    /// delay forever.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(port = %self.port_path, baud = %self.baud, "scanner_link_started");

        loop {
            let Some(mut port) = self.open_port(&mut shutdown).await else {
                info!("scanner_shutdown");
                return;
            };

            info!(port = %self.port_path, "scanner_connected");
            self.log
                .info(None, &format!("Scanner connected on {}", self.port_path));

            let mut buf = [0u8; 128];

            loop {
                if *shutdown.borrow() {
                    info!("scanner_shutdown");
                    return;
                }

                let read = tokio::select! {
                    _ = shutdown.changed() => continue,
                    read = tokio::time::timeout(self.flush_timeout, port.read(&mut buf)) => read,
                };

                match read {
                    Ok(Ok(0)) => {
                        warn!(port = %self.port_path, "scanner_port_closed");
                        break;
                    }
                    Ok(Ok(n)) => {
                        for line in self.assembler.push(&buf[..n]) {
                            self.dispatch_line(line).await;
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(port = %self.port_path, error = %e, "scanner_read_error");
                        break;
                    }
                    Err(_) => {
                        // Idle past the flush window with bytes pending
                        if let Some(line) = self.assembler.flush() {
                            debug!(line = %line, "scanner_idle_flush");
                            self.dispatch_line(line).await;
                        }
                    }
                }
            }

            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Hand one barcode line to the protocol and wait for the check
    /// exchange to resolve. Lines outside a session are logged and
    /// discarded; stale input must not queue.
    async fn dispatch_line(&self, line: String) {
        let Some(session_id) = self.session.current().await else {
            info!(line = %line, "scanner_read_discarded: no active session");
            self.log
                .info(None, &format!("Scanner read discarded (no session): {}", line));
            return;
        };

        info!(session_id = %session_id, line = %line, "scanner_read");
        self.log
            .info(Some(session_id), &format!("Scanner read: {}", line));

        let (done_tx, done_rx) = oneshot::channel();
        let request = ScanRequest { sku: line, done: done_tx };

        if self.dispatch_tx.send(request).await.is_err() {
            warn!("scan_dispatch_closed");
            return;
        }

        // Backpressure: no further reads until this check resolves
        match done_rx.await {
            Ok(Some(outcome)) => debug!(outcome = ?outcome, "scan_check_resolved"),
            Ok(None) => debug!("scan_check_unresolved"),
            Err(_) => warn!("scan_check_reply_dropped"),
        }
    }

    async fn open_port(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<tokio_serial::SerialStream> {
        loop {
            if *shutdown.borrow() {
                return None;
            }

            match tokio_serial::new(&self.port_path, self.baud).open_native_async() {
                Ok(port) => return Some(port),
                Err(e) => {
                    warn!(port = %self.port_path, error = %e, "scanner_open_failed");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return None;
                    }
                }
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> LineAssembler {
        LineAssembler::new(512, false)
    }

    #[test]
    fn test_lf_terminated_line() {
        let mut asm = assembler();
        assert_eq!(asm.push(b"ABC123\n"), vec!["ABC123"]);
        assert!(asm.is_empty());
    }

    #[test]
    fn test_crlf_yields_single_line() {
        let mut asm = assembler();
        assert_eq!(asm.push(b"ABC123\r\n"), vec!["ABC123"]);
        assert!(asm.is_empty());
    }

    #[test]
    fn test_cr_only_terminator() {
        let mut asm = assembler();
        assert_eq!(asm.push(b"ABC123\r"), vec!["ABC123"]);
    }

    #[test]
    fn test_chunks_split_across_reads() {
        let mut asm = assembler();
        assert!(asm.push(b"ABC").is_empty());
        assert!(asm.push(b"12").is_empty());
        assert_eq!(asm.push(b"3\n"), vec!["ABC123"]);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut asm = assembler();
        assert_eq!(asm.push(b"AAA\r\nBBB\nCCC\r\n"), vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn test_terminator_split_across_chunks() {
        let mut asm = assembler();
        assert_eq!(asm.push(b"AAA\r"), vec!["AAA"]);
        // The LF half of the CRLF arrives alone; no empty line
        assert_eq!(asm.push(b"\nBBB\n"), vec!["BBB"]);
    }

    #[test]
    fn test_blank_lines_never_emitted() {
        let mut asm = assembler();
        assert!(asm.push(b"\n\r\n  \n").is_empty());
    }

    #[test]
    fn test_whitespace_trimmed() {
        let mut asm = assembler();
        assert_eq!(asm.push(b"  ABC123  \n"), vec!["ABC123"]);
    }

    #[test]
    fn test_idle_flush_emits_buffer() {
        let mut asm = assembler();
        assert!(asm.push(b"NOTERM42").is_empty());
        assert_eq!(asm.flush(), Some("NOTERM42".to_string()));
        assert!(asm.is_empty());
    }

    #[test]
    fn test_flush_empty_buffer_is_none() {
        let mut asm = assembler();
        assert_eq!(asm.flush(), None);
        asm.push(b"   ");
        assert_eq!(asm.flush(), None);
    }

    #[test]
    fn test_overflow_forces_emit() {
        let mut asm = LineAssembler::new(16, false);
        let lines = asm.push(&[b'X'; 20]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 20);
        assert!(asm.is_empty());
    }

    #[test]
    fn test_non_utf8_bytes_survive_lossily() {
        let mut asm = assembler();
        let lines = asm.push(b"AB\xFFCD\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("AB"));
        assert!(lines[0].ends_with("CD"));
    }

    fn test_link(
        session: SessionState,
        dir: &std::path::Path,
    ) -> (ScannerLink, mpsc::Receiver<ScanRequest>) {
        let (tx, rx) = mpsc::channel(1);
        let config = Config::default();
        let link = ScannerLink::new(&config, session, ScanLog::new(dir), tx);
        (link, rx)
    }

    #[tokio::test]
    async fn test_dispatch_discards_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState::new();
        let (link, mut rx) = test_link(session, dir.path());

        link.dispatch_line("SKU1".to_string()).await;
        assert!(rx.try_recv().is_err());

        let content = std::fs::read_to_string(dir.path().join("system.log")).unwrap();
        assert!(content.contains("Scanner read discarded"));
    }

    #[tokio::test]
    async fn test_dispatch_forwards_and_awaits_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState::new();
        session.begin(42).await;
        let (link, mut rx) = test_link(session, dir.path());

        let consumer = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.sku, "SKU1");
            request.done.send(Some(CheckOutcome::NotFound)).unwrap();
        });

        link.dispatch_line("SKU1".to_string()).await;
        consumer.await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("session_42.log")).unwrap();
        assert!(content.contains("Scanner read: SKU1"));
    }
}
