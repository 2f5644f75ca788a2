//! Acceptor serial link
//!
//! Command writer and status reader for the acceptor mechanism.
//! Commands are single ASCII bytes terminated by a newline; status
//! lines arrive newline-delimited. A status line equal to the end
//! signal (`E`) is the machine's own stop/button event and forcibly
//! ends any active session regardless of server state.
//!
//! All command producers share one channel drained by a single writer
//! task, so frames never interleave on the wire.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::domain::session::SessionState;
use crate::domain::types::{AcceptorCommand, ClosureCause};
use crate::infra::{Config, ScanLog};

/// Status line the controller emits when it ends a session itself
const END_SIGNAL: &str = "E";

/// Command queue depth. Commands are rare (a handful per deposited
/// item), so a small bound is plenty; overflow means the port has been
/// gone for a while and dropping is the right call.
const COMMAND_QUEUE: usize = 16;

/// Cloneable sender half used by the protocol loop, the check-result
/// handler, and the watchdog.
#[derive(Debug, Clone)]
pub struct AcceptorHandle {
    tx: mpsc::Sender<AcceptorCommand>,
}

impl AcceptorHandle {
    pub fn from_sender(tx: mpsc::Sender<AcceptorCommand>) -> Self {
        Self { tx }
    }

    /// Queue a command for the serial writer. Never blocks; a full or
    /// closed queue is logged and the command dropped (the mechanism's
    /// default posture is reject, so a lost command is safe).
    pub fn send(&self, cmd: AcceptorCommand) {
        match self.tx.try_send(cmd) {
            Ok(()) => debug!(cmd = %cmd, "acceptor_command_queued"),
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                warn!(cmd = %cmd, "acceptor_command_dropped: queue full");
            }
            Err(mpsc::error::TrySendError::Closed(cmd)) => {
                warn!(cmd = %cmd, "acceptor_command_dropped: link gone");
            }
        }
    }
}

/// Serial link to the acceptor controller
pub struct AcceptorLink {
    port_path: String,
    baud: u32,
    retry_delay: Duration,
    /// Shared with the per-connection writer task so the queue
    /// survives reconnects
    command_rx: Arc<Mutex<mpsc::Receiver<AcceptorCommand>>>,
    session: SessionState,
    log: ScanLog,
}

impl AcceptorLink {
    pub fn new(config: &Config, session: SessionState, log: ScanLog) -> (Self, AcceptorHandle) {
        let (tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let link = Self {
            port_path: config.acceptor_port().to_string(),
            baud: config.baud(),
            retry_delay: config.serial_retry_delay(),
            command_rx: Arc::new(Mutex::new(command_rx)),
            session,
            log,
        };
        (link, AcceptorHandle::from_sender(tx))
    }

    /// Run the link until shutdown. The port is reopened with a fixed
    /// delay forever; a gateway without its acceptor must keep trying
    /// unattended.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(port = %self.port_path, baud = %self.baud, "acceptor_link_started");

        loop {
            let Some(port) = self.open_port(&mut shutdown).await else {
                info!("acceptor_shutdown");
                return;
            };

            info!(port = %self.port_path, "acceptor_connected");
            self.log
                .info(None, &format!("Acceptor connected on {}", self.port_path));

            let (read_half, write_half) = tokio::io::split(port);
            let write_handle = tokio::spawn(write_loop(write_half, self.command_rx.clone()));

            let stop = self.read_loop(read_half, &mut shutdown).await;

            write_handle.abort();
            let _ = write_handle.await;

            if stop {
                info!("acceptor_shutdown");
                return;
            }

            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Read status lines until the port dies or shutdown is signalled.
    /// Returns true on shutdown.
    async fn read_loop(
        &self,
        read_half: ReadHalf<SerialStream>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            let result = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return true;
                    }
                    continue;
                }
                result = reader.read_line(&mut line) => result,
            };

            match result {
                Ok(0) => {
                    warn!(port = %self.port_path, "acceptor_port_closed");
                    return false;
                }
                Ok(_) => {
                    let msg = line.trim().to_string();
                    line.clear();
                    if !msg.is_empty() {
                        self.handle_status(&msg).await;
                    }
                }
                Err(e) => {
                    warn!(port = %self.port_path, error = %e, "acceptor_read_error");
                    return false;
                }
            }
        }
    }

    async fn handle_status(&self, msg: &str) {
        debug!(status = %msg, "acceptor_status");

        if msg == END_SIGNAL {
            // The physical button is ground truth for a user-facing
            // abort; it overrides whatever the server thinks
            if let Some(id) = self.session.end().await {
                info!(session_id = %id, cause = %ClosureCause::Hardware.as_str(), "session_ended");
                self.log.info(Some(id), "Session ended by acceptor hardware");
                self.log
                    .info(None, &format!("Session {} ended by acceptor hardware", id));
            }
        }
    }

    async fn open_port(&self, shutdown: &mut watch::Receiver<bool>) -> Option<SerialStream> {
        loop {
            if *shutdown.borrow() {
                return None;
            }

            match tokio_serial::new(&self.port_path, self.baud).open_native_async() {
                Ok(port) => return Some(port),
                Err(e) => {
                    warn!(port = %self.port_path, error = %e, "acceptor_open_failed");
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

/// Drain queued commands onto the wire. A write failure is transient:
/// it is logged and the loop keeps draining, while the read side
/// notices a dead port and drives the reconnect.
async fn write_loop(
    mut write_half: WriteHalf<SerialStream>,
    command_rx: Arc<Mutex<mpsc::Receiver<AcceptorCommand>>>,
) {
    let mut rx = command_rx.lock().await;

    while let Some(cmd) = rx.recv().await {
        let frame = [cmd.as_byte(), b'\n'];
        match write_half.write_all(&frame).await {
            Ok(()) => debug!(cmd = %cmd, "acceptor_command_sent"),
            Err(e) => warn!(cmd = %cmd, error = %e, "acceptor_write_error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_send_queues_command() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = AcceptorHandle::from_sender(tx);

        handle.send(AcceptorCommand::Start);
        handle.send(AcceptorCommand::Reject);

        assert_eq!(rx.recv().await, Some(AcceptorCommand::Start));
        assert_eq!(rx.recv().await, Some(AcceptorCommand::Reject));
    }

    #[tokio::test]
    async fn test_handle_send_drops_on_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = AcceptorHandle::from_sender(tx);

        handle.send(AcceptorCommand::Start);
        handle.send(AcceptorCommand::End); // dropped, queue full

        assert_eq!(rx.recv().await, Some(AcceptorCommand::Start));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_end_signal_clears_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState::new();
        session.begin(42).await;

        let config = Config::default();
        let (link, _handle) =
            AcceptorLink::new(&config, session.clone(), ScanLog::new(dir.path()));

        link.handle_status(END_SIGNAL).await;

        assert!(!session.is_active().await);
        let content = std::fs::read_to_string(dir.path().join("session_42.log")).unwrap();
        assert!(content.contains("ended by acceptor hardware"));
    }

    #[tokio::test]
    async fn test_other_status_lines_leave_session_alone() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState::new();
        session.begin(42).await;

        let config = Config::default();
        let (link, _handle) =
            AcceptorLink::new(&config, session.clone(), ScanLog::new(dir.path()));

        link.handle_status("READY").await;
        assert!(session.is_active().await);
    }

    #[tokio::test]
    async fn test_end_signal_without_session_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState::new();

        let config = Config::default();
        let (link, _handle) =
            AcceptorLink::new(&config, session.clone(), ScanLog::new(dir.path()));

        link.handle_status(END_SIGNAL).await;
        assert!(!session.is_active().await);
        assert!(!dir.path().join("system.log").exists());
    }
}
