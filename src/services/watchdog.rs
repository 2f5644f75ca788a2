//! Inactivity watchdog
//!
//! Closes a session that has gone quiet without any server prompt: a
//! customer who walks away mid-session would otherwise leave the
//! acceptor open until the machine was serviced. Closure goes out as
//! `SESSION_END` plus the hardware close command, and is logged
//! distinctly from server- and hardware-caused closures.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::session::SessionState;
use crate::domain::types::{AcceptorCommand, ClosureCause};
use crate::infra::{Config, ScanLog};
use crate::io::acceptor::AcceptorHandle;
use crate::io::wire::ClientMessage;

pub struct InactivityMonitor {
    poll: Duration,
    timeout: Duration,
    session: SessionState,
    acceptor: AcceptorHandle,
    outbound_tx: mpsc::Sender<ClientMessage>,
    log: ScanLog,
}

impl InactivityMonitor {
    pub fn new(
        config: &Config,
        session: SessionState,
        acceptor: AcceptorHandle,
        outbound_tx: mpsc::Sender<ClientMessage>,
        log: ScanLog,
    ) -> Self {
        Self {
            poll: config.watchdog_poll(),
            timeout: config.inactivity_timeout(),
            session,
            acceptor,
            outbound_tx,
            log,
        }
    }

    /// Override the poll interval and timeout (test rigs and bring-up)
    pub fn with_timing(mut self, poll: Duration, timeout: Duration) -> Self {
        self.poll = poll;
        self.timeout = timeout;
        self
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_secs = %self.poll.as_secs_f64(),
            timeout_secs = %self.timeout.as_secs(),
            "inactivity_monitor_started"
        );

        let mut ticker = tokio::time::interval(self.poll);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("inactivity_monitor_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {}
            }

            let snapshot = self.session.snapshot().await;
            if !snapshot.active {
                continue;
            }
            let Some(id) = snapshot.id else {
                continue;
            };
            if snapshot.idle < self.timeout {
                continue;
            }

            // Another closure path may win between snapshot and here
            if !self.session.end_if_matches(id).await {
                debug!(session_id = %id, "inactivity_close_raced");
                continue;
            }

            info!(
                session_id = %id,
                idle_secs = %snapshot.idle.as_secs(),
                cause = %ClosureCause::Inactivity.as_str(),
                "session_ended"
            );
            self.log.info(
                Some(id),
                &format!(
                    "Session {} closed after {}s of inactivity",
                    id,
                    snapshot.idle.as_secs()
                ),
            );

            if self
                .outbound_tx
                .send(ClientMessage::SessionEnd { session_id: id })
                .await
                .is_err()
            {
                warn!(session_id = %id, "session_end_not_sent: outbound queue closed");
            }
            self.acceptor.send(AcceptorCommand::End);
        }
    }
}
