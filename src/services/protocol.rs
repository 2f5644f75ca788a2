//! Session protocol over the coordination WebSocket
//!
//! One persistent connection multiplexes authentication, liveness,
//! session lifecycle, and bottle checks. The client here drives the
//! state machine:
//!
//! `Disconnected -> Connecting -> Authenticating -> Idle -> SessionActive -> Idle`
//!
//! Any connection failure loops back to `Connecting` after a fixed
//! delay, forever. Session state local to the gateway is not resumed
//! across reconnects; the server must issue a fresh `START_SESSION`.
//!
//! Outbound frames can originate from several loops (protocol replies,
//! scanner checks, watchdog closures). They all funnel through one
//! bounded channel drained by a single writer task, so frames never
//! interleave on the socket.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::domain::session::SessionState;
use crate::domain::types::{AcceptorCommand, Bottle, CheckOutcome, ClosureCause, SessionId};
use crate::infra::{AcceptanceCodes, Config, ScanLog};
use crate::io::acceptor::AcceptorHandle;
use crate::io::scanner::ScanRequest;
use crate::io::wire::{self, ClientMessage, ServerMessage};
use crate::services::pending::PendingChecks;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Outbound frame queue depth. Frames are small and rare; the bound
/// only matters while the link is down, where dropping old frames
/// would lose a SESSION_END notification.
const OUTBOUND_QUEUE: usize = 64;

enum AuthOutcome {
    Authenticated,
    Failed,
    Shutdown,
}

enum ReadExit {
    Disconnected,
    Shutdown,
}

/// Protocol state shared by the read loop, the scan dispatcher, and
/// the watchdog: session record, pending-check table, acceptance
/// sequence, and the outbound frame queue.
pub struct ProtocolCore {
    device_id: u32,
    session: SessionState,
    acceptor: AcceptorHandle,
    log: ScanLog,
    pending: PendingChecks,
    codes: Mutex<AcceptanceCodes>,
    outbound_tx: mpsc::Sender<ClientMessage>,
    correlation_timeout: Duration,
}

impl ProtocolCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device_id: u32,
        session: SessionState,
        acceptor: AcceptorHandle,
        log: ScanLog,
        codes: AcceptanceCodes,
        outbound_tx: mpsc::Sender<ClientMessage>,
        correlation_timeout: Duration,
    ) -> Self {
        Self {
            device_id,
            session,
            acceptor,
            log,
            pending: PendingChecks::new(),
            codes: Mutex::new(codes),
            outbound_tx,
            correlation_timeout,
        }
    }

    /// Sender for loops that emit frames of their own (watchdog)
    pub fn sender(&self) -> mpsc::Sender<ClientMessage> {
        self.outbound_tx.clone()
    }

    /// Fail all outstanding checks. Called when the connection drops:
    /// checks are timed out, never resumed onto the next connection.
    pub fn abort_pending(&self) {
        self.pending.clear();
    }

    async fn send(&self, msg: ClientMessage) {
        if self.outbound_tx.send(msg).await.is_err() {
            warn!("outbound_queue_closed");
        }
    }

    /// Submit one scanned barcode and wait for the exchange to finish.
    /// Returns None when the check could not be dispatched, was
    /// cancelled, or timed out; the mechanism's default posture is
    /// reject, so an unresolved check needs no hardware action.
    pub async fn check_bottle(&self, sku: String) -> Option<CheckOutcome> {
        // The session may have ended between scan and dispatch
        let session_id = self.session.current().await?;

        let Some(done) = self.pending.register(session_id) else {
            warn!(session_id = %session_id, sku = %sku, "check_not_dispatched");
            return None;
        };

        self.send(ClientMessage::CheckBottle { session_id, sku: sku.clone() })
            .await;

        match tokio::time::timeout(self.correlation_timeout, done).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) => {
                // Entry dropped: connection lost or session cancelled
                debug!(session_id = %session_id, sku = %sku, "check_cancelled");
                None
            }
            Err(_) => {
                self.pending.cancel(session_id);
                warn!(session_id = %session_id, sku = %sku, "check_timeout");
                self.log
                    .info(Some(session_id), &format!("Check timed out for {}", sku));
                None
            }
        }
    }

    /// Dispatch one decoded server frame
    pub async fn handle_server_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Ok { message } => {
                let message = message.unwrap_or_default();
                info!(message = %message, "ws_ok");
                self.log.info(None, &format!("WS OK: {}", message));
            }
            ServerMessage::Error { error } => {
                let error = error.unwrap_or_default();
                warn!(error = %error, "ws_error_frame");
                self.log.error(None, &format!("WS ERROR: {}", error));
            }
            ServerMessage::Ping => {
                debug!("ws_ping");
                self.send(ClientMessage::Pong).await;
            }
            ServerMessage::StartSession { session_id } => {
                self.handle_start_session(session_id).await;
            }
            ServerMessage::CancelSession { session_id, reason } => {
                self.handle_cancel_session(session_id, reason).await;
            }
            ServerMessage::BottleCheckResult { session_id, exist, bottle } => {
                self.handle_check_result(session_id, exist, bottle).await;
            }
        }
    }

    async fn handle_start_session(&self, session_id: SessionId) {
        if let Some(old) = self.session.begin(session_id).await {
            // The server is authoritative for lifecycle; a new session
            // over a live one means it lost track of the old closure
            warn!(old_session_id = %old, session_id = %session_id, "session_replaced");
            self.pending.cancel(old);
            self.log.info(
                Some(old),
                &format!("Session {} superseded by session {}", old, session_id),
            );
        }

        info!(session_id = %session_id, "session_started");
        self.log
            .info(Some(session_id), &format!("Session {} started", session_id));

        self.acceptor.send(AcceptorCommand::Start);
        self.send(ClientMessage::SessionStarted { session_id }).await;
    }

    async fn handle_cancel_session(&self, session_id: SessionId, reason: Option<String>) {
        if !self.session.end_if_matches(session_id).await {
            info!(session_id = %session_id, "cancel_session_ignored");
            return;
        }

        let reason = reason.unwrap_or_default();
        info!(
            session_id = %session_id,
            reason = %reason,
            cause = %ClosureCause::ServerCancel.as_str(),
            "session_ended"
        );
        self.log
            .info(Some(session_id), &format!("Session {} canceled: {}", session_id, reason));

        self.acceptor.send(AcceptorCommand::End);
        self.pending.cancel(session_id);
    }

    async fn handle_check_result(&self, session_id: SessionId, exist: bool, bottle: Option<Bottle>) {
        if self.session.current().await != Some(session_id) {
            warn!(session_id = %session_id, "check_result_stale_session");
            return;
        }

        // A result whose check already timed out must not accept: the
        // machine has long shown its reject posture for that item
        let Some(waiter) = self.pending.take(session_id) else {
            warn!(session_id = %session_id, "check_result_unmatched");
            return;
        };

        let outcome = if exist {
            let material = bottle.and_then(|b| b.material);
            let cmd = AcceptorCommand::for_material(material.as_deref());
            self.acceptor.send(cmd);

            let code = self.codes.lock().await.next_code();
            let material = material.unwrap_or_else(|| "unknown".to_string());
            self.send(ClientMessage::BottleAccepted {
                session_id,
                code: code.clone(),
                material: material.clone(),
                timestamp: wire::utc_timestamp(),
            })
            .await;
            self.session.touch().await;

            info!(session_id = %session_id, code = %code, material = %material, cmd = %cmd, "bottle_accepted");
            self.log
                .info(Some(session_id), &format!("Bottle accepted {} ({})", code, material));

            CheckOutcome::Accepted { code, material }
        } else {
            self.acceptor.send(AcceptorCommand::Reject);
            info!(session_id = %session_id, "bottle_rejected");
            self.log.info(Some(session_id), "Bottle rejected (not found)");
            CheckOutcome::NotFound
        };

        // The waiter may have timed out between take and send
        let _ = waiter.send(outcome);
    }

    fn hello(&self, device_token: &str, version: &str) -> ClientMessage {
        ClientMessage::Hello {
            fandomat_id: self.device_id,
            device_token: device_token.to_string(),
            version: version.to_string(),
        }
    }
}

/// Feed scanner lines into the protocol, one at a time. The reply on
/// `done` releases the scanner loop for its next read, so checks are
/// naturally serialized with no queue between scans.
pub async fn run_scan_dispatch(
    core: Arc<ProtocolCore>,
    mut scan_rx: mpsc::Receiver<ScanRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("scan_dispatch_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scan_dispatch_shutdown");
                    return;
                }
            }
            request = scan_rx.recv() => {
                let Some(ScanRequest { sku, done }) = request else {
                    return;
                };
                let outcome = core.check_bottle(sku).await;
                let _ = done.send(outcome);
            }
        }
    }
}

/// WebSocket client for the session-coordination service
pub struct ProtocolClient {
    config: Config,
    core: Arc<ProtocolCore>,
    log: ScanLog,
    outbound_rx: Arc<Mutex<mpsc::Receiver<ClientMessage>>>,
}

impl ProtocolClient {
    /// Build the client and its shared core. The core is handed to the
    /// scan dispatcher and the watchdog.
    pub fn new(
        config: Config,
        session: SessionState,
        acceptor: AcceptorHandle,
        log: ScanLog,
        codes: AcceptanceCodes,
    ) -> (Self, Arc<ProtocolCore>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let core = Arc::new(ProtocolCore::new(
            config.fandomat_id(),
            session,
            acceptor,
            log.clone(),
            codes,
            outbound_tx,
            config.correlation_timeout(),
        ));
        let client = Self {
            config,
            core: core.clone(),
            log,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
        };
        (client, core)
    }

    /// Run the connection loop until shutdown. Every failure path ends
    /// in a fixed-delay reconnect; nothing here is fatal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.config.ws_url(), "ws_client_started");

        loop {
            if *shutdown.borrow() {
                info!("ws_client_shutdown");
                return;
            }

            info!(url = %self.config.ws_url(), "ws_connecting");
            let ws = match connect_async(self.config.ws_url()).await {
                Ok((ws, _response)) => ws,
                Err(e) => {
                    warn!(error = %e, "ws_connect_failed");
                    self.log.error(None, &format!("WebSocket error: {}", e));
                    if !sleep_or_shutdown(&mut shutdown, self.config.reconnect_delay()).await {
                        return;
                    }
                    continue;
                }
            };

            info!("ws_connected");
            self.log.info(None, "WebSocket connected.");
            let (mut sink, mut source) = ws.split();

            match self.authenticate(&mut sink, &mut source, &mut shutdown).await {
                AuthOutcome::Authenticated => {}
                AuthOutcome::Shutdown => return,
                AuthOutcome::Failed => {
                    self.log.error(None, "Authentication failed");
                    if !sleep_or_shutdown(&mut shutdown, self.config.reconnect_delay()).await {
                        return;
                    }
                    continue;
                }
            }

            info!(fandomat_id = %self.config.fandomat_id(), "ws_authenticated");

            let write_handle = tokio::spawn(write_loop(sink, self.outbound_rx.clone()));
            let exit = self.read_loop(&mut source, &mut shutdown).await;
            write_handle.abort();
            let _ = write_handle.await;

            // Outstanding checks are timed out, not carried across
            self.core.abort_pending();

            match exit {
                ReadExit::Shutdown => {
                    info!("ws_client_shutdown");
                    return;
                }
                ReadExit::Disconnected => {
                    warn!("ws_disconnected");
                    self.log.error(
                        None,
                        &format!(
                            "WebSocket connection lost. Retrying in {}s...",
                            self.config.reconnect_delay().as_secs()
                        ),
                    );
                    if !sleep_or_shutdown(&mut shutdown, self.config.reconnect_delay()).await {
                        return;
                    }
                }
            }
        }
    }

    /// Send HELLO and wait for the authentication verdict. `OK` admits
    /// the connection; `ERROR`, a decode failure, or a drop aborts the
    /// attempt. PING is answered even before authentication completes.
    async fn authenticate(
        &self,
        sink: &mut WsSink,
        source: &mut WsSource,
        shutdown: &mut watch::Receiver<bool>,
    ) -> AuthOutcome {
        let hello = self
            .core
            .hello(self.config.device_token(), self.config.version());
        let json = match hello.encode() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "ws_encode_failed");
                return AuthOutcome::Failed;
            }
        };
        if let Err(e) = sink.send(WsMessage::Text(json)).await {
            warn!(error = %e, "ws_hello_send_failed");
            return AuthOutcome::Failed;
        }
        debug!("ws_hello_sent");

        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return AuthOutcome::Shutdown;
                    }
                    continue;
                }
                frame = source.next() => frame,
            };

            match frame {
                Some(Ok(WsMessage::Text(text))) => match ServerMessage::decode(&text) {
                    Ok(ServerMessage::Ok { message }) => {
                        info!(message = %message.unwrap_or_default(), "ws_auth_ok");
                        return AuthOutcome::Authenticated;
                    }
                    Ok(ServerMessage::Error { error }) => {
                        warn!(error = %error.unwrap_or_default(), "ws_auth_rejected");
                        return AuthOutcome::Failed;
                    }
                    Ok(ServerMessage::Ping) => {
                        if let Ok(json) = ClientMessage::Pong.encode() {
                            let _ = sink.send(WsMessage::Text(json)).await;
                        }
                    }
                    Ok(other) => {
                        debug!(message = ?other, "ws_preauth_message_ignored");
                    }
                    Err(e) => {
                        // The authentication reply was unreadable;
                        // start the attempt over
                        warn!(error = %e, "ws_auth_decode_error");
                        return AuthOutcome::Failed;
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    warn!("ws_closed_during_auth");
                    return AuthOutcome::Failed;
                }
                Some(Ok(_)) => {} // transport-level ping/pong/binary
                Some(Err(e)) => {
                    warn!(error = %e, "ws_read_error");
                    return AuthOutcome::Failed;
                }
            }
        }
    }

    async fn read_loop(&self, source: &mut WsSource, shutdown: &mut watch::Receiver<bool>) -> ReadExit {
        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return ReadExit::Shutdown;
                    }
                    continue;
                }
                frame = source.next() => frame,
            };

            match frame {
                Some(Ok(WsMessage::Text(text))) => match ServerMessage::decode(&text) {
                    Ok(msg) => self.core.handle_server_message(msg).await,
                    Err(e) => {
                        // Unknown type or malformed frame: logged and
                        // dropped, the connection stays up
                        warn!(error = %e, frame = %text, "ws_decode_error");
                        self.log.error(None, &format!("Undecodable frame: {}", e));
                    }
                },
                Some(Ok(WsMessage::Close(_))) => {
                    info!("ws_closed_by_server");
                    return ReadExit::Disconnected;
                }
                Some(Ok(_)) => {} // transport-level ping/pong/binary
                Some(Err(e)) => {
                    warn!(error = %e, "ws_read_error");
                    return ReadExit::Disconnected;
                }
                None => {
                    return ReadExit::Disconnected;
                }
            }
        }
    }
}

/// Drain the outbound queue into the socket. One writer per
/// connection; the queue itself survives reconnects, so frames queued
/// while the link was down go out once authentication succeeds.
async fn write_loop(mut sink: WsSink, outbound_rx: Arc<Mutex<mpsc::Receiver<ClientMessage>>>) {
    let mut rx = outbound_rx.lock().await;

    while let Some(msg) = rx.recv().await {
        let json = match msg.encode() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "ws_encode_failed");
                continue;
            }
        };
        debug!(frame = %json, "ws_frame_sent");
        if let Err(e) = sink.send(WsMessage::Text(json)).await {
            warn!(error = %e, "ws_write_error");
            return;
        }
    }
}

async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => !*shutdown.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Harness {
        core: Arc<ProtocolCore>,
        outbound_rx: mpsc::Receiver<ClientMessage>,
        command_rx: mpsc::Receiver<AcceptorCommand>,
        session: SessionState,
        _dir: TempDir,
    }

    fn harness_with_timeout(correlation_timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::channel(16);
        let session = SessionState::new();
        let core = Arc::new(ProtocolCore::new(
            3,
            session.clone(),
            AcceptorHandle::from_sender(command_tx),
            ScanLog::new(dir.path()),
            AcceptanceCodes::load(3, dir.path().join("seq")),
            outbound_tx,
            correlation_timeout,
        ));
        Harness { core, outbound_rx, command_rx, session, _dir: dir }
    }

    fn harness() -> Harness {
        harness_with_timeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_start_session_opens_acceptor_and_confirms() {
        let mut h = harness();

        h.core
            .handle_server_message(ServerMessage::StartSession { session_id: 42 })
            .await;

        assert_eq!(h.session.current().await, Some(42));
        assert_eq!(h.command_rx.recv().await, Some(AcceptorCommand::Start));
        assert_eq!(
            h.outbound_rx.recv().await,
            Some(ClientMessage::SessionStarted { session_id: 42 })
        );
    }

    #[tokio::test]
    async fn test_cancel_session_matching_id() {
        let mut h = harness();
        h.session.begin(42).await;

        h.core
            .handle_server_message(ServerMessage::CancelSession {
                session_id: 42,
                reason: Some("operator".to_string()),
            })
            .await;

        assert!(!h.session.is_active().await);
        assert_eq!(h.command_rx.recv().await, Some(AcceptorCommand::End));
    }

    #[tokio::test]
    async fn test_cancel_session_mismatched_id_is_noop() {
        let mut h = harness();
        h.session.begin(42).await;

        h.core
            .handle_server_message(ServerMessage::CancelSession { session_id: 7, reason: None })
            .await;

        assert!(h.session.is_active().await);
        assert!(h.command_rx.try_recv().is_err());
        assert!(h.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let mut h = harness();
        h.core.handle_server_message(ServerMessage::Ping).await;
        assert_eq!(h.outbound_rx.recv().await, Some(ClientMessage::Pong));
    }

    #[tokio::test]
    async fn test_check_accepted_plastic() {
        let mut h = harness();
        h.session.begin(42).await;

        let core = h.core.clone();
        let check = tokio::spawn(async move { core.check_bottle("SKU1".to_string()).await });

        // CHECK_BOTTLE goes out first
        assert_eq!(
            h.outbound_rx.recv().await,
            Some(ClientMessage::CheckBottle { session_id: 42, sku: "SKU1".to_string() })
        );

        h.core
            .handle_server_message(ServerMessage::BottleCheckResult {
                session_id: 42,
                exist: true,
                bottle: Some(Bottle {
                    material: Some("Plastic".to_string()),
                    name: Some("Cola".to_string()),
                }),
            })
            .await;

        assert_eq!(h.command_rx.recv().await, Some(AcceptorCommand::AcceptPlastic));
        match h.outbound_rx.recv().await {
            Some(ClientMessage::BottleAccepted { session_id, code, material, timestamp }) => {
                assert_eq!(session_id, 42);
                assert_eq!(code, "BTL-003-00001");
                assert_eq!(material, "Plastic");
                assert!(timestamp.ends_with('Z'));
            }
            other => panic!("expected BOTTLE_ACCEPTED, got {:?}", other),
        }

        let outcome = check.await.unwrap();
        assert_eq!(
            outcome,
            Some(CheckOutcome::Accepted {
                code: "BTL-003-00001".to_string(),
                material: "Plastic".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_check_not_found_rejects() {
        let mut h = harness();
        h.session.begin(42).await;

        let core = h.core.clone();
        let check = tokio::spawn(async move { core.check_bottle("SKU9".to_string()).await });
        let _ = h.outbound_rx.recv().await; // CHECK_BOTTLE

        h.core
            .handle_server_message(ServerMessage::BottleCheckResult {
                session_id: 42,
                exist: false,
                bottle: None,
            })
            .await;

        assert_eq!(h.command_rx.recv().await, Some(AcceptorCommand::Reject));
        assert_eq!(check.await.unwrap(), Some(CheckOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_check_timeout_leaves_no_entry_and_no_command() {
        let mut h = harness_with_timeout(Duration::from_millis(20));
        h.session.begin(42).await;

        let outcome = h.core.check_bottle("SKU1".to_string()).await;
        assert_eq!(outcome, None);

        // The late result finds no pending entry and must not accept
        h.core
            .handle_server_message(ServerMessage::BottleCheckResult {
                session_id: 42,
                exist: true,
                bottle: Some(Bottle { material: Some("plastic".to_string()), name: None }),
            })
            .await;

        let _ = h.outbound_rx.recv().await; // CHECK_BOTTLE only
        assert!(h.outbound_rx.try_recv().is_err());
        assert!(h.command_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_check_without_session_is_not_dispatched() {
        let mut h = harness();
        assert_eq!(h.core.check_bottle("SKU1".to_string()).await, None);
        assert!(h.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_check_result_for_wrong_session_ignored() {
        let mut h = harness();
        h.session.begin(42).await;

        h.core
            .handle_server_message(ServerMessage::BottleCheckResult {
                session_id: 7,
                exist: true,
                bottle: Some(Bottle { material: Some("plastic".to_string()), name: None }),
            })
            .await;

        assert!(h.command_rx.try_recv().is_err());
        assert!(h.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_session_replaces_active_one() {
        let mut h = harness();
        h.session.begin(1).await;

        h.core
            .handle_server_message(ServerMessage::StartSession { session_id: 2 })
            .await;

        assert_eq!(h.session.current().await, Some(2));
        assert_eq!(h.command_rx.recv().await, Some(AcceptorCommand::Start));
        assert_eq!(
            h.outbound_rx.recv().await,
            Some(ClientMessage::SessionStarted { session_id: 2 })
        );
    }

    #[tokio::test]
    async fn test_codes_advance_across_accepts() {
        let mut h = harness();
        h.session.begin(42).await;

        for expected in ["BTL-003-00001", "BTL-003-00002"] {
            let core = h.core.clone();
            let check = tokio::spawn(async move { core.check_bottle("SKU".to_string()).await });
            let _ = h.outbound_rx.recv().await; // CHECK_BOTTLE

            h.core
                .handle_server_message(ServerMessage::BottleCheckResult {
                    session_id: 42,
                    exist: true,
                    bottle: Some(Bottle { material: Some("aluminum".to_string()), name: None }),
                })
                .await;

            assert_eq!(h.command_rx.recv().await, Some(AcceptorCommand::AcceptAluminum));
            match h.outbound_rx.recv().await {
                Some(ClientMessage::BottleAccepted { code, .. }) => assert_eq!(code, expected),
                other => panic!("expected BOTTLE_ACCEPTED, got {:?}", other),
            }
            check.await.unwrap();
        }
    }
}
