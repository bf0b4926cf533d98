//! Duplex transport session controller.
//!
//! Owns the single long-lived WebSocket session to the ingest endpoint:
//! registration, the bounded send queue with its dedicated sender thread,
//! the heartbeat timer, exponential-backoff reconnection, and inbound
//! command dispatch.
//!
//! Per-attempt state machine:
//!
//! ```text
//!  DISCONNECTED → CONNECTING → OPEN → AUTHENTICATED → CLOSED → (backoff) → CONNECTING
//! ```
//!
//! The capture path only ever touches the non-blocking queue; a saturated or
//! dead socket never back-pressures an application thread.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use aivory_config::AgentConfig;

use crate::breakpoints::BreakpointRegistry;
use crate::capture::model::{BreakpointCapture, ExceptionCapture};
use crate::transport::envelope::{
    breakpoint_hit_payload, exception_payload, heartbeat_payload, is_auth_error, parse_command,
    register_payload, Envelope, EnvelopeKind, ServerCommand,
};
use crate::transport::CaptureSink;

/// Bounded send-queue capacity; overflow drops the envelope.
pub const SEND_QUEUE_CAPACITY: usize = 1000;
/// Heartbeat period while authenticated.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);
/// Sender poll timeout on the queue.
pub const SENDER_POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Reconnection attempts before giving up permanently.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

const RECONNECT_BASE_DELAY_MS: u64 = 1000;
const RECONNECT_MAX_DELAY_MS: u64 = 60_000;
/// Socket read timeout; bounds how long the reader holds the socket lock.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Sender idle interval while the session is down.
const DISCONNECTED_IDLE: Duration = Duration::from_millis(200);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Delay before the n-th reconnection attempt (1-based).
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let millis = RECONNECT_BASE_DELAY_MS
        .saturating_mul(1u64 << exponent)
        .min(RECONNECT_MAX_DELAY_MS);
    Duration::from_millis(millis)
}

// ── ConnectionState ──────────────────────────────────────────────────────────

/// Observable session state, derived from the transport flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and none attempted yet.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Handshake complete, registration not yet acknowledged.
    Open,
    /// Registration acknowledged; heartbeats flowing.
    Authenticated,
    /// A previous session closed.
    Closed,
}

// ── TransportController ──────────────────────────────────────────────────────

struct HeartbeatTimer {
    stop: Arc<(Mutex<bool>, Condvar)>,
}

impl HeartbeatTimer {
    fn stop(&self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }
}

struct TransportInner {
    config: Arc<AgentConfig>,
    registry: Arc<BreakpointRegistry>,
    socket: Mutex<Option<Socket>>,
    queue_tx: SyncSender<String>,
    queue_rx: Mutex<Option<Receiver<String>>>,
    connected: AtomicBool,
    authenticated: AtomicBool,
    should_reconnect: AtomicBool,
    running: AtomicBool,
    connecting: AtomicBool,
    was_connected: AtomicBool,
    sender_started: AtomicBool,
    reconnect_attempts: AtomicU32,
    /// Bumped per successful connect; stale reader threads notice and exit.
    generation: AtomicU64,
    heartbeat_period: Duration,
    heartbeat: Mutex<Option<HeartbeatTimer>>,
}

/// Transport controller: one long-lived duplex session plus its workers.
#[derive(Clone)]
pub struct TransportController {
    inner: Arc<TransportInner>,
}

impl TransportController {
    /// Create a controller with the default 30 s heartbeat period.
    pub fn new(config: Arc<AgentConfig>, registry: Arc<BreakpointRegistry>) -> Self {
        Self::with_heartbeat_period(config, registry, HEARTBEAT_PERIOD)
    }

    /// Create a controller with a custom heartbeat period.
    pub fn with_heartbeat_period(
        config: Arc<AgentConfig>,
        registry: Arc<BreakpointRegistry>,
        heartbeat_period: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::sync_channel(SEND_QUEUE_CAPACITY);
        Self {
            inner: Arc::new(TransportInner {
                config,
                registry,
                socket: Mutex::new(None),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                connected: AtomicBool::new(false),
                authenticated: AtomicBool::new(false),
                should_reconnect: AtomicBool::new(true),
                running: AtomicBool::new(true),
                connecting: AtomicBool::new(false),
                was_connected: AtomicBool::new(false),
                sender_started: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                heartbeat_period,
                heartbeat: Mutex::new(None),
            }),
        }
    }

    /// Initiate the first connection attempt without blocking the caller.
    pub fn start(&self) {
        let inner = self.inner.clone();
        thread::spawn(move || Self::connect(&inner));
    }

    /// Tear the session down: no reconnect, heartbeat stopped, sender
    /// released, socket closed, queued envelopes dropped. Idempotent.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.should_reconnect.store(false, Ordering::SeqCst);
        inner.running.store(false, Ordering::SeqCst);
        inner.authenticated.store(false, Ordering::SeqCst);
        Self::stop_heartbeat(inner);
        inner.connected.store(false, Ordering::SeqCst);
        if let Some(mut socket) = inner.socket.lock().unwrap().take() {
            let _ = socket.close(None);
        }
        debug!("transport shut down");
    }

    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Whether registration has been acknowledged on the current session.
    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::SeqCst)
    }

    /// Whether a closed session will be retried.
    pub fn should_reconnect(&self) -> bool {
        self.inner.should_reconnect.load(Ordering::SeqCst)
    }

    /// Reconnection attempts since the last successful registration.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Observable session state.
    pub fn state(&self) -> ConnectionState {
        let inner = &self.inner;
        if inner.authenticated.load(Ordering::SeqCst) {
            ConnectionState::Authenticated
        } else if inner.connected.load(Ordering::SeqCst) {
            ConnectionState::Open
        } else if inner.connecting.load(Ordering::SeqCst) {
            ConnectionState::Connecting
        } else if inner.was_connected.load(Ordering::SeqCst) {
            ConnectionState::Closed
        } else {
            ConnectionState::Disconnected
        }
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    fn connect(inner: &Arc<TransportInner>) {
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        inner.connecting.store(true, Ordering::SeqCst);
        debug!(url = %inner.config.backend_url, "connecting");
        let result = tungstenite::connect(inner.config.backend_url.as_str());
        inner.connecting.store(false, Ordering::SeqCst);

        let mut socket = match result {
            Ok((socket, _response)) => socket,
            Err(e) => {
                warn!(error = %e, "connection attempt failed");
                Self::schedule_reconnect(inner);
                return;
            }
        };
        set_read_timeout(&socket);

        // OPEN: announce identity immediately, bypassing the queue, so
        // nothing queued during an outage can jump ahead of registration.
        match Envelope::new(EnvelopeKind::Register, register_payload(&inner.config)).to_json() {
            Ok(frame) => {
                if let Err(e) = socket.send(Message::text(frame)) {
                    warn!(error = %e, "register send failed");
                    Self::schedule_reconnect(inner);
                    return;
                }
            }
            Err(e) => warn!(error = %e, "register envelope serialization failed"),
        }

        *inner.socket.lock().unwrap() = Some(socket);
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.connected.store(true, Ordering::SeqCst);
        inner.was_connected.store(true, Ordering::SeqCst);
        debug!("session open, register sent");

        let reader_inner = inner.clone();
        thread::spawn(move || Self::reader_loop(&reader_inner, generation));
        Self::start_sender(inner);
    }

    fn schedule_reconnect(inner: &Arc<TransportInner>) {
        if !inner.should_reconnect.load(Ordering::SeqCst) || !inner.running.load(Ordering::SeqCst) {
            return;
        }
        let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            error!(attempts = MAX_RECONNECT_ATTEMPTS, "reconnect attempts exhausted, giving up");
            return;
        }
        let delay = reconnect_delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        let timer_inner = inner.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            // Idempotent cancellation: shutdown or an auth failure in the
            // meantime clears the flag and this attempt evaporates.
            if timer_inner.should_reconnect.load(Ordering::SeqCst)
                && timer_inner.running.load(Ordering::SeqCst)
            {
                Self::connect(&timer_inner);
            }
        });
    }

    /// Single-shot transition out of the connected state.
    fn handle_disconnect(inner: &Arc<TransportInner>, generation: u64, remote: bool) {
        if inner.generation.load(Ordering::SeqCst) != generation {
            return; // stale: a newer session already exists
        }
        if !inner.connected.swap(false, Ordering::SeqCst) {
            return; // already handled
        }
        inner.authenticated.store(false, Ordering::SeqCst);
        Self::stop_heartbeat(inner);
        if let Some(mut socket) = inner.socket.lock().unwrap().take() {
            let _ = socket.close(None);
        }
        if remote
            && inner.should_reconnect.load(Ordering::SeqCst)
            && inner.running.load(Ordering::SeqCst)
        {
            warn!("session closed by peer, scheduling reconnect");
            Self::schedule_reconnect(inner);
        }
    }

    // ── Reader ────────────────────────────────────────────────────────────────

    fn reader_loop(inner: &Arc<TransportInner>, generation: u64) {
        loop {
            if !inner.running.load(Ordering::SeqCst)
                || inner.generation.load(Ordering::SeqCst) != generation
            {
                return;
            }
            let message = {
                let mut guard = inner.socket.lock().unwrap();
                let Some(socket) = guard.as_mut() else { return };
                socket.read()
            };
            match message {
                Ok(Message::Text(text)) => Self::dispatch(inner, text.as_str()),
                Ok(Message::Close(_)) => {
                    Self::handle_disconnect(inner, generation, true);
                    return;
                }
                Ok(_) => {} // ping/pong/binary: nothing to do
                Err(tungstenite::Error::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => {
                    debug!(error = %e, "socket read failed");
                    Self::handle_disconnect(inner, generation, true);
                    return;
                }
            }
        }
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────────

    fn dispatch(inner: &Arc<TransportInner>, text: &str) {
        let command = match parse_command(text) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "malformed command dropped");
                return;
            }
        };
        match command {
            ServerCommand::Registered { .. } => {
                debug!("registered with ingest endpoint");
                inner.authenticated.store(true, Ordering::SeqCst);
                inner.reconnect_attempts.store(0, Ordering::SeqCst);
                Self::start_heartbeat(inner);
            }
            ServerCommand::Error { payload } => {
                let code = payload
                    .as_ref()
                    .and_then(|p| p.code.clone())
                    .unwrap_or_default();
                let message = payload
                    .as_ref()
                    .and_then(|p| p.message.clone())
                    .unwrap_or_default();
                if is_auth_error(&code) {
                    error!(%code, %message, "authentication rejected, closing permanently");
                    inner.should_reconnect.store(false, Ordering::SeqCst);
                    let generation = inner.generation.load(Ordering::SeqCst);
                    Self::handle_disconnect(inner, generation, false);
                } else {
                    warn!(%code, %message, "server reported error");
                }
            }
            ServerCommand::SetBreakpoint { payload } => {
                let Some(payload) = payload else {
                    warn!("set_breakpoint without payload dropped");
                    return;
                };
                match (payload.id, payload.class_name, payload.line_number) {
                    (Some(id), Some(class_name), Some(line_number)) => {
                        debug!(%id, %class_name, line_number, "breakpoint set");
                        inner
                            .registry
                            .set(&id, &class_name, line_number, payload.condition);
                    }
                    _ => warn!("set_breakpoint missing required fields, dropped"),
                }
            }
            ServerCommand::RemoveBreakpoint { payload } => match payload.and_then(|p| p.id) {
                Some(id) => {
                    debug!(%id, "breakpoint removed");
                    inner.registry.remove(&id);
                }
                None => warn!("remove_breakpoint without id dropped"),
            },
            ServerCommand::Configure { .. } => debug!("configure command ignored (reserved)"),
            ServerCommand::Unknown => {}
        }
    }

    // ── Send queue ────────────────────────────────────────────────────────────

    fn enqueue(inner: &TransportInner, kind: EnvelopeKind, payload: serde_json::Value) {
        if !inner.authenticated.load(Ordering::SeqCst) {
            debug!(%kind, "queued pre-auth envelope");
        }
        let envelope = Envelope::new(kind, payload);
        match envelope.to_json() {
            Ok(frame) => match inner.queue_tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!(%kind, "send queue full, dropping envelope"),
                Err(TrySendError::Disconnected(_)) => debug!(%kind, "sender gone, dropping envelope"),
            },
            Err(e) => warn!(%kind, error = %e, "envelope serialization failed"),
        }
    }

    fn start_sender(inner: &Arc<TransportInner>) {
        if inner.sender_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(queue_rx) = inner.queue_rx.lock().unwrap().take() else {
            return;
        };
        let sender_inner = inner.clone();
        thread::spawn(move || Self::sender_loop(&sender_inner, queue_rx));
    }

    fn sender_loop(inner: &Arc<TransportInner>, queue_rx: Receiver<String>) {
        loop {
            if !inner.running.load(Ordering::SeqCst) {
                return;
            }
            if !inner.connected.load(Ordering::SeqCst) {
                // Leave queued envelopes alone until the session is restored
                thread::sleep(DISCONNECTED_IDLE);
                continue;
            }
            match queue_rx.recv_timeout(SENDER_POLL_TIMEOUT) {
                Ok(frame) => {
                    let mut guard = inner.socket.lock().unwrap();
                    match guard.as_mut() {
                        Some(socket) => {
                            let result = socket.send(Message::text(frame));
                            drop(guard);
                            if let Err(e) = result {
                                warn!(error = %e, "socket write failed");
                                let generation = inner.generation.load(Ordering::SeqCst);
                                Self::handle_disconnect(inner, generation, true);
                            }
                        }
                        None => {
                            drop(guard);
                            // The session vanished between the connected check
                            // and the poll; keep the frame for the restored one
                            let _ = inner.queue_tx.try_send(frame);
                            thread::sleep(DISCONNECTED_IDLE);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    // ── Heartbeat ─────────────────────────────────────────────────────────────

    fn start_heartbeat(inner: &Arc<TransportInner>) {
        let mut slot = inner.heartbeat.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let timer_stop = stop.clone();
        let timer_inner = inner.clone();
        let period = inner.heartbeat_period;
        thread::spawn(move || {
            let (lock, cvar) = &*timer_stop;
            loop {
                let stopped = lock.lock().unwrap();
                let (stopped, timeout) = cvar
                    .wait_timeout_while(stopped, period, |stopped| !*stopped)
                    .unwrap();
                if *stopped {
                    return;
                }
                drop(stopped);
                if timeout.timed_out() && timer_inner.authenticated.load(Ordering::SeqCst) {
                    Self::enqueue(
                        &timer_inner,
                        EnvelopeKind::Heartbeat,
                        heartbeat_payload(&timer_inner.config.agent_id),
                    );
                }
            }
        });
        *slot = Some(HeartbeatTimer { stop });
    }

    fn stop_heartbeat(inner: &Arc<TransportInner>) {
        if let Some(timer) = inner.heartbeat.lock().unwrap().take() {
            timer.stop();
        }
    }
}

impl CaptureSink for TransportController {
    fn send_exception(&self, capture: ExceptionCapture) {
        Self::enqueue(
            &self.inner,
            EnvelopeKind::Exception,
            exception_payload(&capture, &self.inner.config),
        );
    }

    fn send_breakpoint_hit(&self, capture: BreakpointCapture) {
        Self::enqueue(
            &self.inner,
            EnvelopeKind::BreakpointHit,
            breakpoint_hit_payload(&capture, &self.inner.config.agent_id),
        );
    }
}

fn set_read_timeout(socket: &Socket) {
    match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => {
            let _ = stream.set_read_timeout(Some(READ_POLL_INTERVAL));
        }
        MaybeTlsStream::Rustls(tls) => {
            let _ = tls.sock.set_read_timeout(Some(READ_POLL_INTERVAL));
        }
        _ => {}
    }
}
