//! The connection engine and the public client handle.
//!
//! One spawned task owns the transport for the life of the client: it dials,
//! authenticates, pumps frames in both directions and reconnects with
//! backoff. Callers never touch the socket; requests travel through an
//! outbound queue and resolve through per-request oneshot channels.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use oneme_wire::{Direction, ErrorPayload, Frame, Opcode, PROTOCOL_VERSION};

use crate::builder::ClientBuilder;
use crate::error::{Error, Result};
use crate::event::{self, Event, EventKind};
use crate::pending::PendingTable;
use crate::reconnect::ReconnectBackoff;
use crate::registry::{EventFilter, EventHandler, HandlerRegistry, Subscription};
use crate::session::{DeviceInfo, Profile, SessionStore, StoredSession};
use crate::transport::{self, Endpoint, Transport};

/// Outbound frames queued between callers and the connection task.
const OUTBOUND_QUEUE: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle of the connection engine, observable through
/// [`Client::watch_state`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to one client instance. Cheap to clone; all clones share the
/// same connection.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Config {
    pub(crate) endpoint: Endpoint,
    pub(crate) origin: String,
    pub(crate) device: DeviceInfo,
    pub(crate) request_timeout: Duration,
    pub(crate) ping_interval: Duration,
    pub(crate) auto_reconnect: bool,
    pub(crate) backoff: ReconnectBackoff,
}

/// Mutable per-client session data. Guarded by one mutex, never held
/// across an await.
#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) device_id: String,
    pub(crate) phone: Option<String>,
    pub(crate) token: Option<String>,
    /// Short-lived token from `request_code`, consumed by `sign_in`.
    pub(crate) temp_token: Option<String>,
    pub(crate) me: Option<Profile>,
}

pub(crate) struct Inner {
    pub(crate) cfg: Config,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) session: Mutex<SessionState>,
    pub(crate) pending: PendingTable,
    pub(crate) registry: HandlerRegistry,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) conn: RwLock<Option<mpsc::Sender<Frame>>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) runner: Mutex<Option<JoinHandle<()>>>,
}

/// How a single connection attempt ended.
enum ConnFailure {
    /// Worth retrying: network faults, timeouts, server hiccups.
    Transient(Error),
    /// Retrying cannot help: the stored token was rejected.
    Fatal(Error),
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start the connection engine and wait for the first connection to
    /// come up.
    ///
    /// With a stored token this resolves once login completes; without one
    /// it resolves right after the device handshake, leaving the client in
    /// `Authenticating` until [`request_code`](Client::request_code) and
    /// [`sign_in`](Client::sign_in) finish the interactive flow.
    ///
    /// Calling this while the engine is already running is a no-op.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        {
            let runner = self.inner.runner.lock();
            if let Some(handle) = runner.as_ref() {
                if !handle.is_finished() {
                    return Ok(());
                }
            }
        }

        let stored = self
            .inner
            .store
            .load()
            .map_err(|e| Error::Connection(format!("session store: {e}")))?;
        {
            let mut session = self.inner.session.lock();
            if let Some(stored) = stored {
                // Builder-supplied credentials win over stored ones.
                if session.token.is_none() {
                    session.token = stored.token;
                }
                if session.phone.is_none() {
                    session.phone = stored.phone;
                }
                if session.device_id.is_empty() {
                    session.device_id = stored.device_id;
                }
            }
            if session.device_id.is_empty() {
                session.device_id = uuid::Uuid::new_v4().to_string();
            }
        }
        self.inner.persist_session();

        let (first_tx, first_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.run(first_tx));
        *self.inner.runner.lock() = Some(handle);

        match first_rx.await {
            Ok(outcome) => outcome,
            // The engine exited without reporting, which only happens on
            // concurrent close.
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Stop the engine, fail outstanding requests and drop all handler
    /// subscriptions. Idempotent; the client cannot be reused afterwards.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let runner = self.inner.runner.lock().take();
        if let Some(handle) = runner {
            let _ = handle.await;
        }
        self.inner.pending.cancel_all(Error::ConnectionClosed);
        self.inner.set_state(ConnectionState::Closed);
        self.inner.registry.clear();
    }

    /// Send a request and wait for its response payload, using the
    /// configured request timeout.
    pub async fn send_request(&self, opcode: impl Into<Opcode>, payload: Value) -> Result<Value> {
        self.inner
            .request(opcode.into(), payload, self.inner.cfg.request_timeout)
            .await
    }

    /// Like [`send_request`](Client::send_request) with an explicit timeout.
    pub async fn send_request_with_timeout(
        &self,
        opcode: impl Into<Opcode>,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.inner.request(opcode.into(), payload, timeout).await
    }

    /// Register a handler for one event kind. Must be called from within
    /// a tokio runtime.
    pub fn subscribe(
        &self,
        kind: EventKind,
        filter: Option<EventFilter>,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        self.inner.registry.subscribe(kind, filter, handler)
    }

    /// Remove a subscription. Returns false when it was already gone.
    pub fn unsubscribe(&self, sub: Subscription) -> bool {
        self.inner.registry.unsubscribe(sub)
    }

    /// Shorthand for subscribing to [`EventKind::Ready`].
    pub fn on_ready(&self, handler: Arc<dyn EventHandler>) -> Subscription {
        self.subscribe(EventKind::Ready, None, handler)
    }

    /// Shorthand for subscribing to [`EventKind::Disconnected`].
    pub fn on_disconnected(&self, handler: Arc<dyn EventHandler>) -> Subscription {
        self.subscribe(EventKind::Disconnected, None, handler)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch state transitions as they happen.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Own profile, available once login has completed.
    pub fn me(&self) -> Option<Profile> {
        self.inner.session.lock().me.clone()
    }

    /// Whether a login token is present (stored or earned interactively).
    pub fn is_authorized(&self) -> bool {
        self.inner.session.lock().token.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Inner {
    /// Reconnect loop. Runs until shutdown or an unrecoverable failure.
    async fn run(self: Arc<Self>, first_tx: oneshot::Sender<Result<()>>) {
        let mut first = Some(first_tx);
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let outcome = tokio::select! {
                outcome = self.run_connection(&mut first) => outcome,
                _ = self.shutdown.cancelled() => Ok(false),
            };

            let was_connected = self.state() == ConnectionState::Connected;
            *self.conn.write() = None;
            let cancelled = self.pending.cancel_all(Error::ConnectionClosed);
            if cancelled > 0 {
                tracing::debug!(cancelled, "in-flight requests failed by disconnect");
            }
            if was_connected {
                self.registry.dispatch(&Event::Disconnected);
            }

            let transient_error = match outcome {
                Ok(completed) => {
                    if completed {
                        tracing::info!("connection ended");
                        // Only a connection that finished its handshake
                        // proves the endpoint works, so only then does the
                        // attempt counter reset.
                        attempt = 0;
                    }
                    None
                }
                Err(ConnFailure::Fatal(e)) => {
                    tracing::error!(error = %e, "unrecoverable connection failure");
                    self.set_state(ConnectionState::Closed);
                    self.shutdown.cancel();
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(e));
                    }
                    return;
                }
                Err(ConnFailure::Transient(e)) => {
                    tracing::warn!(error = %e, attempt, "connection attempt failed");
                    Some(e)
                }
            };

            if self.shutdown.is_cancelled() {
                break;
            }

            if !self.cfg.auto_reconnect {
                self.set_state(ConnectionState::Disconnected);
                if let Some(tx) = first.take() {
                    let e = transient_error.unwrap_or(Error::ConnectionClosed);
                    let _ = tx.send(Err(e));
                }
                return;
            }

            if self.cfg.backoff.should_give_up(attempt) {
                tracing::error!(attempt, "reconnect attempts exhausted");
                self.set_state(ConnectionState::Disconnected);
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(Error::Connection(format!(
                        "reconnect attempts exhausted after {attempt}"
                    ))));
                }
                return;
            }

            self.set_state(ConnectionState::Reconnecting);
            let delay = self.cfg.backoff.delay_for_attempt(attempt);
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => break,
            }
            attempt += 1;
        }
        // Every break above is a shutdown; close() takes the state to
        // Closed once the runner has been joined.
    }

    /// One connection: dial, handshake, optional token login, then pump
    /// frames until something ends it. `Ok(true)` means the handshake
    /// completed before the connection ended.
    async fn run_connection(
        self: &Arc<Self>,
        first: &mut Option<oneshot::Sender<Result<()>>>,
    ) -> std::result::Result<bool, ConnFailure> {
        let mut transport = transport::connect(&self.cfg.endpoint, &self.cfg.origin)
            .await
            .map_err(|e| ConnFailure::Transient(e.into()))?;

        self.set_state(ConnectionState::Authenticating);

        let (device_id, token) = {
            let session = self.session.lock();
            (session.device_id.clone(), session.token.clone())
        };
        let hello = json!({
            "deviceId": device_id,
            "userAgent": self.cfg.device.to_payload(),
        });
        self.exchange(transport.as_mut(), Opcode::SessionInit, hello)
            .await?;
        tracing::debug!("device handshake complete");

        let mut authenticated = false;
        if let Some(token) = token {
            let reply = self
                .exchange(transport.as_mut(), Opcode::Login, login_payload(&token))
                .await?;
            self.apply_login(&reply);
            authenticated = true;
        }

        // From here on the socket is shared: callers enqueue, this task
        // writes.
        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
        *self.conn.write() = Some(out_tx);

        if authenticated {
            self.set_state(ConnectionState::Connected);
            self.registry.dispatch(&Event::Ready);
        }
        if let Some(tx) = first.take() {
            let _ = tx.send(Ok(()));
        }

        let ping = tokio::spawn(ping_loop(self.clone()));
        self.drive(transport.as_mut(), &mut out_rx).await;
        ping.abort();
        transport.close().await;
        Ok(true)
    }

    /// Send one frame and wait inline for its response. Used during the
    /// handshake, before the outbound queue exists. Pushes that interleave
    /// still get dispatched.
    async fn exchange(
        &self,
        transport: &mut dyn Transport,
        opcode: Opcode,
        payload: Value,
    ) -> std::result::Result<Value, ConnFailure> {
        let seq = self.pending.next_seq();
        let frame = Frame::request(opcode, seq, payload);
        transport
            .send(frame)
            .await
            .map_err(|e| ConnFailure::Transient(e.into()))?;

        let deadline = self.cfg.request_timeout;
        let recv_matching = async {
            loop {
                match transport.recv().await {
                    Ok(Some(frame)) => {
                        if frame.cmd == Direction::Response && frame.seq == seq {
                            return Ok(frame);
                        }
                        self.on_frame(frame);
                    }
                    Ok(None) => {
                        return Err(ConnFailure::Transient(Error::Connection(format!(
                            "stream ended waiting for {opcode}"
                        ))))
                    }
                    Err(e) => return Err(ConnFailure::Transient(e.into())),
                }
            }
        };
        let frame = match tokio::time::timeout(deadline, recv_matching).await {
            Ok(outcome) => outcome?,
            Err(_) => return Err(ConnFailure::Transient(Error::Timeout(deadline))),
        };

        if let Some(err) = ErrorPayload::from_payload(&frame.payload) {
            let error = Error::from_server(&err);
            return match error {
                // A rejected credential will be rejected again; do not
                // burn reconnect attempts on it.
                Error::Auth(_) => Err(ConnFailure::Fatal(error)),
                other => Err(ConnFailure::Transient(other)),
            };
        }
        Ok(frame.payload)
    }

    /// Pump frames both ways until shutdown, a transport fault or an
    /// orderly close from the peer.
    async fn drive(&self, transport: &mut dyn Transport, out_rx: &mut mpsc::Receiver<Frame>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                frame = out_rx.recv() => {
                    let Some(frame) = frame else { return };
                    if let Err(e) = transport.send(frame).await {
                        tracing::warn!(error = %e, "send failed, dropping connection");
                        return;
                    }
                }
                frame = transport.recv() => match frame {
                    Ok(Some(frame)) => self.on_frame(frame),
                    Ok(None) => {
                        tracing::info!("server closed the connection");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transport fault");
                        return;
                    }
                },
            }
        }
    }

    /// Route one inbound frame.
    fn on_frame(&self, frame: Frame) {
        if frame.ver != PROTOCOL_VERSION {
            // Version skew is noted but the frame is processed as usual.
            tracing::debug!(ver = frame.ver, opcode = frame.opcode, "unexpected protocol version");
        }
        match frame.cmd {
            Direction::Response => {
                let resolved = match ErrorPayload::from_payload(&frame.payload) {
                    Some(err) => self.pending.fail(frame.seq, Error::from_server(&err)),
                    None => self.pending.resolve(frame.seq, frame.payload),
                };
                if resolved {
                    tracing::trace!(seq = frame.seq, "response resolved");
                } else {
                    // Typical after a caller timed out and evicted its seq.
                    tracing::debug!(seq = frame.seq, "response for unknown request, discarding");
                }
            }
            Direction::Push => {
                let opcode = frame.opcode();
                let event = event::decode(opcode, frame.payload);
                let delivered = self.registry.dispatch(&event);
                tracing::trace!(opcode = %opcode, delivered, "push dispatched");
            }
            Direction::Request => {
                tracing::debug!(opcode = frame.opcode, "ignoring server-initiated request");
            }
        }
    }

    /// Queue a request on the live connection and wait for its response.
    pub(crate) async fn request(
        &self,
        opcode: Opcode,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let sender = self.conn.read().clone().ok_or(Error::ConnectionClosed)?;
        let ticket = self.pending.allocate(opcode.raw());
        let seq = ticket.seq;
        let frame = Frame::request(opcode, seq, payload);

        // One deadline covers the whole trip. When the link stops draining,
        // the outbound queue fills and even handing the frame over blocks;
        // that wait counts against the timeout like everything else.
        let roundtrip = async {
            if sender.send(frame).await.is_err() {
                self.pending.remove(seq);
                return Err(Error::ConnectionClosed);
            }
            match ticket.rx.await {
                Ok(outcome) => outcome,
                // Sender side dropped, which means the connection tore down.
                Err(_) => Err(Error::ConnectionClosed),
            }
        };

        match tokio::time::timeout(timeout, roundtrip).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.remove(seq);
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Pull the own profile out of a login response.
    pub(crate) fn apply_login(&self, payload: &Value) {
        if let Some(contact) = payload.pointer("/profile/contact") {
            match serde_json::from_value::<Profile>(contact.clone()) {
                Ok(profile) => {
                    tracing::info!(user_id = profile.id, "logged in");
                    self.session.lock().me = Some(profile);
                }
                Err(e) => tracing::warn!(error = %e, "login profile did not decode"),
            }
        }
        let chats = payload
            .get("chats")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        tracing::debug!(chats, "initial sync received");
    }

    /// Write the current session through the store. Persistence failures
    /// are logged, not fatal: the client works on, memory-only.
    pub(crate) fn persist_session(&self) {
        let snapshot = {
            let session = self.session.lock();
            StoredSession {
                device_id: session.device_id.clone(),
                token: session.token.clone(),
                phone: session.phone.clone(),
                updated_at: Utc::now(),
            }
        };
        if let Err(e) = self.store.save(&snapshot) {
            tracing::warn!(error = %e, "failed to persist session");
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Transition the observable state. Duplicate values are swallowed and
    /// `Closed` is terminal.
    pub(crate) fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next || *current == ConnectionState::Closed {
                return false;
            }
            tracing::info!(from = %current, to = %next, "connection state");
            *current = next;
            true
        });
    }
}

/// Keep-alive requests on the configured interval. Aborted when the
/// connection it belongs to goes away; also watches shutdown directly, in
/// case the abort never comes because the engine was cancelled first.
async fn ping_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.cfg.ping_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // interval fires immediately; the connection is fresh, skip that one.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.shutdown.cancelled() => return,
        }
        match inner
            .request(
                Opcode::Ping,
                json!({"interactive": true}),
                inner.cfg.request_timeout,
            )
            .await
        {
            Ok(_) => tracing::trace!("ping acknowledged"),
            Err(e) => tracing::debug!(error = %e, "ping failed"),
        }
    }
}

/// Login/sync payload for a resumption token.
pub(crate) fn login_payload(token: &str) -> Value {
    json!({
        "interactive": true,
        "token": token,
        "chatsSync": 0,
        "contactsSync": 0,
        "presenceSync": 0,
        "draftsSync": 0,
        "chatsCount": 40,
    })
}
