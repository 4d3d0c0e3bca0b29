//! Socket session: WebSocket lifecycle, frame multiplexing, heartbeats.
//!
//! One `SocketSession` is one connection. It owns the WebSocket, runs the
//! authentication handshake, dispatches inbound frames to filter waiters and
//! to the raw frame stream, and drives the heartbeat loop.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Connected ─┬─→ Closed
//!        ↑                                                │
//!        └────────────── Reconnecting ←───────────────────┘
//! ```
//!
//! `Disconnected` and `Reconnecting` belong to the session orchestrator,
//! which builds a fresh `SocketSession` per attempt; a single instance moves
//! `Connecting → Authenticating → Connected → Closed`.
//!
//! # Waiters
//!
//! Awaiting a frame registers `{id, filter, resolver}` in a shared registry.
//! The reader resolves **every** waiter whose filter matches an inbound
//! frame. Timeouts and drops deregister; closing the session rejects all
//! pending waiters with the close reason.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use confab_proto::{name, Frame, FrameFilter, NonceSequence};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{CloseReason, SocketError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Interval between heartbeat pings while connected.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// How long a single ping may wait for its pong.
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Failed pings tolerated before the connection is declared broken.
pub const PING_MAX_ATTEMPT: u32 = 3;

/// Default deadline for frame waiters.
pub const AWAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered frames per raw-stream subscriber.
const FRAME_CAPACITY: usize = 256;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No connection attempt yet.
    Disconnected,
    /// TCP/WebSocket opening.
    Connecting,
    /// Socket open, handshake in flight.
    Authenticating,
    /// Handshake confirmed, heartbeat running.
    Connected,
    /// Connection broke; the orchestrator is retrying.
    Reconnecting,
    /// Closed. Terminal for this instance.
    Closed,
}

/// Socket timing parameters. Defaults match the production protocol; tests
/// inject shortened clocks.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// Interval between heartbeat pings.
    pub ping_interval: Duration,
    /// Deadline for one ping.
    pub ping_timeout: Duration,
    /// Failed pings tolerated before force-closing.
    pub ping_max_attempts: u32,
    /// Default deadline for frame waiters.
    pub await_timeout: Duration,
    /// Deadline for each handshake step.
    pub handshake_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            ping_timeout: PING_TIMEOUT,
            ping_max_attempts: PING_MAX_ATTEMPT,
            await_timeout: AWAIT_TIMEOUT,
            handshake_timeout: AWAIT_TIMEOUT,
        }
    }
}

/// Identity material sent in `authentication.response`.
#[derive(Debug, Clone)]
pub struct HandshakeIdentity {
    /// Account auth key from the me endpoint.
    pub auth_key: String,
    /// Current user id.
    pub user_id: u64,
    /// Installation base URL.
    pub installation_domain: String,
    /// Installation id.
    pub installation_id: u64,
    /// Client version string.
    pub client_version: String,
}

struct Waiter {
    id: u64,
    filter: FrameFilter,
    tx: oneshot::Sender<Frame>,
}

#[derive(Default)]
struct Registry {
    waiters: Mutex<Vec<Waiter>>,
    next_id: AtomicU64,
}

impl Registry {
    fn insert(&self, filter: FrameFilter, tx: oneshot::Sender<Frame>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.waiters.lock().expect("waiter lock poisoned").push(Waiter { id, filter, tx });
        id
    }

    fn remove(&self, id: u64) {
        self.waiters.lock().expect("waiter lock poisoned").retain(|w| w.id != id);
    }

    /// Take every waiter whose filter matches the frame.
    fn take_matching(&self, frame: &Frame) -> Vec<oneshot::Sender<Frame>> {
        let mut waiters = self.waiters.lock().expect("waiter lock poisoned");
        let mut taken = Vec::new();
        let mut index = 0;
        while index < waiters.len() {
            if waiters[index].filter.matches(frame) {
                taken.push(waiters.swap_remove(index).tx);
            } else {
                index += 1;
            }
        }
        taken
    }

    /// Drop every pending waiter; their receivers observe the close.
    fn reject_all(&self) {
        self.waiters.lock().expect("waiter lock poisoned").clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.waiters.lock().expect("waiter lock poisoned").len()
    }
}

/// Deregisters a waiter when the awaiting future is dropped (timeout, race
/// loser, caller cancellation).
struct WaiterGuard {
    registry: Arc<Registry>,
    id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// A live, authenticated socket connection.
pub struct SocketSession {
    config: SocketConfig,
    nonces: NonceSequence,
    registry: Arc<Registry>,
    frames: broadcast::Sender<Frame>,
    protocol_errors: broadcast::Sender<String>,
    writer: Arc<tokio::sync::Mutex<WsSink>>,
    state: Mutex<SocketState>,
    closed: watch::Sender<Option<CloseReason>>,
    reader: Mutex<Option<AbortHandle>>,
    heartbeat: Mutex<Option<AbortHandle>>,
}

impl SocketSession {
    /// Open the WebSocket, run the authentication handshake, and start the
    /// heartbeat.
    ///
    /// Waiters for the handshake frames are registered before the reader
    /// task starts, so frames arriving early cannot be missed.
    ///
    /// # Errors
    ///
    /// - [`SocketError::Connect`] when the socket cannot be opened
    /// - [`SocketError::AuthRejected`] when the server answers with
    ///   `authentication.error`
    /// - [`SocketError::Handshake`] / [`SocketError::Timeout`] when the
    ///   handshake stalls
    pub async fn connect(
        url: &str,
        token: &str,
        identity: &HandshakeIdentity,
        config: SocketConfig,
    ) -> Result<Arc<Self>, SocketError> {
        let mut request =
            url.into_client_request().map_err(|e| SocketError::Connect(e.to_string()))?;
        let cookie = HeaderValue::from_str(&format!("tw-auth={token}"))
            .map_err(|e| SocketError::Connect(e.to_string()))?;
        request.headers_mut().insert(COOKIE, cookie);

        let (stream, _response) =
            connect_async(request).await.map_err(|e| SocketError::Connect(e.to_string()))?;
        let (sink, stream) = stream.split();

        let (frames, _) = broadcast::channel(FRAME_CAPACITY);
        let (protocol_errors, _) = broadcast::channel(16);
        let (closed, _) = watch::channel(None);

        let session = Arc::new(Self {
            config,
            nonces: NonceSequence::new(),
            registry: Arc::new(Registry::default()),
            frames,
            protocol_errors,
            writer: Arc::new(tokio::sync::Mutex::new(sink)),
            state: Mutex::new(SocketState::Connecting),
            closed,
            reader: Mutex::new(None),
            heartbeat: Mutex::new(None),
        });

        let (auth_guard, auth_rx) =
            session.register(FrameFilter::name(name::AUTHENTICATION_REQUEST))?;

        let reader = tokio::spawn(Self::read_loop(stream, Arc::clone(&session)));
        *session.reader.lock().expect("reader lock poisoned") = Some(reader.abort_handle());

        session.set_state(SocketState::Authenticating);
        session.wait(auth_rx, config.handshake_timeout).await.map_err(|e| {
            session.close(CloseReason::local("handshake: no authentication.request"));
            e
        })?;
        drop(auth_guard);

        let (ok_guard, ok_rx) =
            session.register(FrameFilter::name(name::AUTHENTICATION_CONFIRMATION))?;
        let (err_guard, err_rx) = session.register(FrameFilter::name(name::AUTHENTICATION_ERROR))?;

        session
            .send_frame(
                name::AUTHENTICATION_RESPONSE,
                json!({
                    "authKey": identity.auth_key,
                    "userId": identity.user_id,
                    "installationDomain": identity.installation_domain,
                    "installationId": identity.installation_id,
                    "clientVersion": identity.client_version,
                }),
            )
            .await?;

        let outcome = tokio::time::timeout(config.handshake_timeout, async {
            tokio::select! {
                confirmation = ok_rx => confirmation.map(|frame| (true, frame)),
                error = err_rx => error.map(|frame| (false, frame)),
            }
        })
        .await;
        drop(ok_guard);
        drop(err_guard);

        match outcome {
            Ok(Ok((true, _confirmation))) => {
                session.set_state(SocketState::Connected);
                Self::spawn_heartbeat(Arc::clone(&session));
                Ok(session)
            }
            Ok(Ok((false, error))) => {
                session.close(CloseReason::local("authentication rejected"));
                Err(SocketError::AuthRejected { contents: error.contents })
            }
            Ok(Err(_)) => Err(SocketError::Closed { reason: session.current_close_reason() }),
            Err(_) => {
                session.close(CloseReason::local("handshake timed out"));
                Err(SocketError::Handshake(
                    "timed out waiting for authentication confirmation".to_string(),
                ))
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SocketState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: SocketState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    /// Socket timing parameters.
    #[must_use]
    pub fn config(&self) -> SocketConfig {
        self.config
    }

    /// Subscribe to the raw inbound frame stream.
    #[must_use]
    pub fn frames(&self) -> broadcast::Receiver<Frame> {
        self.frames.subscribe()
    }

    /// Subscribe to non-fatal protocol errors (malformed inbound frames).
    #[must_use]
    pub fn protocol_errors(&self) -> broadcast::Receiver<String> {
        self.protocol_errors.subscribe()
    }

    /// Observe the close reason. `None` until the session closes.
    #[must_use]
    pub fn closed(&self) -> watch::Receiver<Option<CloseReason>> {
        self.closed.subscribe()
    }

    /// The recorded close reason, if the session has closed.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed.borrow().clone()
    }

    fn current_close_reason(&self) -> CloseReason {
        self.close_reason().unwrap_or_else(|| CloseReason::local("socket closed"))
    }

    /// Serialize and send a nonced frame; returns the frame with its nonce.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`] on a closed session, [`SocketError::Transport`]
    /// when the write fails.
    pub async fn send_frame(&self, name: &str, contents: Value) -> Result<Frame, SocketError> {
        let frame = Frame::request(name, contents, &self.nonces);
        self.write(&frame).await?;
        Ok(frame)
    }

    /// Send a nonce-less event frame.
    ///
    /// # Errors
    ///
    /// See [`SocketSession::send_frame`].
    pub async fn send_event(&self, name: &str, contents: Value) -> Result<Frame, SocketError> {
        let frame = Frame::event(name, contents);
        self.write(&frame).await?;
        Ok(frame)
    }

    /// Await the first frame matching `filter`, with the default deadline.
    ///
    /// # Errors
    ///
    /// [`SocketError::Timeout`] after the deadline, [`SocketError::Closed`]
    /// when the session closes first, [`SocketError::Filter`] for an empty
    /// filter.
    pub async fn await_frame(&self, filter: FrameFilter) -> Result<Frame, SocketError> {
        self.await_frame_timeout(filter, self.config.await_timeout).await
    }

    /// Await the first frame matching `filter` within `timeout`.
    ///
    /// # Errors
    ///
    /// See [`SocketSession::await_frame`].
    pub async fn await_frame_timeout(
        &self,
        filter: FrameFilter,
        timeout: Duration,
    ) -> Result<Frame, SocketError> {
        let (_guard, rx) = self.register(filter)?;
        self.wait(rx, timeout).await
    }

    /// Wait for the first of several filters to match; the losers are
    /// cancelled.
    ///
    /// # Errors
    ///
    /// See [`SocketSession::await_frame`].
    pub async fn race_frames(
        &self,
        filters: Vec<FrameFilter>,
        timeout: Duration,
    ) -> Result<Frame, SocketError> {
        if filters.is_empty() {
            return Err(SocketError::Filter(confab_proto::FilterError::Empty));
        }
        let mut entries = Vec::with_capacity(filters.len());
        for filter in filters {
            entries.push(self.register(filter)?);
        }
        let receivers: Vec<_> = entries.iter_mut().map(|(_, rx)| rx).collect();

        match tokio::time::timeout(timeout, futures_util::future::select_all(receivers)).await {
            Ok((Ok(frame), _, _)) => Ok(frame),
            Ok((Err(_), _, _)) => Err(SocketError::Closed { reason: self.current_close_reason() }),
            Err(_) => Err(SocketError::Timeout { elapsed: timeout }),
        }
    }

    /// Send a nonced frame and await the response carrying the same nonce.
    ///
    /// # Errors
    ///
    /// See [`SocketSession::await_frame`].
    pub async fn request(
        &self,
        name: &str,
        contents: Value,
        timeout: Duration,
    ) -> Result<Frame, SocketError> {
        let frame = Frame::request(name, contents, &self.nonces);
        let nonce = frame.nonce.unwrap_or_default();
        // Waiter goes in before the write so a fast reply cannot be missed.
        let (_guard, rx) = self.register(FrameFilter::nonce(nonce))?;
        self.write(&frame).await?;
        self.wait(rx, timeout).await
    }

    /// Send an event frame and await a frame matching `filter`.
    ///
    /// The waiter is registered before the write, so an echo that arrives
    /// faster than the send completes cannot be missed.
    ///
    /// # Errors
    ///
    /// See [`SocketSession::await_frame`].
    pub async fn exchange(
        &self,
        name: &str,
        contents: Value,
        filter: FrameFilter,
        timeout: Duration,
    ) -> Result<Frame, SocketError> {
        let (_guard, rx) = self.register(filter)?;
        self.send_event(name, contents).await?;
        self.wait(rx, timeout).await
    }

    /// Capture the next `count` inbound frames.
    ///
    /// # Errors
    ///
    /// [`SocketError::Timeout`] if fewer than `count` frames arrive in time.
    pub async fn buffer_frames(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<Frame>, SocketError> {
        let mut rx = self.frames.subscribe();
        tokio::time::timeout(timeout, async {
            let mut out = Vec::with_capacity(count);
            while out.len() < count {
                match rx.recv().await {
                    Ok(frame) => out.push(frame),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "frame buffer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            out
        })
        .await
        .map_err(|_| SocketError::Timeout { elapsed: timeout })
    }

    /// Stop the heartbeat loop, cancelling any in-flight ping.
    pub fn stop_ping(&self) {
        if let Some(handle) = self.heartbeat.lock().expect("heartbeat lock poisoned").take() {
            handle.abort();
        }
    }

    /// Close the session.
    ///
    /// Does not wait for the underlying socket's orderly closure: the reader
    /// stops, every pending waiter is rejected with the reason, and close
    /// observers are notified before this method returns. Idempotent.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == SocketState::Closed {
                return;
            }
            *state = SocketState::Closed;
        }
        debug!(%reason, "closing socket session");

        self.stop_ping();
        if let Some(handle) = self.reader.lock().expect("reader lock poisoned").take() {
            handle.abort();
        }
        self.registry.reject_all();
        let _ = self.closed.send(Some(reason));

        // Orderly socket shutdown can be slow; fire and forget.
        let writer = Arc::clone(&self.writer);
        tokio::spawn(async move {
            let _ = writer.lock().await.close().await;
        });
    }

    fn register(
        &self,
        filter: FrameFilter,
    ) -> Result<(WaiterGuard, oneshot::Receiver<Frame>), SocketError> {
        filter.validate()?;
        if let Some(reason) = self.close_reason() {
            return Err(SocketError::Closed { reason });
        }
        let (tx, rx) = oneshot::channel();
        let id = self.registry.insert(filter, tx);
        Ok((WaiterGuard { registry: Arc::clone(&self.registry), id }, rx))
    }

    async fn wait(
        &self,
        rx: oneshot::Receiver<Frame>,
        timeout: Duration,
    ) -> Result<Frame, SocketError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(SocketError::Closed { reason: self.current_close_reason() }),
            Err(_) => Err(SocketError::Timeout { elapsed: timeout }),
        }
    }

    async fn write(&self, frame: &Frame) -> Result<(), SocketError> {
        if let Some(reason) = self.close_reason() {
            return Err(SocketError::Closed { reason });
        }
        let text = frame.encode()?;
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(text))
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))
    }

    fn dispatch(&self, frame: Frame) {
        for tx in self.registry.take_matching(&frame) {
            let _ = tx.send(frame.clone());
        }
        let _ = self.frames.send(frame);
    }

    async fn read_loop(mut stream: SplitStream<WsStream>, session: Arc<SocketSession>) {
        let reason = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => session.handle_text(&text),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => session.handle_text(text),
                    Err(_) => {
                        warn!("ignoring non-utf8 binary websocket message");
                        let _ = session.protocol_errors.send("non-utf8 binary message".to_string());
                    }
                },
                Some(Ok(Message::Close(close))) => {
                    break match close {
                        Some(close) => CloseReason {
                            reason: "server closed the connection".to_string(),
                            code: Some(u16::from(close.code)),
                            message: Some(close.reason.to_string()),
                        },
                        None => CloseReason::local("server closed the connection"),
                    };
                }
                Some(Ok(_)) => {} // ws-level ping/pong, handled by tungstenite
                Some(Err(e)) => break CloseReason::local(format!("transport error: {e}")),
                None => break CloseReason::local("connection ended"),
            }
        };
        session.close(reason);
    }

    fn handle_text(&self, text: &str) {
        match Frame::decode(text) {
            Ok(frame) => {
                debug!(name = %frame.name, nonce = ?frame.nonce, "frame received");
                self.dispatch(frame);
            }
            Err(e) => {
                warn!(error = %e, "ignoring malformed inbound frame");
                let _ = self.protocol_errors.send(e.to_string());
            }
        }
    }

    fn spawn_heartbeat(session: Arc<SocketSession>) {
        let config = session.config;
        let worker = Arc::clone(&session);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(config.ping_interval).await;
                let mut alive = false;
                for attempt in 1..=config.ping_max_attempts {
                    match worker
                        .request(name::PING, json!({}), config.ping_timeout)
                        .await
                    {
                        Ok(_) => {
                            alive = true;
                            break;
                        }
                        Err(SocketError::Timeout { .. }) => {
                            debug!(attempt, "ping timed out");
                        }
                        Err(_) => return, // session closed under us
                    }
                }
                if !alive {
                    worker.close(CloseReason::local(format!(
                        "heartbeat failed after {} pings",
                        config.ping_max_attempts
                    )));
                    return;
                }
            }
        });
        *session.heartbeat.lock().expect("heartbeat lock poisoned") = Some(handle.abort_handle());
    }
}

impl std::fmt::Debug for SocketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketSession")
            .field("state", &self.state())
            .field("last_nonce", &self.nonces.last())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn config_defaults_match_the_protocol_constants() {
        let config = SocketConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.ping_timeout, Duration::from_secs(3));
        assert_eq!(config.ping_max_attempts, 3);
        assert_eq!(config.await_timeout, Duration::from_secs(30));
    }

    #[test]
    fn registry_resolves_every_matching_waiter() {
        let registry = Registry::default();
        let (tx_name, rx_name) = oneshot::channel();
        let (tx_nonce, rx_nonce) = oneshot::channel();
        let (tx_other, rx_other) = oneshot::channel();

        registry.insert(FrameFilter::name("pong"), tx_name);
        registry.insert(FrameFilter::nonce(7), tx_nonce);
        registry.insert(FrameFilter::name("room.typing"), tx_other);

        let mut frame = Frame::event("pong", json!({}));
        frame.nonce = Some(7);

        let matched = registry.take_matching(&frame);
        assert_eq!(matched.len(), 2);
        for tx in matched {
            tx.send(frame.clone()).unwrap();
        }

        assert_eq!(rx_name.blocking_recv().unwrap().name, "pong");
        assert_eq!(rx_nonce.blocking_recv().unwrap().nonce, Some(7));
        assert_eq!(registry.len(), 1);
        let mut rx_other = rx_other;
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn guard_drop_deregisters() {
        let registry = Arc::new(Registry::default());
        let (tx, _rx) = oneshot::channel();
        let id = registry.insert(FrameFilter::name("ping"), tx);
        assert_eq!(registry.len(), 1);

        drop(WaiterGuard { registry: Arc::clone(&registry), id });
        assert_eq!(registry.len(), 0);
    }
}
