//! Realtime client with heartbeats and automatic reconnection.
//!
//! Each successful [`RealtimeClient::start`] spawns one reactor task. The
//! reactor owns the transport, the heartbeat monitor, and the reconnection
//! timer, so all connection state is mutated from a single place. The only
//! shared pieces are the atomic [`ConnectionState`], the attempt counter,
//! the command channel into the reactor, and the list of pending start
//! futures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, Shared as SharedFuture};
use futures::{future, FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until, timeout, timeout_at};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::backoff::BackoffPolicy;
use crate::close::{
    CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NORMAL, CloseCause, Closure, HEARTBEAT_TIMEOUT_REASON,
    USER_CLOSE_REASON, classify,
};
use crate::config::ClientConfig;
use crate::error::{RealtimeError, RealtimeResult};
use crate::events::{
    BusEvent, EventBus, FailureReason, LifecycleEvent, LostReason, ReconnectOutcome, StartFuture,
    StartOutcome,
};
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::message::{InboundMessage, PROBE_PAYLOAD, is_liveness_reply};
use crate::session::SessionGate;
use crate::state::{AtomicConnectionState, ConnectionState};
use crate::transport::{
    ConnectError, Connector, Transport, TransportSink, TungsteniteConnector, close_message,
    close_parts, redacted,
};

/// Upper bound for writing a close frame before the transport is dropped.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Requests from the client handle to its reactor.
#[derive(Debug)]
enum Command {
    Send(String),
    Close,
}

/// Resolves once a reactor task has ended.
type Finished = SharedFuture<BoxFuture<'static, ()>>;

/// The reactor currently entitled to drive the connection.
struct SessionSlot {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    finished: Finished,
}

/// State shared between the client handle and its reactor.
struct Shared {
    state: AtomicConnectionState,
    attempt: AtomicU32,
    next_session: AtomicU64,
    next_generation: AtomicU64,
    slot: Mutex<Option<SessionSlot>>,
    waiters: Mutex<Vec<oneshot::Sender<StartOutcome>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicConnectionState::new(ConnectionState::Idle),
            attempt: AtomicU32::new(0),
            next_session: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            slot: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
        }
    }

    fn register_waiter(&self) -> StartFuture {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(tx);
        rx.map(|outcome| outcome.unwrap_or(StartOutcome::Failed(FailureReason::UserClosed)))
            .boxed()
    }

    /// End the chain: move to `Closed`, restore the attempt budget for the
    /// next `start`, and take the pending waiters, all under the slot lock so a
    /// concurrent `start` either sees the old state or registers a fresh waiter.
    fn settle(&self) -> Vec<oneshot::Sender<StartOutcome>> {
        let _slot = self.slot.lock();
        self.attempt.store(0, Ordering::SeqCst);
        self.state.store(ConnectionState::Closed);
        std::mem::take(&mut *self.waiters.lock())
    }

    /// Re-check after a backoff delay that no other path started a connection.
    fn claim_retry(&self, session: u64) -> bool {
        let slot = self.slot.lock();
        if slot.as_ref().map(|s| s.id) != Some(session) {
            return false;
        }
        self.state.begin_connecting().is_ok()
    }

    fn command(&self, command: Command) -> Result<(), Command> {
        let slot = self.slot.lock();
        match slot.as_ref() {
            Some(slot) => slot.commands.send(command).map_err(|e| e.0),
            None => Err(command),
        }
    }
}

fn resolve(waiters: Vec<oneshot::Sender<StartOutcome>>, outcome: StartOutcome) {
    for waiter in waiters {
        let _ = waiter.send(outcome);
    }
}

/// Client for a single logical realtime connection.
///
/// Dropping the client closes the connection and cancels any pending
/// reconnection.
pub struct RealtimeClient {
    gate: Arc<dyn SessionGate>,
    bus: Arc<dyn EventBus>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl RealtimeClient {
    /// Create a client connecting over `tokio-tungstenite`.
    #[must_use]
    pub fn new(gate: Arc<dyn SessionGate>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            gate,
            bus,
            connector: Arc::new(TungsteniteConnector),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Use a different transport connector. Applies to connections started afterwards.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Reconnection attempts made since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::SeqCst)
    }

    /// Check if the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Start the connection.
    ///
    /// If a connection is already connecting, open, or closing this does
    /// nothing and the returned future resolves to
    /// [`StartOutcome::AlreadyActive`]. Otherwise a reactor is spawned on the
    /// current tokio runtime and the future resolves once the connection
    /// opens, possibly after reconnection attempts, or the chain gives up.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Config`] if `config` is invalid.
    pub fn start(&self, config: ClientConfig) -> RealtimeResult<StartFuture> {
        config.validate()?;

        let mut slot = self.shared.slot.lock();
        if let Err(current) = self.shared.state.begin_connecting() {
            debug!(state = ?current, "start ignored, connection already active");
            return Ok(future::ready(StartOutcome::AlreadyActive).boxed());
        }

        // A start during a pending reconnection continues that chain's attempt budget.
        let session = self.shared.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = oneshot::channel::<()>();
        *slot = Some(SessionSlot {
            id: session,
            commands: commands_tx,
            finished: finished_rx.map(|_| ()).boxed().shared(),
        });
        let outcome = self.shared.register_waiter();
        drop(slot);

        let reactor = Reactor {
            gate: Arc::clone(&self.gate),
            bus: Arc::clone(&self.bus),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
            config,
            session,
            commands: commands_rx,
            _finished: finished_tx,
        };
        tokio::spawn(reactor.run());

        Ok(outcome)
    }

    /// Send a text payload verbatim.
    ///
    /// `Ok` means the payload was handed to the open connection, not that it
    /// was written. If that connection ends before the payload reaches the
    /// socket, the payload is discarded. Nothing is queued across
    /// reconnections: the caller owns retrying.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::NotOpen`] if the connection is not open.
    pub fn send_text(&self, text: impl Into<String>) -> RealtimeResult<()> {
        if !self.is_open() {
            return Err(RealtimeError::NotOpen);
        }
        self.shared
            .command(Command::Send(text.into()))
            .map_err(|_| RealtimeError::NotOpen)
    }

    /// Serialize `payload` to JSON and send it.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the connection is not open.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> RealtimeResult<()> {
        let text = serde_json::to_string(payload)?;
        self.send_text(text)
    }

    /// Close the connection for good.
    ///
    /// The closure is always treated as user requested: no reconnection is
    /// scheduled, and a pending one is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::NotInitialized`] if `start` was never called.
    pub fn close(&self) -> RealtimeResult<()> {
        if self.state() == ConnectionState::Idle {
            return Err(RealtimeError::NotInitialized);
        }
        if self.shared.command(Command::Close).is_err() {
            debug!("close ignored, connection already ended");
        }
        Ok(())
    }

    /// Wait until the current connection chain has ended.
    ///
    /// Resolves once the reactor started by the latest `start` has stopped,
    /// e.g. after `close()` flushed pending payloads and the close frame.
    /// Resolves immediately if nothing was ever started.
    pub fn closed(&self) -> BoxFuture<'static, ()> {
        match self.shared.slot.lock().as_ref() {
            Some(slot) => slot.finished.clone().boxed(),
            None => future::ready(()).boxed(),
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        let _ = self.shared.command(Command::Close);
    }
}

enum Next {
    Retry,
    Stop,
}

/// Drives one connection chain: connect, serve, classify, back off, repeat.
struct Reactor {
    gate: Arc<dyn SessionGate>,
    bus: Arc<dyn EventBus>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    config: ClientConfig,
    session: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Dropped when the reactor ends, resolving [`RealtimeClient::closed`].
    _finished: oneshot::Sender<()>,
}

impl Reactor {
    async fn run(mut self) {
        loop {
            let closure = self.connect_and_serve().await;
            match self.conclude(&closure).await {
                Next::Retry => {}
                Next::Stop => break,
            }
        }
        debug!(session = self.session, "connection chain ended");
    }

    fn publish(&self, event: LifecycleEvent) {
        let channel = event.channel();
        debug!(session = self.session, channel, "publishing lifecycle event");
        self.bus.publish(channel, BusEvent::Lifecycle(event));
    }

    async fn connect_and_serve(&mut self) -> Closure {
        let token = self.gate.token();
        let url = match self.config.endpoint_url(token.as_deref()) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build endpoint url");
                return Closure::connect_failed(e.to_string());
            }
        };

        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            generation,
            url = %redacted(&url),
            attempt = self.shared.attempt.load(Ordering::SeqCst),
            "opening transport"
        );

        let transport = tokio::select! {
            result = self.connector.connect(&url) => match result {
                Ok(transport) => transport,
                Err(ConnectError::Rejected(status)) => {
                    warn!(generation, status, "handshake rejected");
                    return Closure::abnormal(false);
                }
                Err(ConnectError::Failed(reason)) => {
                    warn!(generation, error = %reason, "transport failed to open");
                    return Closure::connect_failed(reason);
                }
            },
            () = wait_for_close(&mut self.commands) => {
                debug!(generation, "close requested while connecting");
                return Closure::user_requested(false);
            }
        };

        self.shared.state.store(ConnectionState::Open);
        let previous = self.shared.attempt.swap(0, Ordering::SeqCst);
        let waiters = std::mem::take(&mut *self.shared.waiters.lock());
        info!(generation, previous_attempts = previous, "connection open");

        self.publish(if previous > 0 {
            LifecycleEvent::Reconnected
        } else {
            LifecycleEvent::Connected
        });
        resolve(waiters, StartOutcome::Opened);
        self.config.hooks.opened();

        let closure = self.serve(generation, transport).await;

        self.shared.state.store(ConnectionState::Closing);
        self.config.hooks.closed(&closure);
        closure
    }

    async fn serve(&mut self, generation: u64, transport: Transport) -> Closure {
        let Transport {
            mut sink,
            mut stream,
        } = transport;
        let mut heartbeat = self
            .config
            .heartbeat
            .enabled
            .then(|| HeartbeatMonitor::new(&self.config.heartbeat, Instant::now()));

        loop {
            let wakeup = heartbeat.as_ref().map(HeartbeatMonitor::next_wakeup);

            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.on_text(generation, &text, heartbeat.as_mut());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = close_parts(frame.as_ref());
                        debug!(generation, code, reason = %reason, "server closed connection");
                        return Closure::remote(code, reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(generation, error = %e, "transport error");
                        return Closure::abnormal(true);
                    }
                    None => {
                        debug!(generation, "transport stream ended");
                        return Closure::abnormal(true);
                    }
                },

                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        let pending = heartbeat.as_ref().and_then(HeartbeatMonitor::reply_deadline);
                        let deadline = write_deadline(self.config.heartbeat.reply_timeout(), pending);
                        if let Err(closure) = write(&mut sink, generation, Message::Text(text.into()), deadline).await {
                            return closure;
                        }
                    }
                    Some(Command::Close) | None => {
                        write_close(&mut sink, generation, CLOSE_NORMAL, USER_CLOSE_REASON).await;
                        return Closure::user_requested(true);
                    }
                },

                () = sleep_until(wakeup.unwrap_or_else(Instant::now)), if wakeup.is_some() => {
                    let Some(monitor) = heartbeat.as_mut() else {
                        continue;
                    };
                    match monitor.poll(Instant::now()) {
                        HeartbeatAction::Idle => {}
                        HeartbeatAction::Probe => {
                            trace!(generation, probes = monitor.probes_sent(), "sending liveness probe");
                            let deadline = write_deadline(
                                self.config.heartbeat.reply_timeout(),
                                monitor.reply_deadline(),
                            );
                            let probe = Message::Text(PROBE_PAYLOAD.into());
                            if let Err(closure) = write(&mut sink, generation, probe, deadline).await {
                                return closure;
                            }
                        }
                        HeartbeatAction::Expired => {
                            warn!(
                                generation,
                                timeout_ms = self.config.heartbeat.timeout,
                                "peer not responding, forcing close"
                            );
                            write_close(
                                &mut sink,
                                generation,
                                CLOSE_HEARTBEAT_TIMEOUT,
                                HEARTBEAT_TIMEOUT_REASON,
                            )
                            .await;
                            return Closure::heartbeat_timeout();
                        }
                    }
                }
            }
        }
    }

    fn on_text(&self, generation: u64, text: &str, heartbeat: Option<&mut HeartbeatMonitor>) {
        if is_liveness_reply(text) {
            if let Some(monitor) = heartbeat {
                monitor.reply_received();
            }
            trace!(generation, "liveness reply");
            return;
        }

        match InboundMessage::from_transport(text) {
            Ok(message) => {
                self.bus
                    .publish(&message.channel, BusEvent::Message(message.clone()));
                self.config.hooks.message(&message);
            }
            Err(e) => warn!(generation, error = %e, "discarding undecodable message"),
        }
    }

    /// Classify a closure and decide whether the chain continues.
    async fn conclude(&mut self, closure: &Closure) -> Next {
        let cause = classify(closure);
        info!(
            session = self.session,
            code = closure.code,
            reason = %closure.reason,
            %cause,
            "connection closed"
        );

        if closure.was_open {
            self.publish(LifecycleEvent::Disconnected { cause });
        }

        match cause {
            CloseCause::UserRequested => return self.finish(None, FailureReason::UserClosed),
            CloseCause::PolicyLocked => {
                let reason = LostReason::PolicyLocked;
                return self.finish(
                    Some(LifecycleEvent::ConnectionLost { reason }),
                    FailureReason::Lost(reason),
                );
            }
            CloseCause::Forbidden => {
                return self.finish(
                    Some(LifecycleEvent::ConnectionClosedDefinitively),
                    FailureReason::Forbidden,
                );
            }
            CloseCause::ServerShuttingDown => {
                return self.finish(Some(LifecycleEvent::ServerGone), FailureReason::ServerGone);
            }
            CloseCause::InvalidCredential => {
                if !self.gate.check_and_renew_if_needed(true).await {
                    warn!(session = self.session, "credential unusable, not reconnecting");
                    return self.finish(
                        Some(LifecycleEvent::UnusableCredential),
                        FailureReason::UnusableCredential,
                    );
                }
                debug!(session = self.session, "credential still usable");
            }
            CloseCause::AbnormalOrUnknown => {}
        }

        self.schedule(closure.code).await
    }

    fn finish(&self, event: Option<LifecycleEvent>, reason: FailureReason) -> Next {
        let waiters = self.shared.settle();
        if let Some(event) = event {
            self.publish(event);
        }
        resolve(waiters, StartOutcome::Failed(reason));
        Next::Stop
    }

    async fn schedule(&mut self, code: u16) -> Next {
        let reconnection = &self.config.reconnection;
        let attempt = self.shared.attempt.load(Ordering::SeqCst);

        if !reconnection.should_reconnect(attempt) {
            let reason = if reconnection.enabled {
                LostReason::AttemptsExhausted { attempts: attempt }
            } else {
                LostReason::ReconnectDisabled
            };
            warn!(session = self.session, attempts = attempt, "giving up on reconnection");
            return self.finish(
                Some(LifecycleEvent::ConnectionLost { reason }),
                FailureReason::Lost(reason),
            );
        }

        let attempt = attempt + 1;
        self.shared.attempt.store(attempt, Ordering::SeqCst);
        let delay = BackoffPolicy::from(reconnection).delay(code, rand::random::<f64>());
        let outcome = ReconnectOutcome::new(self.shared.register_waiter());
        self.shared.state.store(ConnectionState::Closed);

        info!(
            session = self.session,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnection"
        );
        self.publish(LifecycleEvent::Reconnecting {
            attempt,
            delay,
            outcome,
        });

        let timer = sleep(delay);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                () = &mut timer => break,
                command = self.commands.recv() => match command {
                    Some(Command::Send(_)) => debug!("dropping payload, connection not open"),
                    Some(Command::Close) => {
                        info!(session = self.session, "pending reconnection cancelled");
                        return self.finish(None, FailureReason::UserClosed);
                    }
                    None => {
                        debug!(session = self.session, "superseded by a newer start");
                        return Next::Stop;
                    }
                },
            }
        }

        if self.shared.claim_retry(self.session) {
            Next::Retry
        } else {
            debug!(session = self.session, "connection started elsewhere, dropping retry");
            Next::Stop
        }
    }
}

/// Latest instant a write may still be pending: the outstanding reply
/// deadline if one is armed, and never more than one reply timeout from now.
fn write_deadline(reply_timeout: Duration, pending: Option<Instant>) -> Instant {
    let bound = Instant::now() + reply_timeout;
    pending.map_or(bound, |deadline| deadline.min(bound))
}

/// Write one frame. A write still pending at `deadline` means the peer stopped
/// draining the socket and is treated like a missed liveness reply.
async fn write(
    sink: &mut TransportSink,
    generation: u64,
    message: Message,
    deadline: Instant,
) -> Result<(), Closure> {
    match timeout_at(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(generation, error = %e, "write failed");
            Err(Closure::abnormal(true))
        }
        Err(_) => {
            warn!(generation, "write stalled, peer not draining, forcing close");
            Err(Closure::heartbeat_timeout())
        }
    }
}

/// Best-effort close frame. The transport is dropped afterwards either way.
async fn write_close(sink: &mut TransportSink, generation: u64, code: u16, reason: &str) {
    match timeout(CLOSE_FRAME_TIMEOUT, sink.send(close_message(code, reason))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(generation, error = %e, "close frame not delivered"),
        Err(_) => debug!(generation, code, "close frame write timed out"),
    }
}

async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Send(_)) => debug!("dropping payload, connection not open"),
            Some(Command::Close) | None => return,
        }
    }
}
