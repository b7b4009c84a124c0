//! Lifecycle events and the publish-subscribe bus they are delivered on.

use std::fmt;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::trace;

use crate::close::CloseCause;
use crate::message::InboundMessage;

/// Channel names lifecycle events are published on.
pub mod channels {
    /// A first connection opened.
    pub const CONNECTED: &str = "Connected";
    /// A connection opened after at least one failed attempt.
    pub const RECONNECTED: &str = "Reconnected";
    /// An open connection closed.
    pub const DISCONNECTED: &str = "Disconnected";
    /// A reconnection attempt was scheduled.
    pub const RECONNECTING: &str = "Reconnecting";
    /// Reconnection stopped for good.
    pub const CONNECTION_LOST: &str = "ConnectionLost";
    /// The server definitively refused the client.
    pub const CONNECTION_CLOSED_DEFINITIVELY: &str = "ConnectionClosedDefinitively";
    /// The server is shutting down.
    pub const SERVER_GONE: &str = "ServerGone";
    /// The credential cannot be renewed; the application must log out.
    pub const UNUSABLE_CREDENTIAL: &str = "UnusableCredential";
}

/// Why the reconnection chain gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LostReason {
    /// The server locked this identity for holding too many connections.
    PolicyLocked,
    /// `maxAttempts` reconnections failed since the last open.
    AttemptsExhausted {
        /// Number of reconnection attempts made.
        attempts: u32,
    },
    /// Reconnection is disabled in the configuration.
    ReconnectDisabled,
}

/// Terminal outcome of a connection chain that never (re)opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// `close()` was called first.
    UserClosed,
    /// Reconnection stopped.
    Lost(LostReason),
    /// The server definitively refused the client.
    Forbidden,
    /// The credential could not be renewed.
    UnusableCredential,
    /// The server is shutting down.
    ServerGone,
}

/// Resolution of a `start` call or of an in-flight reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The connection opened.
    Opened,
    /// A connection was already connecting, open, or closing; nothing was started.
    AlreadyActive,
    /// The chain ended without opening.
    Failed(FailureReason),
}

impl StartOutcome {
    /// Whether the connection opened.
    #[must_use]
    pub const fn is_opened(self) -> bool {
        matches!(self, Self::Opened)
    }
}

/// Future returned by `start`.
pub type StartFuture = BoxFuture<'static, StartOutcome>;

/// Awaitable outcome of a scheduled reconnection. Cheap to clone.
#[derive(Clone)]
pub struct ReconnectOutcome(Shared<StartFuture>);

impl ReconnectOutcome {
    pub(crate) fn new(future: StartFuture) -> Self {
        Self(future.shared())
    }

    /// Wait until the reconnection opens or the chain gives up.
    pub async fn wait(self) -> StartOutcome {
        self.0.await
    }

    /// Outcome if already resolved.
    #[must_use]
    pub fn peek(&self) -> Option<StartOutcome> {
        self.0.peek().copied()
    }
}

impl fmt::Debug for ReconnectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReconnectOutcome").field(&self.peek()).finish()
    }
}

/// Lifecycle events published by the client.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// First successful open.
    Connected,
    /// Successful open after failed attempts.
    Reconnected,
    /// An open connection closed.
    Disconnected {
        /// Classified cause.
        cause: CloseCause,
    },
    /// A reconnection attempt is scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
        /// Resolves when the reconnection opens or the chain gives up.
        outcome: ReconnectOutcome,
    },
    /// Reconnection stopped for good.
    ConnectionLost {
        /// Why reconnection stopped.
        reason: LostReason,
    },
    /// The server definitively refused the client.
    ConnectionClosedDefinitively,
    /// The server is shutting down.
    ServerGone,
    /// The credential is unusable; the application must force a logout.
    UnusableCredential,
}

impl LifecycleEvent {
    /// Channel this event is published on.
    #[must_use]
    pub const fn channel(&self) -> &'static str {
        match self {
            Self::Connected => channels::CONNECTED,
            Self::Reconnected => channels::RECONNECTED,
            Self::Disconnected { .. } => channels::DISCONNECTED,
            Self::Reconnecting { .. } => channels::RECONNECTING,
            Self::ConnectionLost { .. } => channels::CONNECTION_LOST,
            Self::ConnectionClosedDefinitively => channels::CONNECTION_CLOSED_DEFINITIVELY,
            Self::ServerGone => channels::SERVER_GONE,
            Self::UnusableCredential => channels::UNUSABLE_CREDENTIAL,
        }
    }

    /// Whether no further events follow without a new `start`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. }
                | Self::ConnectionClosedDefinitively
                | Self::ServerGone
                | Self::UnusableCredential
        )
    }
}

/// Anything published on the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Connection lifecycle change.
    Lifecycle(LifecycleEvent),
    /// Application message, published on its own channel.
    Message(InboundMessage),
}

/// Publish-subscribe bus the client reports to.
pub trait EventBus: Send + Sync {
    /// Publish `event` on `channel`. Must not block.
    fn publish(&self, channel: &str, event: BusEvent);
}

/// An event together with the channel it was published on.
#[derive(Debug, Clone)]
pub struct Published {
    /// Channel name.
    pub channel: String,
    /// The event.
    pub event: BusEvent,
}

/// [`EventBus`] backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<Published>,
}

impl BroadcastBus {
    /// Create a bus retaining up to `capacity` events per lagging subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to every channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, channel: &str, event: BusEvent) {
        let published = Published {
            channel: channel.to_string(),
            event,
        };
        if self.tx.send(published).is_err() {
            trace!(channel, "no subscribers for event");
        }
    }
}
