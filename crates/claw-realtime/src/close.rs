//! Close codes and closure classification.
//!
//! Every transport closure, whether local, remote, or a failed handshake, is
//! reduced to a [`Closure`] and classified exactly once into a
//! [`CloseCause`]. The cause alone decides whether the reconnection
//! scheduler runs.

use std::fmt;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The peer is going away (server restart, page navigation).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// No status code was present in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// The connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Policy violation. The server uses it when an identity holds too many connections.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Unexpected server condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// The server is restarting.
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
/// Sent locally when the peer stopped answering liveness probes.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;
/// The server definitively refuses this client.
pub const CLOSE_FORBIDDEN: u16 = 4003;

/// Reason attached to a heartbeat-forced close.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "peer not responding";

/// Reason attached to a user-requested close.
pub const USER_CLOSE_REASON: &str = "client closed";

/// Codes that typically hit many clients at once and therefore get jittered delays.
#[must_use]
pub const fn is_jitter_eligible(code: u16) -> bool {
    matches!(code, CLOSE_ABNORMAL | CLOSE_GOING_AWAY)
}

/// Which side ended the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    /// `close()` was called.
    User,
    /// The heartbeat monitor gave up on the peer.
    Heartbeat,
    /// The server, the network, or a failed handshake.
    Remote,
}

/// A single closure event as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    /// Close code.
    pub code: u16,
    /// Close reason, possibly empty.
    pub reason: String,
    /// Who ended the connection.
    pub initiator: Initiator,
    /// Whether the transport reached the open state before closing.
    pub was_open: bool,
}

impl Closure {
    /// Closure requested through `close()`.
    #[must_use]
    pub fn user_requested(was_open: bool) -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: USER_CLOSE_REASON.to_string(),
            initiator: Initiator::User,
            was_open,
        }
    }

    /// Closure forced by the heartbeat monitor.
    #[must_use]
    pub fn heartbeat_timeout() -> Self {
        Self {
            code: CLOSE_HEARTBEAT_TIMEOUT,
            reason: HEARTBEAT_TIMEOUT_REASON.to_string(),
            initiator: Initiator::Heartbeat,
            was_open: true,
        }
    }

    /// Close frame received from the server.
    #[must_use]
    pub fn remote(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            initiator: Initiator::Remote,
            was_open: true,
        }
    }

    /// A transport that could not be opened at all (refused, unreachable, TLS failure).
    #[must_use]
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
            initiator: Initiator::Remote,
            was_open: false,
        }
    }

    /// Connection lost without a close frame, or a handshake the server rejected.
    ///
    /// The reason is left empty: an unexplained abnormal closure is the
    /// signal that the credential may be the problem.
    #[must_use]
    pub fn abnormal(was_open: bool) -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: String::new(),
            initiator: Initiator::Remote,
            was_open,
        }
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {} ({})", self.code, self.reason)
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCause {
    /// `close()` was called.
    UserRequested,
    /// Too many concurrent connections for this identity.
    PolicyLocked,
    /// The server definitively rejected the client.
    Forbidden,
    /// Abnormal closure with no reason: the credential must be checked.
    InvalidCredential,
    /// The server is shutting down or restarting.
    ServerShuttingDown,
    /// Anything else. Always retried.
    AbnormalOrUnknown,
}

impl CloseCause {
    /// Whether this cause leads to the reconnection scheduler.
    ///
    /// `InvalidCredential` is conditional on renewal and reports `false` here.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::AbnormalOrUnknown)
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UserRequested => "user requested",
            Self::PolicyLocked => "policy locked",
            Self::Forbidden => "forbidden",
            Self::InvalidCredential => "invalid credential",
            Self::ServerShuttingDown => "server shutting down",
            Self::AbnormalOrUnknown => "abnormal or unknown",
        };
        f.write_str(s)
    }
}

/// Classify a closure. Rows are evaluated in order and the first match wins.
#[must_use]
pub fn classify(closure: &Closure) -> CloseCause {
    if closure.initiator == Initiator::User {
        return CloseCause::UserRequested;
    }
    if closure.initiator == Initiator::Heartbeat {
        return CloseCause::AbnormalOrUnknown;
    }
    match closure.code {
        CLOSE_POLICY_VIOLATION => CloseCause::PolicyLocked,
        CLOSE_FORBIDDEN => CloseCause::Forbidden,
        CLOSE_ABNORMAL | CLOSE_NO_STATUS if closure.reason.is_empty() => {
            CloseCause::InvalidCredential
        }
        CLOSE_SERVICE_RESTART => CloseCause::ServerShuttingDown,
        _ => CloseCause::AbnormalOrUnknown,
    }
}
