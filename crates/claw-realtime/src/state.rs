//! Connection state types.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of the single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// `start` has never been called.
    Idle = 0,
    /// A transport handshake is in flight.
    Connecting = 1,
    /// The transport is open and heartbeats are running.
    Open = 2,
    /// The transport ended and its closure is being classified.
    Closing = 3,
    /// No transport exists. A reconnection may be pending.
    Closed = 4,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Whether a new connection may be started from this state.
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }
}

/// Atomic wrapper for connection state.
///
/// Every decision point that would open a transport goes through
/// [`AtomicConnectionState::begin_connecting`], so two concurrent callers
/// can never both observe a startable state.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Store a new state.
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Atomically move from `current` to `new`.
    ///
    /// Returns the observed state on failure.
    pub fn transition(
        &self,
        current: ConnectionState,
        new: ConnectionState,
    ) -> Result<(), ConnectionState> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }

    /// Claim the right to open a transport.
    ///
    /// Succeeds only from `Idle` or `Closed`, leaving the state `Connecting`.
    pub fn begin_connecting(&self) -> Result<(), ConnectionState> {
        let mut observed = self.load();
        loop {
            if !observed.can_start() {
                return Err(observed);
            }
            match self.transition(observed, ConnectionState::Connecting) {
                Ok(()) => return Ok(()),
                Err(actual) => observed = actual,
            }
        }
    }
}
