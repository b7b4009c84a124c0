//! claw-realtime - Resilient realtime WebSocket client
//!
//! Maintains one logical connection to a realtime endpoint on behalf of an
//! application:
//!
//! - Detects half-open connections with application-level liveness probes
//! - Classifies every closure and decides whether to reconnect
//! - Reconnects with jittered delays so a server restart is not followed by
//!   a thundering herd
//! - Publishes lifecycle events and inbound messages on an [`EventBus`]
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use claw_realtime::{BroadcastBus, ClientConfig, RealtimeClient, StaticTokenGate};
//!
//! # async fn run() -> Result<(), claw_realtime::RealtimeError> {
//! let bus = Arc::new(BroadcastBus::default());
//! let mut events = bus.subscribe();
//! let gate = Arc::new(StaticTokenGate::new(Some("token".to_string())));
//!
//! let client = RealtimeClient::new(gate, bus);
//! let outcome = client
//!     .start(ClientConfig::default().with_origin("https://app.example.com"))?
//!     .await;
//!
//! if outcome.is_opened() {
//!     client.send_text(r#"{"channel":"chat","body":"hello"}"#)?;
//! }
//! # let _ = events.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod close;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod hooks;
pub mod message;
pub mod session;
pub mod state;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use client::RealtimeClient;
pub use close::{CloseCause, Closure, Initiator, classify};
pub use config::{ClientConfig, HeartbeatConfig, ReconnectConfig};
pub use error::{RealtimeError, RealtimeResult};
pub use events::{
    BroadcastBus, BusEvent, EventBus, FailureReason, LifecycleEvent, LostReason, Published,
    ReconnectOutcome, StartFuture, StartOutcome,
};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use hooks::{HookError, HookResult, Hooks};
pub use message::InboundMessage;
pub use session::{SessionGate, StaticTokenGate};
pub use state::ConnectionState;
pub use transport::{ConnectError, Connector, Transport, TungsteniteConnector};
