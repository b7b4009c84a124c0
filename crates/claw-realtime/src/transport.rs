//! Transport seam.
//!
//! The client only needs a sink and a stream of WebSocket messages.
//! [`Connector`] produces them; [`TungsteniteConnector`] does so over a real
//! socket, tests substitute in-memory channels.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

/// Outgoing half of a transport.
pub type TransportSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Incoming half of a transport.
pub type TransportStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// An open full-duplex transport.
pub struct Transport {
    /// Frames to the server.
    pub sink: TransportSink,
    /// Frames from the server.
    pub stream: TransportStream,
}

impl Transport {
    /// Assemble a transport from its halves.
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<Message, Error = tungstenite::Error> + Send + 'static,
        R: Stream<Item = Result<Message, tungstenite::Error>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Errors raised while opening a transport.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server answered the upgrade request with an HTTP error.
    #[error("handshake rejected with HTTP status {0}")]
    Rejected(u16),

    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Failed(String),
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `url`.
    async fn connect(&self, url: &Url) -> Result<Transport, ConnectError>;
}

/// Connector using `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Transport, ConnectError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response) => {
                    ConnectError::Rejected(response.status().as_u16())
                }
                other => ConnectError::Failed(other.to_string()),
            })?;

        let (write, read) = ws_stream.split();
        Ok(Transport::new(write, read))
    }
}

/// Build a close frame.
#[must_use]
pub fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    }))
}

/// Extract code and reason from a received close frame.
///
/// A close frame without a payload maps to 1005 (no status).
#[must_use]
pub fn close_parts(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
        None => (crate::close::CLOSE_NO_STATUS, String::new()),
    }
}

/// Redact the token from a URL for logging.
#[must_use]
pub fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
