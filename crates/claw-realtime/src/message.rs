//! Inbound application messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved payload sent as a liveness probe.
pub const PROBE_PAYLOAD: &str = "ping";

/// Reserved payload the server answers a probe with.
pub const REPLY_PAYLOAD: &str = "pong";

/// A decoded application message.
///
/// Only `channel` is interpreted; every other field is carried through
/// untouched in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel the message is published on.
    pub channel: String,
    /// Set once the message has been received over the WebSocket transport.
    #[serde(rename = "viaWebsocket", default)]
    pub via_websocket: bool,
    /// Remaining message fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl InboundMessage {
    /// Decode a text frame received from the transport and tag it as such.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with a string `channel`.
    pub fn from_transport(text: &str) -> Result<Self, serde_json::Error> {
        let mut message: Self = serde_json::from_str(text)?;
        message.via_websocket = true;
        Ok(message)
    }

    /// Look up a field other than `channel`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Whether a text frame is the liveness reply rather than an application message.
#[must_use]
pub fn is_liveness_reply(text: &str) -> bool {
    text == REPLY_PAYLOAD
}
