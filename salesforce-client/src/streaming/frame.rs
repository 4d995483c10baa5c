//! Bayeux frames sent to and received from the CometD endpoint.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// The only connection type the client negotiates.
pub const LONG_POLLING: &str = "long-polling";

/// Bayeux protocol version announced in the handshake.
pub const BAYEUX_VERSION: &str = "1.0";

/// Meta channel a frame is sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Opens a session and obtains a client id.
    Handshake,
    /// The long poll carrying event delivery.
    Connect,
    /// Registers interest in a channel.
    Subscribe,
    /// Drops interest in a channel.
    Unsubscribe,
    /// Ends the session on the server.
    Disconnect,
}

impl FrameKind {
    /// Wire channel, e.g. `/meta/handshake`.
    pub fn channel(&self) -> &'static str {
        match self {
            FrameKind::Handshake => "/meta/handshake",
            FrameKind::Connect => "/meta/connect",
            FrameKind::Subscribe => "/meta/subscribe",
            FrameKind::Unsubscribe => "/meta/unsubscribe",
            FrameKind::Disconnect => "/meta/disconnect",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.channel())
    }
}

impl Serialize for FrameKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.channel())
    }
}

/// An outbound meta frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Serialized as the `channel` member.
    #[serde(rename = "channel")]
    pub kind: FrameKind,
    /// Server-assigned id; absent only on the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Transport used by connect and disconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<&'static str>,
    /// Transports offered in the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<&'static str>>,
    /// Bayeux version offered in the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'static str>,
    /// Target channel of a subscribe or unsubscribe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
}

impl Frame {
    fn bare(kind: FrameKind) -> Self {
        Frame {
            kind,
            client_id: None,
            connection_type: None,
            supported_connection_types: None,
            version: None,
            subscription: None,
        }
    }

    /// Handshake offering long polling.
    pub fn handshake() -> Self {
        Frame {
            supported_connection_types: Some(vec![LONG_POLLING]),
            version: Some(BAYEUX_VERSION),
            ..Frame::bare(FrameKind::Handshake)
        }
    }

    /// Long-poll connect for `client_id`.
    pub fn connect(client_id: &str) -> Self {
        Frame {
            client_id: Some(client_id.to_string()),
            connection_type: Some(LONG_POLLING),
            ..Frame::bare(FrameKind::Connect)
        }
    }

    /// Subscribe `client_id` to `channel`.
    pub fn subscribe(client_id: &str, channel: &str) -> Self {
        Frame {
            client_id: Some(client_id.to_string()),
            subscription: Some(channel.to_string()),
            ..Frame::bare(FrameKind::Subscribe)
        }
    }

    /// Unsubscribe `client_id` from `channel`.
    pub fn unsubscribe(client_id: &str, channel: &str) -> Self {
        Frame {
            client_id: Some(client_id.to_string()),
            subscription: Some(channel.to_string()),
            ..Frame::bare(FrameKind::Unsubscribe)
        }
    }

    /// Disconnect for `client_id`.
    pub fn disconnect(client_id: &str) -> Self {
        Frame {
            client_id: Some(client_id.to_string()),
            connection_type: Some(LONG_POLLING),
            ..Frame::bare(FrameKind::Disconnect)
        }
    }
}

/// Reconnect advice attached to meta replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    /// `retry`, `handshake` or `none`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<String>,
    /// Milliseconds to wait before the next connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Milliseconds the server holds a connect open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// An inbound message, either a meta reply or an event on a subscribed
/// channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
    /// Channel the message arrived on.
    pub channel: String,
    /// Set on handshake replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Outcome of a meta request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    /// Channel a subscribe or unsubscribe reply refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    /// Server error string, e.g. `403::Handshake denied`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Reconnect advice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    /// Event payload for non-meta channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Everything else the server sent (`id`, `ext`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Returns true for replies on `/meta/*` channels.
    pub fn is_meta(&self) -> bool {
        self.channel.starts_with("/meta/")
    }

    /// Returns true if the server explicitly reported failure.
    pub fn is_rejected(&self) -> bool {
        self.successful == Some(false)
    }
}
