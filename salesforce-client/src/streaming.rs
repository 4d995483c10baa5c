//! Salesforce Streaming API over CometD long polling.
//!
//! A [`StreamingSession`] handshakes with `<instance>/cometd/<version>`,
//! runs one background task that keeps a `/meta/connect` long poll open and
//! routes incoming events to the handlers registered with
//! [`StreamingSession::subscribe`].
//!
//! Failures inside the poll task stop the loop and are delivered on the
//! channel returned by [`StreamingSession::errors`].
//!
//! # Example
//!
//! ```no_run
//! use salesforce_client::client;
//! use salesforce_client::streaming::{topic, Config, Message, StreamingSession};
//! use std::path::PathBuf;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = client::Builder::new()
//!     .credentials_path(PathBuf::from("credentials.json"))
//!     .build()?
//!     .connect()
//!     .await?;
//!
//! let mut session = StreamingSession::start(&client, Config::default()).await?;
//! session
//!     .subscribe(topic::PUSH_TOPIC, "AccountUpdates", |messages: &[Message]| {
//!         for message in messages {
//!             println!("{}: {:?}", message.channel, message.data);
//!         }
//!     })
//!     .await?;
//!
//! if let Some(mut errors) = session.errors() {
//!     if let Some(err) = errors.recv().await {
//!         eprintln!("streaming stopped: {err}");
//!     }
//! }
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use crate::client;

pub mod frame;
pub mod registry;
pub mod session;
pub mod topic;

pub use frame::{Advice, Frame, FrameKind, Message};
pub use registry::{MessageHandler, SubscriptionRegistry};
pub use session::{Config, DispatchMode, Phase, StreamingSession};
pub use topic::TopicTemplates;

/// Errors that can occur during streaming operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The long-poll transport could not be created.
    #[error("Failed to build streaming transport: {source}")]
    HttpClientBuild {
        #[source]
        source: reqwest::Error,
    },
    /// The frame could not be sent or its reply not read.
    #[error("Transport error on {frame}: {source}")]
    Transport {
        frame: FrameKind,
        #[source]
        source: reqwest::Error,
    },
    /// The reply is not an array of messages.
    #[error("Failed to decode {frame} reply: {source}")]
    Decode {
        frame: FrameKind,
        #[source]
        source: serde_json::Error,
    },
    /// The reply is well formed but unusable.
    #[error("Protocol error on {frame}: {message}")]
    Protocol { frame: FrameKind, message: String },
    /// The server answered the frame with `successful: false`.
    #[error("{frame} rejected by server: {error}")]
    Rejected { frame: FrameKind, error: String },
    /// No channel template exists for the topic mode.
    #[error("Invalid topic mode: {0}")]
    InvalidMode(String),
    /// No handler is registered for the channel.
    #[error("Not subscribed to {0}")]
    NotSubscribed(String),
    /// The session has no client id.
    #[error("Streaming session is not connected")]
    NotConnected,
    /// A streaming session is already running on this client.
    #[error("Streaming session already started for this client")]
    AlreadyStarted,
    /// The REST session backing the stream is unusable.
    #[error("Session error: {0}")]
    Session(#[source] client::Error),
}
