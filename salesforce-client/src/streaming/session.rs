//! Streaming session lifecycle and the long-poll task.

use super::frame::{Frame, FrameKind, Message};
use super::registry::{MessageHandler, SubscriptionRegistry};
use super::topic::TopicTemplates;
use super::Error;
use crate::client::{self, Client};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Default capacity of the error notification channel.
pub const DEFAULT_ERROR_CAPACITY: usize = 16;

/// Default time `disconnect` waits for the poll task before aborting it.
pub const DEFAULT_DISCONNECT_GRACE_SECS: u64 = 5;

/// How a connect reply is handed to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Each matching message is delivered on its own.
    #[default]
    Message,
    /// The whole reply is delivered once to every handler whose channel
    /// appears in it.
    Batch,
}

/// Connection phase of a [`StreamingSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No client id; the initial and final phase.
    #[default]
    Disconnected,
    /// Waiting for the handshake reply.
    Handshaking,
    /// Holding a client id with the poll task running.
    Connected,
    /// A subscribe frame is in flight.
    Subscribing,
    /// An unsubscribe frame is in flight.
    Unsubscribing,
    /// `disconnect` is stopping the poll task.
    Disconnecting,
}

/// Streaming session settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// CometD version segment of the endpoint path.
    pub cometd_version: String,
    /// Topic mode to channel templates.
    pub topics: TopicTemplates,
    /// How connect replies are handed to handlers.
    pub dispatch_mode: DispatchMode,
    /// Upper bound for a single frame round trip, including a held connect.
    pub long_poll_timeout: Duration,
    /// Capacity of the error channel returned by [`StreamingSession::errors`].
    pub error_capacity: usize,
    /// How long `disconnect` waits for the poll task to observe the stop signal.
    pub disconnect_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cometd_version: crate::DEFAULT_COMETD_VERSION.to_string(),
            topics: TopicTemplates::default(),
            dispatch_mode: DispatchMode::default(),
            long_poll_timeout: Duration::from_secs(crate::DEFAULT_LONG_POLL_TIMEOUT_SECS),
            error_capacity: DEFAULT_ERROR_CAPACITY,
            disconnect_grace: Duration::from_secs(DEFAULT_DISCONNECT_GRACE_SECS),
        }
    }
}

/// Long-poll transport with its own cookie jar for load balancer affinity.
#[derive(Debug)]
struct Transport {
    http: reqwest::Client,
    client: Client,
    path: String,
}

impl Transport {
    fn new(client: &Client, config: &Config) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(client.user_agent.as_str())
            .connect_timeout(client.connect_timeout)
            .timeout(config.long_poll_timeout)
            .build()
            .map_err(|source| Error::HttpClientBuild { source })?;

        Ok(Transport {
            http,
            client: client.clone(),
            path: format!("/cometd/{}", config.cometd_version),
        })
    }

    /// Posts one frame. The token is read from the live session each time so
    /// a reauthentication on the REST side is picked up.
    async fn send(&self, frame: &Frame) -> Result<Vec<Message>, Error> {
        let session = self.client.session().map_err(Error::Session)?;
        if !session.is_valid() {
            return Err(Error::Session(client::Error::InvalidSession));
        }

        let endpoint = format!("{}{}", session.instance_url, self.path);
        tracing::trace!(frame = %frame.kind, %endpoint, "sending frame");

        let response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("OAuth {}", session.access_token))
            .json(frame)
            .send()
            .await
            .map_err(|source| Error::Transport {
                frame: frame.kind,
                source,
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|source| Error::Transport {
            frame: frame.kind,
            source,
        })?;
        tracing::trace!(frame = %frame.kind, %status, body = %String::from_utf8_lossy(&body), "frame reply");

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(frame = %frame.kind, "streaming endpoint rejected the access token");
            return Err(Error::Session(client::Error::InvalidSession));
        }
        if !status.is_success() {
            return Err(Error::Protocol {
                frame: frame.kind,
                message: format!("HTTP {status}: {}", String::from_utf8_lossy(&body)),
            });
        }

        serde_json::from_slice(&body).map_err(|source| Error::Decode {
            frame: frame.kind,
            source,
        })
    }
}

#[derive(Debug, Default)]
struct State {
    client_id: Option<String>,
    phase: Phase,
}

/// State shared between the session handle and the poll task.
#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    registry: SubscriptionRegistry,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn client_id(&self) -> Option<String> {
        self.lock().client_id.clone()
    }

    fn phase(&self) -> Phase {
        self.lock().phase
    }

    fn set_phase(&self, phase: Phase) {
        self.lock().phase = phase;
    }

    fn connected(&self, client_id: String) {
        let mut state = self.lock();
        state.client_id = Some(client_id);
        state.phase = Phase::Connected;
    }

    /// Leaves a transient phase unless the session moved on meanwhile.
    fn settle(&self) {
        let mut state = self.lock();
        if matches!(state.phase, Phase::Subscribing | Phase::Unsubscribing) {
            state.phase = Phase::Connected;
        }
    }

    /// Drops the client id after the poll loop failed; handlers stay registered.
    fn fail(&self) {
        let mut state = self.lock();
        state.client_id = None;
        state.phase = Phase::Disconnected;
    }

    fn reset(&self) {
        self.fail();
        self.registry.clear();
    }
}

fn rejected(frame: FrameKind, reply: &Message) -> Error {
    Error::Rejected {
        frame,
        error: reply
            .error
            .clone()
            .unwrap_or_else(|| "no error given".to_string()),
    }
}

/// Finds the meta reply for `frame` and fails if the server rejected it.
fn acknowledge(frame: FrameKind, replies: &[Message]) -> Result<Option<&Message>, Error> {
    match replies.iter().find(|m| m.channel == frame.channel()) {
        Some(reply) if reply.is_rejected() => Err(rejected(frame, reply)),
        reply => Ok(reply),
    }
}

async fn handshake(transport: &Transport) -> Result<String, Error> {
    let replies = transport.send(&Frame::handshake()).await?;
    let reply = replies.into_iter().next().ok_or_else(|| Error::Protocol {
        frame: FrameKind::Handshake,
        message: "empty handshake reply".to_string(),
    })?;

    if reply.is_rejected() {
        return Err(rejected(FrameKind::Handshake, &reply));
    }

    reply
        .client_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Protocol {
            frame: FrameKind::Handshake,
            message: "handshake reply carries no clientId".to_string(),
        })
}

/// Dispatches the events of a connect reply and returns the advised interval.
fn on_connect_reply(
    shared: &Shared,
    replies: &[Message],
    mode: DispatchMode,
) -> Result<Option<Duration>, Error> {
    let invoked = shared.registry.dispatch(replies, mode);
    tracing::trace!(messages = replies.len(), invoked, "connect reply dispatched");

    let Some(advice) = acknowledge(FrameKind::Connect, replies)?.and_then(|r| r.advice.as_ref())
    else {
        return Ok(None);
    };

    match advice.reconnect.as_deref() {
        Some(reconnect @ ("none" | "handshake")) => Err(Error::Protocol {
            frame: FrameKind::Connect,
            message: format!("server advised reconnect={reconnect}"),
        }),
        _ => Ok(advice.interval.map(Duration::from_millis)),
    }
}

async fn poll(
    transport: Arc<Transport>,
    shared: Arc<Shared>,
    mode: DispatchMode,
    mut interval: Duration,
    mut stop: watch::Receiver<bool>,
    errors: mpsc::Sender<Error>,
) {
    loop {
        if *stop.borrow() {
            break;
        }

        if !interval.is_zero() {
            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        let Some(client_id) = shared.client_id() else {
            break;
        };

        let frame = Frame::connect(&client_id);
        let result = tokio::select! {
            _ = stop.changed() => break,
            result = transport.send(&frame) => result,
        };

        match result.and_then(|replies| on_connect_reply(&shared, &replies, mode)) {
            Ok(Some(advised)) => interval = advised,
            Ok(None) => {}
            Err(err) => {
                tracing::error!(error = %err, "streaming poll loop failed");
                shared.fail();
                if errors.try_send(err).is_err() {
                    tracing::warn!("streaming error channel is full or closed");
                }
                break;
            }
        }
    }

    tracing::debug!("streaming poll loop stopped");
}

/// Claim on a client's single streaming slot, released on drop.
#[derive(Debug)]
struct Slot(Arc<AtomicBool>);

impl Slot {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Slot(flag.clone()))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A CometD session bound to an authenticated [`Client`].
///
/// Only one session can run per client (and its clones) at a time. Dropping
/// the session stops the poll task without sending a disconnect frame.
#[derive(Debug)]
pub struct StreamingSession {
    transport: Arc<Transport>,
    config: Config,
    shared: Arc<Shared>,
    stop: watch::Sender<bool>,
    poll_task: Option<JoinHandle<()>>,
    errors: Option<mpsc::Receiver<Error>>,
    slot: Option<Slot>,
}

impl StreamingSession {
    /// Handshakes, sends the first connect and spawns the poll task.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if a session is already running on `client`
    /// - [`Error::Session`] if `client` holds no valid session
    /// - [`Error::Protocol`] if the handshake reply carries no client id
    /// - [`Error::Rejected`] if the server refuses the handshake or connect
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn start(client: &Client, config: Config) -> Result<Self, Error> {
        let slot = Slot::acquire(&client.streaming_active).ok_or(Error::AlreadyStarted)?;

        let result = Self::open(client, config, slot).await;
        if let Err(err) = &result {
            tracing::error!(error = %err, "failed to start streaming session");
        }
        result
    }

    async fn open(client: &Client, config: Config, slot: Slot) -> Result<Self, Error> {
        let transport = Arc::new(Transport::new(client, &config)?);
        let shared = Arc::new(Shared::default());

        shared.set_phase(Phase::Handshaking);
        let client_id = handshake(&transport).await?;
        tracing::info!(%client_id, "streaming handshake complete");
        shared.connected(client_id.clone());

        let replies = transport.send(&Frame::connect(&client_id)).await?;
        let interval = on_connect_reply(&shared, &replies, config.dispatch_mode)?.unwrap_or_default();

        let (stop, stop_rx) = watch::channel(false);
        let (error_tx, error_rx) = mpsc::channel(config.error_capacity.max(1));
        let poll_task = tokio::spawn(poll(
            transport.clone(),
            shared.clone(),
            config.dispatch_mode,
            interval,
            stop_rx,
            error_tx,
        ));

        Ok(StreamingSession {
            transport,
            config,
            shared,
            stop,
            poll_task: Some(poll_task),
            errors: Some(error_rx),
            slot: Some(slot),
        })
    }

    /// Subscribes `handler` to `topic` under `mode` and returns the channel.
    ///
    /// The handler is registered before the frame is sent so events arriving
    /// with the acknowledgement are delivered. A handler already registered
    /// for the channel is replaced, and put back if the server refuses.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMode`] if `mode` has no template
    /// - [`Error::NotConnected`] if the session has no client id
    /// - [`Error::Rejected`] if the server refuses the subscription
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn subscribe<H>(&self, mode: &str, topic: &str, handler: H) -> Result<String, Error>
    where
        H: MessageHandler + 'static,
    {
        let channel = self.config.topics.resolve(mode, topic)?;
        let client_id = self.shared.client_id().ok_or(Error::NotConnected)?;

        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        let previous = self.shared.registry.replace(channel.clone(), handler.clone());

        self.shared.set_phase(Phase::Subscribing);
        let result = self
            .transport
            .send(&Frame::subscribe(&client_id, &channel))
            .await
            .and_then(|replies| acknowledge(FrameKind::Subscribe, &replies).map(|_| ()));
        self.shared.settle();

        if let Err(err) = result {
            tracing::error!(%channel, error = %err, "subscribe failed");
            self.shared.registry.restore(&channel, &handler, previous);
            return Err(err);
        }

        if previous.is_some() {
            tracing::debug!(%channel, "replaced existing handler");
        }
        tracing::info!(%channel, "subscribed");
        Ok(channel)
    }

    /// Unsubscribes from `topic` under `mode`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMode`] if `mode` has no template
    /// - [`Error::NotSubscribed`] if no handler is registered; nothing is sent
    /// - [`Error::Rejected`] if the server refuses the request
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn unsubscribe(&self, mode: &str, topic: &str) -> Result<(), Error> {
        let channel = self.config.topics.resolve(mode, topic)?;
        if !self.shared.registry.contains(&channel) {
            return Err(Error::NotSubscribed(channel));
        }
        let client_id = self.shared.client_id().ok_or(Error::NotConnected)?;

        self.shared.set_phase(Phase::Unsubscribing);
        let result = self
            .transport
            .send(&Frame::unsubscribe(&client_id, &channel))
            .await
            .and_then(|replies| acknowledge(FrameKind::Unsubscribe, &replies).map(|_| ()));
        self.shared.settle();

        if let Err(err) = result {
            tracing::error!(%channel, error = %err, "unsubscribe failed");
            return Err(err);
        }

        self.shared.registry.remove(&channel);
        tracing::info!(%channel, "unsubscribed");
        Ok(())
    }

    /// Stops the poll task, sends the disconnect frame and clears the client
    /// id and all handlers.
    ///
    /// Local state is cleared even when the disconnect frame fails; that
    /// failure is still returned.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        let client_id = self.shared.client_id();
        self.shared.set_phase(Phase::Disconnecting);
        self.stop_poll_task().await;

        let result = match client_id {
            Some(client_id) => self
                .transport
                .send(&Frame::disconnect(&client_id))
                .await
                .and_then(|replies| acknowledge(FrameKind::Disconnect, &replies).map(|_| ())),
            None => Ok(()),
        };

        self.shared.reset();
        self.release();

        match &result {
            Ok(()) => tracing::info!("streaming session disconnected"),
            Err(err) => tracing::warn!(error = %err, "disconnect frame failed"),
        }
        result
    }

    async fn stop_poll_task(&mut self) {
        self.stop.send_replace(true);
        if let Some(task) = self.poll_task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.config.disconnect_grace, task)
                .await
                .is_err()
            {
                tracing::warn!("poll task did not stop in time, aborting");
                abort.abort();
            }
        }
    }

    fn release(&mut self) {
        self.slot.take();
    }

    /// Takes the receiver for poll loop failures. Returns `None` after the
    /// first call.
    pub fn errors(&mut self) -> Option<mpsc::Receiver<Error>> {
        self.errors.take()
    }

    /// Server-assigned client id, `None` once disconnected or failed.
    pub fn client_id(&self) -> Option<String> {
        self.shared.client_id()
    }

    /// Current connection phase.
    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    /// Channels with a registered handler, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.registry.channels()
    }

    /// Returns true while the poll task is running.
    pub fn is_polling(&self) -> bool {
        self.poll_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.stop.send_replace(true);
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        self.release();
    }
}
