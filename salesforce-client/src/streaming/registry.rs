//! Channel to handler registry shared by callers and the poll task.

use super::frame::Message;
use super::session::DispatchMode;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Receives messages delivered on a subscribed channel.
///
/// With [`DispatchMode::Message`] each call carries exactly one message;
/// with [`DispatchMode::Batch`] it carries the whole decoded connect reply.
/// Handlers run on the poll task and should return quickly.
pub trait MessageHandler: Send + Sync {
    /// Called on the poll task with the messages routed to this handler.
    fn handle(&self, messages: &[Message]);
}

impl<F> MessageHandler for F
where
    F: Fn(&[Message]) + Send + Sync,
{
    fn handle(&self, messages: &[Message]) {
        self(messages)
    }
}

/// At most one handler per channel; inserting again replaces it.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    handlers: Arc<Mutex<HashMap<String, Arc<dyn MessageHandler>>>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn MessageHandler>>> {
        // Handlers never run under the lock, so a poisoned map is still consistent.
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `handler` for `channel`. Returns true if one was replaced.
    pub fn insert(&self, channel: impl Into<String>, handler: Arc<dyn MessageHandler>) -> bool {
        self.replace(channel, handler).is_some()
    }

    /// Registers `handler` for `channel` and returns the handler it replaced.
    pub fn replace(
        &self,
        channel: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        self.lock().insert(channel.into(), handler)
    }

    /// Undoes a [`replace`](Self::replace) of `current` with `previous`.
    ///
    /// Does nothing if the channel has been re-registered since.
    pub fn restore(
        &self,
        channel: &str,
        current: &Arc<dyn MessageHandler>,
        previous: Option<Arc<dyn MessageHandler>>,
    ) {
        let mut handlers = self.lock();
        if !handlers.get(channel).is_some_and(|h| Arc::ptr_eq(h, current)) {
            return;
        }
        match previous {
            Some(previous) => {
                handlers.insert(channel.to_string(), previous);
            }
            None => {
                handlers.remove(channel);
            }
        }
    }

    /// Removes the handler for `channel`. Returns true if one was present.
    pub fn remove(&self, channel: &str) -> bool {
        self.lock().remove(channel).is_some()
    }

    /// Returns true if `channel` has a handler.
    pub fn contains(&self, channel: &str) -> bool {
        self.lock().contains_key(channel)
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered channels, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.lock().keys().cloned().collect();
        channels.sort_unstable();
        channels
    }

    /// Removes every handler.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn handler(&self, channel: &str) -> Option<Arc<dyn MessageHandler>> {
        self.lock().get(channel).cloned()
    }

    /// Routes `messages` to the handlers of their channels.
    ///
    /// Returns the number of handler invocations.
    pub fn dispatch(&self, messages: &[Message], mode: DispatchMode) -> usize {
        let mut invoked = 0;
        match mode {
            DispatchMode::Message => {
                for message in messages {
                    if let Some(handler) = self.handler(&message.channel) {
                        handler.handle(std::slice::from_ref(message));
                        invoked += 1;
                    }
                }
            }
            DispatchMode::Batch => {
                let mut seen: Vec<&str> = Vec::new();
                for message in messages {
                    let channel = message.channel.as_str();
                    if seen.contains(&channel) {
                        continue;
                    }
                    seen.push(channel);
                    if let Some(handler) = self.handler(channel) {
                        handler.handle(messages);
                        invoked += 1;
                    }
                }
            }
        }
        invoked
    }
}
