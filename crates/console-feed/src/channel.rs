//! Channel subscription registry.
//!
//! Handlers register per channel name and are invoked in registration order.
//! Dispatch copies the handler list before invoking anything, so handlers may
//! subscribe or unsubscribe (on any channel) while being dispatched to; those
//! changes apply from the next event on.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Name of an event channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChannelName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A raw inbound event, as delivered to handlers.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelEvent {
    pub channel: ChannelName,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl ChannelEvent {
    /// Event stamped with the current time.
    pub fn new(channel: impl Into<ChannelName>, payload: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Error returned by a handler. Logged by the registry; never propagated to
/// other handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {message}")]
    Failed { message: String },

    #[error("Handler error: {0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn custom<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Custom(Box::new(error))
    }
}

/// Receives events for a channel.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ChannelEvent) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&ChannelEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &ChannelEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

struct HandlerEntry {
    id: u64,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct RegistryInner {
    channels: Mutex<HashMap<ChannelName, Vec<HandlerEntry>>>,
    next_id: AtomicU64,
    generation: AtomicU64,
}

impl RegistryInner {
    /// The removed entry is dropped after the lock is released, since a
    /// handler may own subscriptions of its own.
    fn remove(&self, channel: &ChannelName, id: u64) -> bool {
        let removed = {
            let mut channels = self.channels.lock();
            let Some(entries) = channels.get_mut(channel) else {
                return false;
            };
            let removed = entries
                .iter()
                .position(|entry| entry.id == id)
                .map(|pos| entries.remove(pos));
            if entries.is_empty() {
                channels.remove(channel);
            }
            removed
        };
        match removed {
            Some(_entry) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// Outcome of dispatching one event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
    /// Registry generation the handler list was copied at.
    pub generation: u64,
}

/// Per-channel handler registry.
///
/// Cheap to clone; clones share the same registrations.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` on `channel`.
    ///
    /// The returned [`Subscription`] removes exactly this handler when
    /// [`unsubscribe`](Subscription::unsubscribe)d or dropped.
    #[must_use = "dropping the subscription unsubscribes the handler"]
    pub fn subscribe<H>(&self, channel: impl Into<ChannelName>, handler: H) -> Subscription
    where
        H: EventHandler + 'static,
    {
        let channel = channel.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .channels
            .lock()
            .entry(channel.clone())
            .or_default()
            .push(HandlerEntry {
                id,
                handler: Arc::new(handler),
            });
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        debug!(channel = %channel, id, "Handler subscribed");

        Subscription {
            registry: Arc::downgrade(&self.inner),
            channel,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Deliver `event` to every handler registered on its channel at the
    /// moment of the call.
    pub fn dispatch(&self, event: &ChannelEvent) -> DispatchReport {
        let (handlers, generation) = {
            let channels = self.inner.channels.lock();
            let handlers: Vec<Arc<dyn EventHandler>> = channels
                .get(&event.channel)
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
                .unwrap_or_default();
            (handlers, self.inner.generation.load(Ordering::SeqCst))
        };

        let mut report = DispatchReport {
            generation,
            ..DispatchReport::default()
        };

        if handlers.is_empty() {
            debug!(channel = %event.channel, "No subscribers for channel");
            return report;
        }

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    warn!(channel = %event.channel, error = %err, "Handler failed");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(channel = %event.channel, "Handler panicked");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Number of handlers on `channel`.
    pub fn subscriber_count(&self, channel: &ChannelName) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Channels that currently have at least one handler.
    pub fn channels(&self) -> Vec<ChannelName> {
        let mut names: Vec<ChannelName> = self.inner.channels.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Registration generation; bumped on every subscribe/unsubscribe.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Total number of channels with handlers.
    pub fn len(&self) -> usize {
        self.inner.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.channels.lock().is_empty()
    }
}

/// Capability that removes one handler registration.
pub struct Subscription {
    registry: Weak<RegistryInner>,
    channel: ChannelName,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the handler. Subsequent calls are no-ops.
    ///
    /// Returns `true` only for the call that removed the handler.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.remove(&self.channel, self.id);
        if removed {
            debug!(channel = %self.channel, id = self.id, "Handler unsubscribed");
        }
        removed
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
