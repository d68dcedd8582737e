//! State aggregation.
//!
//! The [`StateAggregator`] subscribes to every monitored channel once, at
//! construction. Each inbound event is decoded, applied to the
//! [`EventStore`] and followed by a fresh [`Snapshot`]. Session and
//! connection changes, alert operations and a periodic re-evaluation tick
//! also produce a new snapshot.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, warn};

use crate::{
    channel::{ChannelEvent, ChannelRegistry, HandlerError, Subscription},
    config::FeedConfig,
    connection::ConnectionStatus,
    events::{Channel, FeedEvent},
    session::Session,
    snapshot::Snapshot,
    store::EventStore,
};

struct AggregatorInner {
    config: Arc<FeedConfig>,
    store: Mutex<EventStore>,
    sessions: watch::Receiver<Option<Session>>,
    connection: watch::Receiver<ConnectionStatus>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    version: AtomicU64,
}

impl AggregatorInner {
    fn handle_event(&self, channel: Channel, event: &ChannelEvent) -> Result<(), HandlerError> {
        let decoded = match FeedEvent::decode(channel, &event.payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(channel = %channel, error = %err, "Skipping undecodable payload");
                return Ok(());
            }
        };
        self.mutate(|store| {
            store.apply(decoded, event.received_at);
            true
        });
        Ok(())
    }

    /// Run `f` on the store and republish when it reports a change.
    fn mutate<R>(&self, f: impl FnOnce(&mut EventStore) -> R) -> R
    where
        R: Changed,
    {
        let mut store = self.store.lock();
        let result = f(&mut store);
        if result.changed() {
            self.publish(&store);
        }
        result
    }

    fn recompute(&self) {
        let store = self.store.lock();
        self.publish(&store);
    }

    /// Publish under the store lock so versions go out in order.
    fn publish(&self, store: &EventStore) {
        let session = self.sessions.borrow().clone();
        let connection = self.connection.borrow().clone();
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Snapshot::compute(
            version,
            Utc::now(),
            store,
            session.as_ref(),
            connection,
            &self.config,
        );
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }
}

/// Whether a store operation changed anything.
trait Changed {
    fn changed(&self) -> bool;
}

impl Changed for bool {
    fn changed(&self) -> bool {
        *self
    }
}

impl Changed for usize {
    fn changed(&self) -> bool {
        *self > 0
    }
}

impl Changed for () {
    fn changed(&self) -> bool {
        true
    }
}

/// Combines session, connection and event state into [`Snapshot`]s.
pub struct StateAggregator {
    inner: Arc<AggregatorInner>,
    subscriptions: Mutex<Vec<Subscription>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl StateAggregator {
    /// Create the aggregator and register its handlers on `registry`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: Arc<FeedConfig>,
        registry: &ChannelRegistry,
        sessions: watch::Receiver<Option<Session>>,
        connection: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::empty()));
        let inner = Arc::new(AggregatorInner {
            store: Mutex::new(EventStore::new(&config)),
            config,
            sessions,
            connection,
            snapshot_tx,
            version: AtomicU64::new(0),
        });

        let subscriptions = Channel::ALL
            .into_iter()
            .map(|channel| {
                let weak = Arc::downgrade(&inner);
                registry.subscribe(
                    channel.as_str(),
                    move |event: &ChannelEvent| -> Result<(), HandlerError> {
                        match weak.upgrade() {
                            Some(inner) => inner.handle_event(channel, event),
                            None => Ok(()),
                        }
                    },
                )
            })
            .collect();

        inner.recompute();
        let watcher = tokio::spawn(watch_changes(Arc::downgrade(&inner)));

        Self {
            inner,
            subscriptions: Mutex::new(subscriptions),
            watcher: Mutex::new(Some(watcher)),
        }
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.snapshot_tx.borrow())
    }

    /// Change feed of snapshots.
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Recompute the snapshot now.
    pub fn refresh(&self) {
        self.inner.recompute();
    }

    /// Mark the alert `id` as read. Returns `true` if it changed.
    pub fn mark_as_read(&self, id: &str) -> bool {
        self.inner.mutate(|store| store.mark_as_read(id))
    }

    /// Mark all alerts as read. Returns how many changed.
    pub fn mark_all_read(&self) -> usize {
        self.inner.mutate(EventStore::mark_all_read)
    }

    /// Remove the alert `id`. Returns `true` if it was present.
    pub fn dismiss(&self, id: &str) -> bool {
        self.inner.mutate(|store| store.dismiss(id))
    }

    /// Remove all alerts.
    pub fn clear_alerts(&self) {
        self.inner.mutate(EventStore::clear_alerts);
    }

    /// Drop all retained event state.
    pub fn reset(&self) {
        self.inner.mutate(EventStore::reset);
        debug!("Aggregated state reset");
    }

    /// Unregister the handlers and stop watching for changes. Idempotent.
    pub fn shutdown(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.watcher.lock().is_none()
    }
}

impl Drop for StateAggregator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Republish on session or connection changes and on every tick. The
/// retained events are dropped when the session ends.
async fn watch_changes(weak: Weak<AggregatorInner>) {
    let (mut sessions, mut connection, period) = match weak.upgrade() {
        Some(inner) => (
            inner.sessions.clone(),
            inner.connection.clone(),
            inner.config.reevaluation_interval,
        ),
        None => return,
    };
    let mut tick = interval(period.max(Duration::from_millis(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;
    let mut had_session = sessions.borrow_and_update().is_some();

    loop {
        let mut session_ended = false;
        tokio::select! {
            changed = sessions.changed() => {
                if changed.is_err() {
                    break;
                }
                let has_session = sessions.borrow_and_update().is_some();
                session_ended = had_session && !has_session;
                had_session = has_session;
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tick.tick() => {}
        }
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if session_ended {
            // Whatever ended the session, its events do not outlive it.
            inner.mutate(EventStore::reset);
            debug!("Session ended; aggregated state reset");
        } else {
            inner.recompute();
        }
    }
    debug!("Aggregator watcher stopped");
}
