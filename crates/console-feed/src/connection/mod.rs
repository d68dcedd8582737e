//! Connection to the event source and its reconnect state machine.
//!
//! A single driver task per [`ConnectionManager`] owns the transport: it
//! performs the handshake, dispatches inbound frames to the
//! [`ChannelRegistry`](crate::channel::ChannelRegistry) and, on failure,
//! waits out the backoff before trying again.

mod transport;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    sync::{Notify, watch},
    task::AbortHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

pub use transport::{
    DEFAULT_ROOM, EventTransport, FrameStream, InboundFrame, WsTransport, room_for,
};

use crate::{
    channel::{ChannelEvent, ChannelRegistry},
    config::FeedConfig,
    error::{AuthError, FeedError, FeedResult},
    reconnect::calculate_backoff,
    session::Session,
};

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected; initial state and the state after `disconnect`.
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Joined the role-scoped room.
    Connected,
    /// Waiting out the backoff before the next attempt.
    Reconnecting {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Backoff before the next attempt.
        #[serde(rename = "delayMs", serialize_with = "serialize_millis")]
        delay: Duration,
    },
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether an attempt is in flight or the connection is up.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Observable connection status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Set once `consecutive_failures` reaches the alert threshold.
    pub failure_alert: bool,
}

#[derive(Default)]
struct DriverSlot {
    /// Identifies the current driver; bumped on every start and disconnect
    /// so a superseded driver cannot publish status.
    run_id: u64,
    handle: Option<AbortHandle>,
}

struct ConnectionInner {
    config: Arc<FeedConfig>,
    transport: Arc<dyn EventTransport>,
    registry: ChannelRegistry,
    sessions: watch::Receiver<Option<Session>>,
    status_tx: watch::Sender<ConnectionStatus>,
    driver: Mutex<DriverSlot>,
    retry_now: Notify,
}

impl ConnectionInner {
    /// Apply `update` to the status if `run_id` is still the current driver.
    fn update(&self, run_id: u64, update: impl FnOnce(&mut ConnectionStatus)) -> bool {
        let driver = self.driver.lock();
        if driver.run_id != run_id {
            return false;
        }
        self.status_tx.send_modify(update);
        true
    }

    fn is_current(&self, run_id: u64) -> bool {
        self.driver.lock().run_id == run_id
    }

    /// The driver `run_id` stopped on its own.
    fn finish(&self, run_id: u64, last_error: Option<String>) {
        let mut driver = self.driver.lock();
        if driver.run_id != run_id {
            return;
        }
        driver.handle = None;
        self.status_tx.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
            if last_error.is_some() {
                status.last_error = last_error;
            }
        });
    }

    fn current_session(&self) -> Option<Session> {
        self.sessions
            .borrow()
            .as_ref()
            .filter(|session| session.is_valid())
            .cloned()
    }
}

/// Owns the connection to the event source.
///
/// Cheap to clone; clones control the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

impl ConnectionManager {
    /// Create a manager reading the session from `sessions`.
    ///
    /// Frames are dispatched to `registry` on the driver task.
    pub fn new(
        config: Arc<FeedConfig>,
        transport: Arc<dyn EventTransport>,
        registry: ChannelRegistry,
        sessions: watch::Receiver<Option<Session>>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                transport,
                registry,
                sessions,
                status_tx,
                driver: Mutex::new(DriverSlot::default()),
                retry_now: Notify::new(),
            }),
        }
    }

    /// Start connecting.
    ///
    /// A no-op while connecting or connected. While reconnecting, the
    /// pending backoff wait is cut short and the next attempt starts
    /// immediately. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotAuthenticated`] if there is no valid session.
    pub fn connect(&self) -> FeedResult<()> {
        if self.inner.current_session().is_none() {
            return Err(AuthError::NotAuthenticated.into());
        }

        let mut driver = self.inner.driver.lock();
        let state = self.inner.status_tx.borrow().state;
        match state {
            ConnectionState::Connecting | ConnectionState::Connected
                if driver.handle.is_some() =>
            {
                debug!(?state, "Already connecting or connected");
                return Ok(());
            }
            ConnectionState::Reconnecting { attempt, .. } if driver.handle.is_some() => {
                debug!(attempt, "Retrying immediately");
                self.inner.retry_now.notify_waiters();
                return Ok(());
            }
            _ => {}
        }

        driver.run_id += 1;
        let run_id = driver.run_id;
        self.inner.status_tx.send_modify(|status| {
            status.state = ConnectionState::Connecting;
        });
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(drive(inner, run_id));
        driver.handle = Some(task.abort_handle());
        Ok(())
    }

    /// Stop the connection and any pending retry.
    ///
    /// Synchronous: when this returns, no further status change or dispatch
    /// from the previous driver can be observed.
    pub fn disconnect(&self) {
        let mut driver = self.inner.driver.lock();
        driver.run_id += 1;
        if let Some(handle) = driver.handle.take() {
            handle.abort();
            info!("Disconnected from event source");
        }
        self.inner.status_tx.send_replace(ConnectionStatus::default());
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Change feed of the status.
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status_tx.borrow().state.is_connected()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .finish()
    }
}

/// Driver loop: connect, stream, back off, repeat.
async fn drive(inner: Arc<ConnectionInner>, run_id: u64) {
    let backoff = inner.config.backoff();
    let threshold = inner.config.failure_alert_threshold;
    let mut attempt: u32 = 0;

    loop {
        let Some(session) = inner.current_session() else {
            info!("No valid session; connection stopped");
            inner.finish(run_id, None);
            return;
        };
        if !inner.update(run_id, |status| status.state = ConnectionState::Connecting) {
            return;
        }
        debug!(attempt, "Connecting to event source");

        let error = match run_once(&inner, run_id, &session, &mut attempt).await {
            Ok(()) => FeedError::connection("Connection closed by server"),
            Err(err) => err,
        };
        if !inner.is_current(run_id) {
            return;
        }

        let delay = calculate_backoff(backoff, attempt);
        attempt = attempt.saturating_add(1);

        let notified = inner.retry_now.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let message = error.to_string();
        let updated = inner.update(run_id, |status| {
            status.state = ConnectionState::Reconnecting { attempt, delay };
            status.last_error = Some(message.clone());
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            status.failure_alert = status.consecutive_failures >= threshold;
        });
        if !updated {
            return;
        }
        warn!(
            error = %message,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Connection failed; reconnecting"
        );

        tokio::select! {
            _ = sleep(delay) => {}
            _ = &mut notified => debug!("Backoff cut short"),
        }
    }
}

/// One connection: handshake, then dispatch frames until the stream ends.
async fn run_once(
    inner: &ConnectionInner,
    run_id: u64,
    session: &Session,
    attempt: &mut u32,
) -> FeedResult<()> {
    let handshake = inner.config.handshake_timeout;
    let mut frames = timeout(handshake, inner.transport.connect(session))
        .await
        .map_err(|_| FeedError::timeout(handshake))??;

    *attempt = 0;
    let connected = inner.update(run_id, |status| {
        status.state = ConnectionState::Connected;
        status.last_error = None;
        status.consecutive_failures = 0;
        status.failure_alert = false;
    });
    if !connected {
        return Ok(());
    }
    info!("Connected to event source");

    while let Some(frame) = frames.next().await {
        let frame = frame?;
        if !inner.is_current(run_id) {
            return Ok(());
        }
        let event = ChannelEvent {
            channel: frame.event.into(),
            payload: frame.data,
            received_at: Utc::now(),
        };
        let report = inner.registry.dispatch(&event);
        if report.failed > 0 {
            debug!(channel = %event.channel, failed = report.failed, "Dispatch had failures");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures_util::stream;
    use serde_json::json;

    use super::*;
    use crate::session::encode_unsigned;

    struct NeverTransport;

    #[async_trait]
    impl EventTransport for NeverTransport {
        async fn connect(&self, _session: &Session) -> FeedResult<FrameStream> {
            std::future::pending::<()>().await;
            Ok(Box::pin(stream::empty()))
        }
    }

    fn valid_session() -> Session {
        let token = encode_unsigned(&json!({ "exp": Utc::now().timestamp() + 3600 }));
        Session::from_token(token, None).expect("session")
    }

    fn manager(session: Option<Session>) -> (ConnectionManager, watch::Sender<Option<Session>>) {
        let (tx, rx) = watch::channel(session);
        let config = Arc::new(FeedConfig::new("wss://example.com/events"));
        let manager = ConnectionManager::new(
            config,
            Arc::new(NeverTransport),
            ChannelRegistry::new(),
            rx,
        );
        (manager, tx)
    }

    #[tokio::test]
    async fn test_connect_requires_session() {
        let (manager, _tx) = manager(None);
        let err = manager.connect().expect_err("no session");
        assert!(matches!(err, FeedError::Auth(AuthError::NotAuthenticated)));
        assert_eq!(manager.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (manager, _tx) = manager(Some(valid_session()));
        manager.connect().expect("connect");
        let run_id = manager.inner.driver.lock().run_id;
        manager.connect().expect("connect again");
        assert_eq!(manager.inner.driver.lock().run_id, run_id);
        assert_eq!(manager.status().state, ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_disconnect_resets_status() {
        let (manager, _tx) = manager(Some(valid_session()));
        manager.connect().expect("connect");
        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::default());
        assert!(manager.inner.driver.lock().handle.is_none());
    }

    #[test]
    fn test_status_serialization() {
        let status = ConnectionStatus {
            state: ConnectionState::Reconnecting {
                attempt: 2,
                delay: Duration::from_secs(2),
            },
            last_error: Some("boom".to_string()),
            consecutive_failures: 2,
            failure_alert: false,
        };
        let value = serde_json::to_value(&status).expect("serialize");
        assert_eq!(
            value,
            json!({
                "state": {"state": "reconnecting", "attempt": 2, "delayMs": 2000},
                "lastError": "boom",
                "consecutiveFailures": 2,
                "failureAlert": false
            })
        );
    }
}
