//! Session lifecycle: login, restore, proactive refresh, logout.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, warn};

use super::{Session, store::TokenStore, token};
use crate::{
    api::AuthApi,
    config::FeedConfig,
    connection::ConnectionManager,
    error::{AuthError, FeedError, FeedResult},
    timer::TimerSlot,
};

/// Outcome of [`SessionManager::schedule_refresh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshPlan {
    /// The role does not use elevated tokens; nothing is scheduled.
    NotRequired,
    /// Lifetime is above the threshold; scheduling is re-evaluated after
    /// the given delay, when the threshold is crossed.
    Deferred(Duration),
    /// A refresh attempt fires after the given delay.
    Scheduled(Duration),
}

struct SessionInner {
    config: Arc<FeedConfig>,
    api: Arc<dyn AuthApi>,
    store: Arc<dyn TokenStore>,
    session_tx: watch::Sender<Option<Session>>,
    refresh_timer: TimerSlot,
    /// Bumped whenever the session is replaced or torn down; in-flight
    /// refreshes from an older epoch are discarded.
    epoch: AtomicU64,
    /// When the last refresh succeeded; spaces out follow-up attempts.
    last_refresh: Mutex<Option<Instant>>,
    connection: Mutex<Option<ConnectionManager>>,
}

/// Owns the authentication token.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(
        config: Arc<FeedConfig>,
        api: Arc<dyn AuthApi>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let (session_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner {
                config,
                api,
                store,
                session_tx,
                refresh_timer: TimerSlot::new(),
                epoch: AtomicU64::new(0),
                last_refresh: Mutex::new(None),
                connection: Mutex::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<SessionInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Register the connection manager torn down on logout.
    pub fn attach_connection(&self, connection: ConnectionManager) {
        *self.inner.connection.lock() = Some(connection);
    }

    /// Structural and expiry validation of `token`. Never fails.
    pub fn validate(&self, token: &str) -> bool {
        token::validate(token)
    }

    /// Current session, if any.
    pub fn session(&self) -> Option<Session> {
        self.inner.session_tx.borrow().clone()
    }

    /// Change feed of the current session.
    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.inner.session_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner
            .session_tx
            .borrow()
            .as_ref()
            .is_some_and(Session::is_valid)
    }

    /// Whether a refresh attempt (or a deferred re-check) is pending.
    pub fn refresh_pending(&self) -> bool {
        self.inner.refresh_timer.is_armed()
    }

    /// Log in with credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] with the API's message verbatim when
    /// the API refuses the credentials, or an [`AuthError`] when the returned
    /// token is unusable.
    pub async fn login(&self, email: &str, password: &str) -> FeedResult<Session> {
        let response = self
            .inner
            .api
            .login(email, password)
            .await
            .map_err(|err| match err {
                FeedError::Api { message, .. } => FeedError::Auth(AuthError::Rejected(message)),
                other => other,
            })?;

        let session = Session::from_token(response.access_token, Some(response.user))?;
        self.persist(session.token());
        self.install(session.clone());
        info!(
            role = session.role().map(|r| r.as_str()).unwrap_or("unknown"),
            expires_at = %session.expires_at(),
            "Logged in"
        );
        Ok(session)
    }

    /// Restore the session from the persisted token record.
    ///
    /// An invalid record is removed. An unauthorized profile response clears
    /// the record; other profile failures keep the session without a user
    /// record.
    pub async fn restore(&self) -> FeedResult<Option<Session>> {
        let Some(token) = self.inner.store.load()? else {
            return Ok(None);
        };

        if !token::validate(&token) {
            info!("Stored token failed validation; removing it");
            self.clear_store();
            return Ok(None);
        }

        let user = match self.inner.api.profile(&token).await {
            Ok(user) => Some(user),
            Err(err) if err.is_unauthorized() => {
                info!(error = %err, "Stored token rejected by API; removing it");
                self.clear_store();
                return Ok(None);
            }
            Err(err) => {
                warn!(error = %err, "Profile fetch failed; restoring from claims only");
                None
            }
        };

        match Session::from_token(token, user) {
            Ok(session) => {
                self.install(session.clone());
                info!(expires_at = %session.expires_at(), "Session restored");
                Ok(Some(session))
            }
            Err(_) => {
                self.clear_store();
                Ok(None)
            }
        }
    }

    /// Refresh the token.
    ///
    /// On failure the session is torn down via [`logout`](Self::logout) and
    /// the error is returned. A refresh that completes after the session was
    /// replaced or logged out is discarded.
    pub async fn refresh(&self) -> FeedResult<Session> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let Some(current) = self.session() else {
            self.logout().await;
            return Err(AuthError::NotAuthenticated.into());
        };

        debug!("Refreshing session token");
        let result = self.inner.api.refresh(current.token()).await;

        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Session changed during refresh; discarding result");
            return Err(AuthError::NotAuthenticated.into());
        }

        let refreshed = result
            .map_err(|err| AuthError::RefreshFailed(err.user_message()))
            .and_then(|response| {
                Session::from_token(response.access_token, current.user().cloned())
                    .map_err(|err| AuthError::RefreshFailed(err.to_string()))
            });

        match refreshed {
            Ok(session) => {
                *self.inner.last_refresh.lock() = Some(Instant::now());
                self.persist(session.token());
                self.install(session.clone());
                info!(expires_at = %session.expires_at(), "Session refreshed");
                Ok(session)
            }
            Err(err) => {
                warn!(error = %err, "Token refresh failed; logging out");
                self.logout().await;
                Err(err.into())
            }
        }
    }

    /// Arrange a proactive refresh for `session` when its role uses elevated
    /// tokens and its remaining lifetime is below the refresh threshold.
    ///
    /// The attempt fires `refresh_lead` before expiry, or immediately when
    /// less than that remains. After a successful refresh the next attempt
    /// waits at least `min_refresh_interval` (bounded by half the remaining
    /// lifetime).
    pub fn schedule_refresh(&self, session: &Session) -> RefreshPlan {
        let elevated = session
            .role()
            .is_some_and(|role| role.requires_elevated_refresh());
        if !elevated {
            self.inner.refresh_timer.cancel();
            return RefreshPlan::NotRequired;
        }

        let config = &self.inner.config;
        let remaining = session.claims().remaining_at(Utc::now());
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);

        if remaining >= config.refresh_threshold {
            // Re-check once the remaining lifetime crosses the threshold.
            let delay = remaining - config.refresh_threshold;
            self.inner.refresh_timer.arm(delay, async move {
                let Some(manager) = Self::from_weak(&weak) else {
                    return;
                };
                if manager.inner.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                if let Some(session) = manager.session() {
                    manager.schedule_refresh(&session);
                }
            });
            debug!(delay_secs = delay.as_secs(), "Refresh check deferred");
            return RefreshPlan::Deferred(delay);
        }

        let mut delay = remaining.saturating_sub(config.refresh_lead);
        let last_refresh = *self.inner.last_refresh.lock();
        if let Some(last) = last_refresh {
            // A token issued with less than the lead left would otherwise be
            // refreshed again immediately.
            let spacing = config
                .min_refresh_interval
                .saturating_sub(last.elapsed())
                .min(remaining / 2);
            delay = delay.max(spacing);
        }
        self.inner.refresh_timer.arm(delay, async move {
            let Some(manager) = Self::from_weak(&weak) else {
                return;
            };
            if manager.inner.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            if let Err(err) = manager.refresh().await {
                warn!(error = %err, "Scheduled refresh failed");
            }
        });
        info!(delay_secs = delay.as_secs(), "Token refresh scheduled");
        RefreshPlan::Scheduled(delay)
    }

    /// Tear the session down.
    ///
    /// Timers are cancelled and the connection is disconnected before
    /// anything is awaited. The API is notified last, best effort.
    pub async fn logout(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.refresh_timer.cancel();
        *self.inner.last_refresh.lock() = None;
        let connection = self.inner.connection.lock().clone();
        if let Some(connection) = connection {
            connection.disconnect();
        }
        let previous = self.inner.session_tx.send_replace(None);
        self.clear_store();

        if let Some(previous) = previous {
            if let Err(err) = self.inner.api.logout(previous.token()).await {
                debug!(error = %err, "API logout failed");
            }
            info!("Logged out");
        }
    }

    fn install(&self, session: Session) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.session_tx.send_replace(Some(session.clone()));
        self.schedule_refresh(&session);
    }

    fn persist(&self, token: &str) {
        if let Err(err) = self.inner.store.save(token) {
            warn!(error = %err, "Failed to persist token");
        }
    }

    fn clear_store(&self) {
        if let Err(err) = self.inner.store.clear() {
            warn!(error = %err, "Failed to clear stored token");
        }
    }
}
