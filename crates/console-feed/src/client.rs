//! The console client: session, connection, registry and aggregator wired
//! together.

use std::{path::PathBuf, sync::Arc};

use tokio::sync::watch;
use tracing::info;

use crate::{
    aggregator::StateAggregator,
    api::{AuthApi, HttpAuthApi},
    channel::{ChannelName, ChannelRegistry, EventHandler, Subscription},
    config::FeedConfig,
    connection::{ConnectionManager, ConnectionStatus, EventTransport, WsTransport},
    error::{FeedError, FeedResult},
    session::{FileTokenStore, Session, SessionManager, TokenStore},
    snapshot::Snapshot,
};

/// Entry point for the embedding application.
///
/// # Example
///
/// ```rust,ignore
/// use console_feed::{ConsoleClient, FeedConfig};
///
/// let config = FeedConfig::new("wss://ops.example.com/events")
///     .api_base_url("https://ops.example.com/api");
/// let client = ConsoleClient::connect_http(config, "console-state.json")?;
///
/// client.login("ops@example.com", "secret").await?;
/// let mut snapshots = client.watch_snapshot();
/// while snapshots.changed().await.is_ok() {
///     let snapshot = snapshots.borrow().clone();
///     println!("unread alerts: {}", snapshot.unread_count);
/// }
/// ```
pub struct ConsoleClient {
    config: Arc<FeedConfig>,
    sessions: SessionManager,
    connection: ConnectionManager,
    registry: ChannelRegistry,
    aggregator: StateAggregator,
}

impl ConsoleClient {
    /// Wire a client from its collaborators.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Config`] if the configuration is invalid.
    pub fn new(
        config: FeedConfig,
        api: Arc<dyn AuthApi>,
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn EventTransport>,
    ) -> FeedResult<Self> {
        config.validate().map_err(FeedError::config)?;
        let config = Arc::new(config);

        let sessions = SessionManager::new(Arc::clone(&config), api, store);
        let registry = ChannelRegistry::new();
        let connection = ConnectionManager::new(
            Arc::clone(&config),
            transport,
            registry.clone(),
            sessions.watch(),
        );
        sessions.attach_connection(connection.clone());
        let aggregator = StateAggregator::new(
            Arc::clone(&config),
            &registry,
            sessions.watch(),
            connection.watch(),
        );

        Ok(Self {
            config,
            sessions,
            connection,
            registry,
            aggregator,
        })
    }

    /// Client using the HTTP API, the WebSocket transport and a JSON-file
    /// token store at `token_path`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Config`] if the configuration is invalid.
    pub fn connect_http(config: FeedConfig, token_path: impl Into<PathBuf>) -> FeedResult<Self> {
        config.validate().map_err(FeedError::config)?;
        let api = HttpAuthApi::new(config.api_base_url.clone(), config.request_timeout)?;
        let transport = WsTransport::new(config.url.clone());
        Self::new(
            config,
            Arc::new(api),
            Arc::new(FileTokenStore::new(token_path)),
            Arc::new(transport),
        )
    }

    /// Log in and start the connection.
    ///
    /// A connection left over from a previous login is dropped so the new
    /// token is used for the handshake.
    pub async fn login(&self, email: &str, password: &str) -> FeedResult<Session> {
        let session = self.sessions.login(email, password).await?;
        self.connection.disconnect();
        self.connection.connect()?;
        Ok(session)
    }

    /// Restore a persisted session and, if one is found, connect.
    pub async fn restore(&self) -> FeedResult<Option<Session>> {
        let restored = self.sessions.restore().await?;
        if restored.is_some() {
            self.connection.connect()?;
        }
        Ok(restored)
    }

    /// Start (or retry) the connection for the current session.
    pub fn connect(&self) -> FeedResult<()> {
        self.connection.connect()
    }

    /// Log out, disconnect and drop the aggregated state.
    pub async fn logout(&self) {
        self.sessions.logout().await;
        self.aggregator.reset();
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.aggregator.snapshot()
    }

    /// Change feed of snapshots.
    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.aggregator.watch()
    }

    /// Connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Register an additional handler for raw events on `channel`.
    #[must_use = "dropping the subscription unsubscribes the handler"]
    pub fn subscribe<H>(&self, channel: impl Into<ChannelName>, handler: H) -> Subscription
    where
        H: EventHandler + 'static,
    {
        self.registry.subscribe(channel, handler)
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn aggregator(&self) -> &StateAggregator {
        &self.aggregator
    }

    /// Disconnect and tear down the aggregator. The session is kept.
    pub fn shutdown(&self) {
        self.connection.disconnect();
        self.aggregator.shutdown();
        info!("Console client shut down");
    }
}
