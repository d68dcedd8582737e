//! # Console Feed
//!
//! Realtime event aggregation and session lifecycle for the operations
//! console.
//!
//! The crate keeps a live, read-only [`Snapshot`] of the console state fed
//! by a persistent connection to the event source, while managing the
//! authenticated session whose token expires and must be renewed.
//!
//! ## Components
//!
//! - **Session** ([`SessionManager`]): login, restore, token validation,
//!   proactive refresh of elevated tokens and logout.
//! - **Connection** ([`ConnectionManager`]): one connection per session with
//!   handshake timeout and exponential reconnect backoff.
//! - **Channels** ([`ChannelRegistry`]): per-channel handler registration
//!   and isolated dispatch.
//! - **Buffers** ([`BoundedBuffer`], [`ApprovalStore`]): newest-first
//!   retention per category and the approval workflow.
//! - **Aggregation** ([`StateAggregator`]): derived health indicators
//!   recomputed on every change.
//!
//! [`ConsoleClient`] wires them together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use console_feed::{ConsoleClient, FeedConfig, init_tracing};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_tracing();
//!
//!     let config = FeedConfig::new("wss://ops.example.com/events")
//!         .api_base_url("https://ops.example.com/api");
//!     let client = ConsoleClient::connect_http(config, "console-state.json")?;
//!
//!     if client.restore().await?.is_none() {
//!         client.login("ops@example.com", "secret").await?;
//!     }
//!
//!     let snapshot = client.snapshot();
//!     println!("needs attention: {}", snapshot.needs_attention);
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod api;
pub mod buffer;
pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod reconnect;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod telemetry;
mod timer;

// Re-export commonly used types
pub use aggregator::StateAggregator;
pub use api::{AuthApi, HttpAuthApi, LoginResponse, RefreshResponse, UserProfile};
pub use buffer::{ApprovalStore, BoundedBuffer};
pub use channel::{
    ChannelEvent, ChannelName, ChannelRegistry, DispatchReport, EventHandler, HandlerError,
    Subscription,
};
pub use client::ConsoleClient;
pub use config::FeedConfig;
pub use connection::{
    ConnectionManager, ConnectionState, ConnectionStatus, EventTransport, FrameStream,
    InboundFrame, WsTransport,
};
pub use error::{AuthError, FeedError, FeedResult};
pub use events::{Channel, EventRecord, FeedEvent};
pub use reconnect::{BackoffConfig, calculate_backoff};
pub use session::{
    FileTokenStore, MemoryTokenStore, RefreshPlan, Role, Session, SessionManager, TokenStore,
};
pub use snapshot::Snapshot;
pub use store::{AlertItem, EventStore};
pub use telemetry::init_tracing;
