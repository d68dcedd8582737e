//! Console Tail Example
//!
//! Logs in against a live deployment and prints a line per snapshot.
//!
//! Run with:
//!
//! ```text
//! CONSOLE_WS_URL=wss://ops.example.com/events \
//! CONSOLE_API_URL=https://ops.example.com/api \
//! CONSOLE_EMAIL=ops@example.com CONSOLE_PASSWORD=secret \
//! cargo run -p console-feed --example console_tail
//! ```

use std::env;

use console_feed::{ConsoleClient, FeedConfig, FeedResult, init_tracing};

#[tokio::main]
async fn main() -> FeedResult<()> {
    init_tracing();

    let url = env::var("CONSOLE_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:3000".to_string());
    let api = env::var("CONSOLE_API_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let config = FeedConfig::new(url).api_base_url(api);
    let client = ConsoleClient::connect_http(config, "console-tail-session.json")?;

    if client.restore().await?.is_none() {
        let email = env::var("CONSOLE_EMAIL").unwrap_or_default();
        let password = env::var("CONSOLE_PASSWORD").unwrap_or_default();
        client.login(&email, &password).await?;
    }

    let mut snapshots = client.watch_snapshot();
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                println!(
                    "v{} {:?} alerts={} unread={} critical={} pending={} healthy={} attention={}",
                    snapshot.version,
                    snapshot.connection.state,
                    snapshot.alerts.len(),
                    snapshot.unread_count,
                    snapshot.critical_count,
                    snapshot.pending_approval_count(),
                    snapshot.is_healthy,
                    snapshot.needs_attention,
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown();
    Ok(())
}
