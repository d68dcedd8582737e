mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use common::{ScriptedTransport, Step, accept, session};
use console_feed::{
    AuthError, ChannelEvent, ChannelRegistry, ConnectionManager, ConnectionState,
    ConnectionStatus, FeedConfig, FeedError, HandlerError, InboundFrame, Session,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::{
    sync::watch,
    time::{Instant, timeout},
};

fn config() -> FeedConfig {
    FeedConfig::new("wss://ops.example.com/events")
        .handshake_timeout(Duration::from_secs(5))
        .reconnect_initial_delay(Duration::from_secs(1))
        .reconnect_max_delay(Duration::from_secs(3))
        .failure_alert_threshold(2)
}

struct Harness {
    manager: ConnectionManager,
    registry: ChannelRegistry,
    transport: Arc<ScriptedTransport>,
    sessions: watch::Sender<Option<Session>>,
    status: watch::Receiver<ConnectionStatus>,
}

fn harness(config: FeedConfig, steps: Vec<Step>) -> Harness {
    let transport = ScriptedTransport::new(steps);
    let registry = ChannelRegistry::new();
    let (sessions, sessions_rx) = watch::channel(Some(session(Some("super_admin"), 7200)));
    let manager = ConnectionManager::new(
        Arc::new(config),
        transport.clone(),
        registry.clone(),
        sessions_rx,
    );
    let status = manager.watch();
    Harness {
        manager,
        registry,
        transport,
        sessions,
        status,
    }
}

async fn wait_for(
    status: &mut watch::Receiver<ConnectionStatus>,
    predicate: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    timeout(Duration::from_secs(120), status.wait_for(predicate))
        .await
        .expect("status reached in time")
        .expect("manager alive")
        .clone()
}

fn reconnecting(attempt: u32) -> impl FnMut(&ConnectionStatus) -> bool {
    move |status| matches!(status.state, ConnectionState::Reconnecting { attempt: a, .. } if a == attempt)
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_backs_off_and_doubles_to_cap() {
    let (step, frames) = accept();
    let mut h = harness(
        config(),
        vec![step, Step::Fail("refused"), Step::Fail("refused")],
    );

    h.manager.connect().expect("connect");
    wait_for(&mut h.status, |s| s.state.is_connected()).await;

    frames
        .send(Err(FeedError::connection("reset by peer")))
        .expect("send");

    let status = wait_for(&mut h.status, reconnecting(1)).await;
    assert_eq!(
        status.state,
        ConnectionState::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    assert_eq!(status.consecutive_failures, 1);
    assert!(!status.failure_alert);
    assert!(
        status
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("reset by peer"))
    );

    let status = wait_for(&mut h.status, reconnecting(2)).await;
    assert_eq!(
        status.state,
        ConnectionState::Reconnecting {
            attempt: 2,
            delay: Duration::from_secs(2)
        }
    );
    assert_eq!(status.consecutive_failures, 2);
    assert!(status.failure_alert);

    let status = wait_for(&mut h.status, reconnecting(3)).await;
    assert_eq!(
        status.state,
        ConnectionState::Reconnecting {
            attempt: 3,
            delay: Duration::from_secs(3)
        }
    );
    assert_eq!(h.transport.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_successful_connect_resets_backoff() {
    let (first, first_frames) = accept();
    let (second, second_frames) = accept();
    let mut h = harness(config(), vec![Step::Fail("refused"), first, second]);

    h.manager.connect().expect("connect");
    wait_for(&mut h.status, reconnecting(1)).await;
    let status = wait_for(&mut h.status, |s| s.state.is_connected()).await;
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.last_error, None);

    drop(first_frames);
    let status = wait_for(&mut h.status, reconnecting(1)).await;
    assert_eq!(
        status.state,
        ConnectionState::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    wait_for(&mut h.status, |s| s.state.is_connected()).await;
    drop(second_frames);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_is_a_failure() {
    let mut h = harness(config(), vec![Step::Hang]);

    let started = Instant::now();
    h.manager.connect().expect("connect");
    let status = wait_for(&mut h.status, reconnecting(1)).await;

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(
        status
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("timed out"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_reconnecting_retries_immediately() {
    let (step, _frames) = accept();
    let config = config()
        .reconnect_initial_delay(Duration::from_secs(60))
        .reconnect_max_delay(Duration::from_secs(60));
    let mut h = harness(config, vec![Step::Fail("refused"), step]);

    h.manager.connect().expect("connect");
    wait_for(&mut h.status, reconnecting(1)).await;

    let started = Instant::now();
    h.manager.connect().expect("retry");
    wait_for(&mut h.status, |s| s.state.is_connected()).await;
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(h.transport.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_retry() {
    let mut h = harness(config(), vec![Step::Fail("refused")]);

    h.manager.connect().expect("connect");
    wait_for(&mut h.status, reconnecting(1)).await;

    h.manager.disconnect();
    assert_eq!(h.manager.status(), ConnectionStatus::default());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.transport.attempts(), 1);
    assert_eq!(h.manager.status().state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_missing_session_stops_driver() {
    let mut h = harness(config(), vec![Step::Fail("refused")]);

    h.manager.connect().expect("connect");
    wait_for(&mut h.status, reconnecting(1)).await;

    h.sessions.send_replace(None);
    wait_for(&mut h.status, |s| s.state == ConnectionState::Disconnected).await;
    assert_eq!(h.transport.attempts(), 1);

    let err = h.manager.connect().expect_err("no session");
    assert!(matches!(err, FeedError::Auth(AuthError::NotAuthenticated)));
}

#[tokio::test(start_paused = true)]
async fn test_frames_are_dispatched_in_order() {
    let (step, frames) = accept();
    let mut h = harness(config(), vec![step]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let other = Arc::new(AtomicUsize::new(0));
    let _payments = {
        let seen = Arc::clone(&seen);
        h.registry.subscribe(
            "payment_received",
            move |event: &ChannelEvent| -> Result<(), HandlerError> {
                seen.lock().push(event.payload["amount"].as_i64().unwrap_or(-1));
                Ok(())
            },
        )
    };
    let _invoices = {
        let other = Arc::clone(&other);
        h.registry.subscribe(
            "invoice_generated",
            move |_: &ChannelEvent| -> Result<(), HandlerError> {
                other.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
    };

    h.manager.connect().expect("connect");
    wait_for(&mut h.status, |s| s.state.is_connected()).await;

    for amount in 1..=3 {
        frames
            .send(Ok(InboundFrame::new(
                "payment_received",
                json!({ "amount": amount }),
            )))
            .expect("send");
    }
    frames
        .send(Ok(InboundFrame::new("invoice_generated", json!({}))))
        .expect("send");

    timeout(Duration::from_secs(1), async {
        while other.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("dispatched");
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_instances_are_isolated() {
    let (step, _frames) = accept();
    let mut a = harness(config(), vec![step]);
    let mut b = harness(config(), vec![Step::Fail("refused")]);

    a.manager.connect().expect("connect a");
    b.manager.connect().expect("connect b");

    wait_for(&mut a.status, |s| s.state.is_connected()).await;
    wait_for(&mut b.status, reconnecting(1)).await;
    assert!(a.manager.is_connected());
    assert!(!b.manager.is_connected());
}
