#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use console_feed::{
    AuthApi, FeedError, FeedResult, FrameStream, InboundFrame, LoginResponse, RefreshResponse,
    Role, Session, UserProfile, connection::EventTransport, session::encode_unsigned,
};
use futures_util::stream;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

/// Unsigned token expiring `ttl_secs` from now.
pub fn token(role: Option<&str>, ttl_secs: i64) -> String {
    let mut claims = json!({ "sub": "u-1", "exp": Utc::now().timestamp() + ttl_secs });
    if let Some(role) = role {
        claims["role"] = json!(role);
    }
    encode_unsigned(&claims)
}

pub fn session(role: Option<&str>, ttl_secs: i64) -> Session {
    Session::from_token(token(role, ttl_secs), None).expect("session")
}

pub fn user(role: Role) -> UserProfile {
    UserProfile {
        id: "u-1".to_string(),
        email: Some("ops@example.com".to_string()),
        name: Some("Ops".to_string()),
        role: Some(role),
    }
}

/// Scripted [`AuthApi`].
#[derive(Default)]
pub struct MockApi {
    pub login: Mutex<Option<Result<LoginResponse, (u16, String)>>>,
    pub refresh: Mutex<VecDeque<Result<String, (u16, String)>>>,
    pub refresh_delay: Mutex<Duration>,
    pub profile: Mutex<Option<Result<UserProfile, (u16, String)>>>,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn login_ok(&self, token: String, user: UserProfile) {
        *self.login.lock() = Some(Ok(LoginResponse {
            access_token: token,
            user,
        }));
    }

    pub fn login_err(&self, status: u16, message: &str) {
        *self.login.lock() = Some(Err((status, message.to_string())));
    }

    pub fn push_refresh(&self, result: Result<String, (u16, String)>) {
        self.refresh.lock().push_back(result);
    }

    pub fn set_profile(&self, result: Result<UserProfile, (u16, String)>) {
        *self.profile.lock() = Some(result);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

fn api_error((status, message): (u16, String)) -> FeedError {
    FeedError::api(status, message)
}

#[async_trait]
impl AuthApi for MockApi {
    async fn login(&self, _email: &str, _password: &str) -> FeedResult<LoginResponse> {
        self.login
            .lock()
            .clone()
            .unwrap_or_else(|| Err((500, "no login scripted".to_string())))
            .map_err(api_error)
    }

    async fn refresh(&self, _token: &str) -> FeedResult<RefreshResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .refresh
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err((401, "refresh not scripted".to_string())));
        next.map(|access_token| RefreshResponse { access_token })
            .map_err(api_error)
    }

    async fn profile(&self, _token: &str) -> FeedResult<UserProfile> {
        self.profile
            .lock()
            .clone()
            .unwrap_or_else(|| Err((500, "no profile scripted".to_string())))
            .map_err(api_error)
    }

    async fn logout(&self, _token: &str) -> FeedResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One scripted connection attempt.
pub enum Step {
    Fail(&'static str),
    Hang,
    Accept(mpsc::UnboundedReceiver<FeedResult<InboundFrame>>),
}

/// Scripted [`EventTransport`]. Attempts past the end of the script hang.
#[derive(Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    attempts: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// A connection the test feeds frames into.
pub fn accept() -> (Step, mpsc::UnboundedSender<FeedResult<InboundFrame>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Step::Accept(rx), tx)
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn connect(&self, _session: &Session) -> FeedResult<FrameStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front().unwrap_or(Step::Hang);
        match step {
            Step::Fail(message) => Err(FeedError::connection(message)),
            Step::Hang => std::future::pending().await,
            Step::Accept(rx) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
        }
    }
}
