//! Read-only console snapshot and its derived health indicators.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::FeedConfig,
    connection::ConnectionStatus,
    events::{
        AlertSeverity, ApprovalProcessed, ApprovalRequest, EventRecord, Invoice,
        NetworkStatusUpdate, Payment, PerformanceAlert, SlaBreach, SlaMetrics, SystemMetrics,
    },
    session::{Role, Session},
    store::{AlertItem, EventStore},
};

/// What the snapshot exposes about the session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub authenticated: bool,
    pub subject: Option<String>,
    pub role: Option<Role>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionSummary {
    fn from_session(session: Option<&Session>, now: DateTime<Utc>) -> Self {
        let Some(session) = session else {
            return Self::default();
        };
        Self {
            authenticated: session.is_valid_at(now),
            subject: session.claims().sub.clone(),
            role: session.role().cloned(),
            expires_at: Some(session.expires_at()),
        }
    }
}

/// Immutable view of the console state.
///
/// Produced by the aggregator after every change; consumers re-read it
/// rather than mutate it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Strictly increasing across snapshots from one aggregator.
    pub version: u64,
    pub computed_at: DateTime<Utc>,

    pub session: SessionSummary,
    pub connection: ConnectionStatus,

    pub system_metrics: Option<SystemMetrics>,
    pub network_status: Vec<NetworkStatusUpdate>,
    pub sla_metrics: Option<SlaMetrics>,

    pub sla_breaches: Vec<EventRecord<SlaBreach>>,
    pub alerts: Vec<AlertItem>,
    pub performance_alerts: Vec<EventRecord<PerformanceAlert>>,
    pub payments: Vec<EventRecord<Payment>>,
    pub invoices: Vec<EventRecord<Invoice>>,
    pub pending_approvals: Vec<EventRecord<ApprovalRequest>>,
    pub processed_approvals: Vec<EventRecord<ApprovalProcessed>>,

    pub unread_count: usize,
    pub critical_count: usize,
    pub active_performance_alerts: Vec<EventRecord<PerformanceAlert>>,
    pub is_healthy: bool,
    pub needs_attention: bool,
}

impl Snapshot {
    /// Snapshot of an empty store with no session.
    pub fn empty() -> Self {
        Self {
            version: 0,
            computed_at: Utc::now(),
            session: SessionSummary::default(),
            connection: ConnectionStatus::default(),
            system_metrics: None,
            network_status: Vec::new(),
            sla_metrics: None,
            sla_breaches: Vec::new(),
            alerts: Vec::new(),
            performance_alerts: Vec::new(),
            payments: Vec::new(),
            invoices: Vec::new(),
            pending_approvals: Vec::new(),
            processed_approvals: Vec::new(),
            unread_count: 0,
            critical_count: 0,
            active_performance_alerts: Vec::new(),
            is_healthy: true,
            needs_attention: false,
        }
    }

    /// Compute the snapshot of `store` as of `now`.
    pub fn compute(
        version: u64,
        now: DateTime<Utc>,
        store: &EventStore,
        session: Option<&Session>,
        connection: ConnectionStatus,
        config: &FeedConfig,
    ) -> Self {
        let alerts = store.alerts().to_vec();
        let unread_count = unread_count(&alerts);
        let critical_count = critical_count(&alerts);

        let window = chrono::Duration::from_std(config.performance_window)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let active_performance_alerts: Vec<_> = store
            .performance_alerts()
            .iter()
            .filter(|record| record.timestamp >= cutoff)
            .cloned()
            .collect();

        let pending_approvals = store.approvals().pending().to_vec();
        let needs_attention =
            pending_approvals.len() > config.attention_pending_threshold || critical_count > 0;

        Self {
            version,
            computed_at: now,
            session: SessionSummary::from_session(session, now),
            connection,
            system_metrics: store.system_metrics().map(|r| r.payload.clone()),
            network_status: store
                .network_status()
                .map(|r| r.payload.clone())
                .collect(),
            sla_metrics: store.sla_metrics().map(|r| r.payload.clone()),
            sla_breaches: store.breaches().to_vec(),
            alerts,
            performance_alerts: store.performance_alerts().to_vec(),
            payments: store.payments().to_vec(),
            invoices: store.invoices().to_vec(),
            pending_approvals,
            processed_approvals: store.approvals().processed().to_vec(),
            unread_count,
            critical_count,
            is_healthy: critical_count == 0 && active_performance_alerts.is_empty(),
            active_performance_alerts,
            needs_attention,
        }
    }

    pub fn pending_approval_count(&self) -> usize {
        self.pending_approvals.len()
    }
}

/// Alerts not yet read.
pub fn unread_count(alerts: &[AlertItem]) -> usize {
    alerts.iter().filter(|a| !a.is_read).count()
}

/// Unread alerts of critical severity.
pub fn critical_count(alerts: &[AlertItem]) -> usize {
    alerts
        .iter()
        .filter(|a| !a.is_read && a.severity() == AlertSeverity::Critical)
        .count()
}
