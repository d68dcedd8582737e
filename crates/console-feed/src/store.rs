//! Retained console state: per-category buffers, the approval workflow and
//! latest-value state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::{
    buffer::{ApprovalStore, BoundedBuffer},
    config::FeedConfig,
    events::{
        AlertSeverity, EventRecord, FeedEvent, Invoice, NetworkStatusUpdate, Payment,
        PerformanceAlert, SlaBreach, SlaMetrics, SystemAlert, SystemMetrics,
    },
};

/// A retained system alert with its read flag.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertItem {
    #[serde(flatten)]
    pub record: EventRecord<SystemAlert>,
    pub is_read: bool,
}

impl AlertItem {
    pub fn id(&self) -> &str {
        &self.record.payload.id
    }

    pub fn severity(&self) -> AlertSeverity {
        self.record.payload.severity
    }
}

/// Mutable state the aggregator applies events to.
#[derive(Debug)]
pub struct EventStore {
    system_metrics: Option<EventRecord<SystemMetrics>>,
    network_status: BTreeMap<String, EventRecord<NetworkStatusUpdate>>,
    sla_metrics: Option<EventRecord<SlaMetrics>>,
    breaches: BoundedBuffer<EventRecord<SlaBreach>>,
    alerts: BoundedBuffer<AlertItem>,
    performance_alerts: BoundedBuffer<EventRecord<PerformanceAlert>>,
    payments: BoundedBuffer<EventRecord<Payment>>,
    invoices: BoundedBuffer<EventRecord<Invoice>>,
    approvals: ApprovalStore,
    next_alert_id: u64,
}

impl EventStore {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            system_metrics: None,
            network_status: BTreeMap::new(),
            sla_metrics: None,
            breaches: BoundedBuffer::new(config.breach_capacity),
            alerts: BoundedBuffer::new(config.alert_capacity),
            performance_alerts: BoundedBuffer::new(config.performance_alert_capacity),
            payments: BoundedBuffer::new(config.payment_capacity),
            invoices: BoundedBuffer::new(config.invoice_capacity),
            approvals: ApprovalStore::new(),
            next_alert_id: 0,
        }
    }

    /// Apply a decoded event received at `received_at`.
    pub fn apply(&mut self, event: FeedEvent, received_at: DateTime<Utc>) {
        let category = event.channel();
        let timestamp = event.timestamp();
        match event {
            FeedEvent::SystemMetrics(p) => {
                self.system_metrics = Some(EventRecord::new(category, p, timestamp, received_at));
            }
            FeedEvent::NetworkStatus(p) => {
                self.network_status.insert(
                    p.network_id.clone(),
                    EventRecord::new(category, p, timestamp, received_at),
                );
            }
            FeedEvent::SlaMetrics(p) => {
                self.sla_metrics = Some(EventRecord::new(category, p, timestamp, received_at));
            }
            FeedEvent::SlaBreach(p) => {
                self.breaches
                    .push(EventRecord::new(category, p, timestamp, received_at));
            }
            FeedEvent::ApprovalRequest(p) => {
                self.approvals
                    .request(EventRecord::new(category, p, timestamp, received_at));
            }
            FeedEvent::ApprovalProcessed(p) => {
                self.approvals
                    .process(EventRecord::new(category, p, timestamp, received_at));
            }
            FeedEvent::Payment(p) => {
                self.payments
                    .push(EventRecord::new(category, p, timestamp, received_at));
            }
            FeedEvent::Invoice(p) => {
                self.invoices
                    .push(EventRecord::new(category, p, timestamp, received_at));
            }
            FeedEvent::SystemAlert(mut p) => {
                if p.id.is_empty() {
                    self.next_alert_id += 1;
                    p.id = format!("local-{}", self.next_alert_id);
                    debug!(id = %p.id, "Alert without id; assigned local id");
                }
                self.alerts.push(AlertItem {
                    record: EventRecord::new(category, p, timestamp, received_at),
                    is_read: false,
                });
            }
            FeedEvent::PerformanceAlert(p) => {
                self.performance_alerts
                    .push(EventRecord::new(category, p, timestamp, received_at));
            }
        }
    }

    /// Mark the alert `id` as read. Returns `true` if its flag changed.
    pub fn mark_as_read(&mut self, id: &str) -> bool {
        let mut changed = false;
        for alert in self.alerts.iter_mut().filter(|a| a.id() == id) {
            changed |= !alert.is_read;
            alert.is_read = true;
        }
        changed
    }

    /// Mark every alert as read. Returns how many flags changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for alert in self.alerts.iter_mut().filter(|a| !a.is_read) {
            alert.is_read = true;
            changed += 1;
        }
        changed
    }

    /// Remove the alert `id`. Returns `true` if it was present.
    pub fn dismiss(&mut self, id: &str) -> bool {
        self.alerts.retain(|a| a.id() != id) > 0
    }

    /// Remove every alert.
    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
    }

    /// Drop everything.
    pub fn reset(&mut self) {
        self.system_metrics = None;
        self.network_status.clear();
        self.sla_metrics = None;
        self.breaches.clear();
        self.alerts.clear();
        self.performance_alerts.clear();
        self.payments.clear();
        self.invoices.clear();
        self.approvals.clear();
    }

    pub fn system_metrics(&self) -> Option<&EventRecord<SystemMetrics>> {
        self.system_metrics.as_ref()
    }

    /// Latest status per network, ordered by network id.
    pub fn network_status(&self) -> impl Iterator<Item = &EventRecord<NetworkStatusUpdate>> {
        self.network_status.values()
    }

    pub fn sla_metrics(&self) -> Option<&EventRecord<SlaMetrics>> {
        self.sla_metrics.as_ref()
    }

    pub fn breaches(&self) -> &BoundedBuffer<EventRecord<SlaBreach>> {
        &self.breaches
    }

    pub fn alerts(&self) -> &BoundedBuffer<AlertItem> {
        &self.alerts
    }

    pub fn performance_alerts(&self) -> &BoundedBuffer<EventRecord<PerformanceAlert>> {
        &self.performance_alerts
    }

    pub fn payments(&self) -> &BoundedBuffer<EventRecord<Payment>> {
        &self.payments
    }

    pub fn invoices(&self) -> &BoundedBuffer<EventRecord<Invoice>> {
        &self.invoices
    }

    pub fn approvals(&self) -> &ApprovalStore {
        &self.approvals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(id: &str, severity: AlertSeverity) -> FeedEvent {
        FeedEvent::SystemAlert(SystemAlert {
            id: id.to_string(),
            severity,
            ..Default::default()
        })
    }

    fn breach(order_id: &str) -> FeedEvent {
        FeedEvent::SlaBreach(SlaBreach {
            order_id: order_id.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_breach_capacity_from_config() {
        let config = FeedConfig::new("wss://example.com").breach_capacity(3);
        let mut store = EventStore::new(&config);
        for id in ["1", "2", "3", "4"] {
            store.apply(breach(id), Utc::now());
        }
        let ids: Vec<&str> = store
            .breaches()
            .iter()
            .map(|b| b.payload.order_id.as_str())
            .collect();
        assert_eq!(ids, vec!["4", "3", "2"]);
    }

    #[test]
    fn test_alert_operations() {
        let mut store = EventStore::new(&FeedConfig::default());
        store.apply(alert("a", AlertSeverity::Critical), Utc::now());
        store.apply(alert("b", AlertSeverity::Low), Utc::now());
        store.apply(alert("c", AlertSeverity::High), Utc::now());

        assert!(store.mark_as_read("a"));
        assert!(!store.mark_as_read("a"));
        assert!(!store.mark_as_read("missing"));
        assert_eq!(store.mark_all_read(), 2);

        assert!(store.dismiss("b"));
        assert!(!store.dismiss("b"));
        assert_eq!(store.alerts().len(), 2);

        store.clear_alerts();
        assert!(store.alerts().is_empty());
    }

    #[test]
    fn test_alert_without_id_gets_local_id() {
        let mut store = EventStore::new(&FeedConfig::default());
        store.apply(alert("", AlertSeverity::Medium), Utc::now());
        store.apply(alert("", AlertSeverity::Medium), Utc::now());
        let ids: Vec<&str> = store.alerts().iter().map(AlertItem::id).collect();
        assert_eq!(ids, vec!["local-2", "local-1"]);
    }

    #[test]
    fn test_network_status_keeps_latest_per_network() {
        let mut store = EventStore::new(&FeedConfig::default());
        for (id, orders) in [("n1", 1), ("n2", 5), ("n1", 9)] {
            store.apply(
                FeedEvent::NetworkStatus(NetworkStatusUpdate {
                    network_id: id.to_string(),
                    active_orders: orders,
                    ..Default::default()
                }),
                Utc::now(),
            );
        }
        let latest: Vec<(&str, u64)> = store
            .network_status()
            .map(|r| (r.payload.network_id.as_str(), r.payload.active_orders))
            .collect();
        assert_eq!(latest, vec![("n1", 9), ("n2", 5)]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut store = EventStore::new(&FeedConfig::default());
        store.apply(alert("a", AlertSeverity::Low), Utc::now());
        store.apply(breach("1"), Utc::now());
        store.apply(
            FeedEvent::SystemMetrics(SystemMetrics::default()),
            Utc::now(),
        );
        store.reset();
        assert!(store.alerts().is_empty());
        assert!(store.breaches().is_empty());
        assert!(store.system_metrics().is_none());
    }
}
