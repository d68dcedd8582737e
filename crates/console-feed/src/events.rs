//! Typed payloads for the monitored event channels.
//!
//! Payloads arrive as loosely-typed JSON. Decoding is lenient: numeric
//! fields that arrive as text are parsed, anything that still does not
//! coerce becomes zero, unknown enum values map to an `Unknown` variant and
//! a missing timestamp falls back to the arrival time. Only a payload that
//! is not a JSON object at all is rejected.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};

/// The monitored event channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    SystemMetricsUpdated,
    NetworkStatusChanged,
    SlaBreachDetected,
    SlaMetricsUpdated,
    NewApprovalRequest,
    ApprovalProcessed,
    PaymentReceived,
    InvoiceGenerated,
    SystemAlertTriggered,
    PerformanceThresholdExceeded,
}

impl Channel {
    pub const ALL: [Channel; 10] = [
        Channel::SystemMetricsUpdated,
        Channel::NetworkStatusChanged,
        Channel::SlaBreachDetected,
        Channel::SlaMetricsUpdated,
        Channel::NewApprovalRequest,
        Channel::ApprovalProcessed,
        Channel::PaymentReceived,
        Channel::InvoiceGenerated,
        Channel::SystemAlertTriggered,
        Channel::PerformanceThresholdExceeded,
    ];

    /// Wire name of the channel.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemMetricsUpdated => "system_metrics_updated",
            Self::NetworkStatusChanged => "network_status_changed",
            Self::SlaBreachDetected => "sla_breach_detected",
            Self::SlaMetricsUpdated => "sla_metrics_updated",
            Self::NewApprovalRequest => "new_approval_request",
            Self::ApprovalProcessed => "approval_processed",
            Self::PaymentReceived => "payment_received",
            Self::InvoiceGenerated => "invoice_generated",
            Self::SystemAlertTriggered => "system_alert_triggered",
            Self::PerformanceThresholdExceeded => "performance_threshold_exceeded",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lenient field decoders used by the payload types.
mod lenient {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, de::DeserializeOwned};
    use serde_json::Value;
    use tracing::debug;

    fn coerce_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(coerce_f64(&value)
            .filter(|v| v.is_finite())
            .unwrap_or_else(|| {
                debug!(value = %value, "Coerced non-numeric field to 0");
                0.0
            }))
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let value = Value::deserialize(d)?;
        if let Some(n) = value.as_u64() {
            return Ok(n);
        }
        if let Value::String(s) = &value
            && let Ok(n) = s.trim().parse::<u64>()
        {
            return Ok(n);
        }
        match coerce_f64(&value) {
            Some(v) if v.is_finite() && v >= 0.0 => Ok(v.trunc() as u64),
            _ => {
                debug!(value = %value, "Coerced non-numeric field to 0");
                Ok(0)
            }
        }
    }

    fn coerce_string(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(coerce_string(Value::deserialize(d)?).unwrap_or_default())
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(coerce_string(Value::deserialize(d)?).filter(|s| !s.is_empty()))
    }

    /// RFC 3339 strings, or numbers as epoch seconds (milliseconds when the
    /// magnitude says so). Anything else is treated as missing.
    pub fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Value::deserialize(d)?;
        let parsed = match &value {
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            Value::Number(n) => n.as_i64().and_then(|raw| {
                if raw.unsigned_abs() >= 100_000_000_000 {
                    Utc.timestamp_millis_opt(raw).single()
                } else {
                    Utc.timestamp_opt(raw, 0).single()
                }
            }),
            _ => None,
        };
        if parsed.is_none() && !value.is_null() {
            debug!(value = %value, "Unparseable timestamp; using arrival time");
        }
        Ok(parsed)
    }

    /// Known variant, or the type's default (its `Unknown` variant).
    pub fn variant<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        let value = Value::deserialize(d)?;
        Ok(serde_json::from_value(value.clone()).unwrap_or_else(|_| {
            debug!(value = %value, "Unknown enum value");
            T::default()
        }))
    }
}

/// Health classification of a hospital network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    Active,
    Warning,
    Critical,
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreachSeverity {
    Warning,
    Critical,
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Hospital,
    CollectionCenter,
    RegionalHospital,
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalPriority {
    High,
    Normal,
    Low,
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Error,
    Warning,
    Info,
    Success,
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
    #[default]
    Unknown,
}

/// `system_metrics_updated`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SystemMetrics {
    #[serde(deserialize_with = "lenient::u64")]
    pub total_active_orders: u64,
    #[serde(deserialize_with = "lenient::u64")]
    pub online_riders: u64,
    #[serde(deserialize_with = "lenient::u64")]
    pub hospital_networks: u64,
    #[serde(deserialize_with = "lenient::f64")]
    pub system_health: f64,
}

/// `network_status_changed`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkStatusUpdate {
    #[serde(deserialize_with = "lenient::string")]
    pub network_id: String,
    #[serde(deserialize_with = "lenient::variant")]
    pub status: NetworkStatus,
    #[serde(deserialize_with = "lenient::u64")]
    pub active_orders: u64,
    #[serde(deserialize_with = "lenient::u64")]
    pub riders_online: u64,
}

/// `sla_breach_detected`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlaBreach {
    #[serde(deserialize_with = "lenient::string")]
    pub order_id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub network_id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub breach_type: String,
    #[serde(deserialize_with = "lenient::variant")]
    pub severity: BreachSeverity,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `sla_metrics_updated`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlaMetrics {
    #[serde(deserialize_with = "lenient::f64")]
    pub national_compliance: f64,
    #[serde(deserialize_with = "lenient::u64")]
    pub system_alerts: u64,
    #[serde(deserialize_with = "lenient::f64")]
    pub avg_delivery_time: f64,
    #[serde(deserialize_with = "lenient::u64")]
    pub sla_breaches_today: u64,
}

/// `new_approval_request`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApprovalRequest {
    #[serde(rename = "type", deserialize_with = "lenient::variant")]
    pub kind: ApprovalKind,
    #[serde(deserialize_with = "lenient::string")]
    pub item_id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub applicant_name: String,
    #[serde(deserialize_with = "lenient::variant")]
    pub priority: ApprovalPriority,
}

/// `approval_processed`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApprovalProcessed {
    #[serde(rename = "type", deserialize_with = "lenient::variant")]
    pub kind: ApprovalKind,
    #[serde(deserialize_with = "lenient::string")]
    pub item_id: String,
    #[serde(deserialize_with = "lenient::variant")]
    pub status: ApprovalDecision,
    #[serde(deserialize_with = "lenient::string")]
    pub processed_by: String,
}

/// `payment_received`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Payment {
    #[serde(deserialize_with = "lenient::string")]
    pub network_id: String,
    #[serde(deserialize_with = "lenient::f64")]
    pub amount: f64,
    #[serde(deserialize_with = "lenient::string")]
    pub currency: String,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `invoice_generated`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Invoice {
    #[serde(deserialize_with = "lenient::string")]
    pub network_id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub invoice_id: String,
    #[serde(deserialize_with = "lenient::f64")]
    pub amount: f64,
    #[serde(deserialize_with = "lenient::string")]
    pub due_date: String,
}

/// `system_alert_triggered`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SystemAlert {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "lenient::variant")]
    pub kind: AlertKind,
    #[serde(deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(deserialize_with = "lenient::string")]
    pub message: String,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::string")]
    pub source: String,
    #[serde(deserialize_with = "lenient::variant")]
    pub severity: AlertSeverity,
}

/// `performance_threshold_exceeded`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceAlert {
    #[serde(deserialize_with = "lenient::string")]
    pub metric: String,
    #[serde(deserialize_with = "lenient::f64")]
    pub current_value: f64,
    #[serde(deserialize_with = "lenient::f64")]
    pub threshold: f64,
    #[serde(deserialize_with = "lenient::opt_string")]
    pub region: Option<String>,
    #[serde(deserialize_with = "lenient::opt_string")]
    pub network_id: Option<String>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A decoded event from one of the monitored channels.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    SystemMetrics(SystemMetrics),
    NetworkStatus(NetworkStatusUpdate),
    SlaBreach(SlaBreach),
    SlaMetrics(SlaMetrics),
    ApprovalRequest(ApprovalRequest),
    ApprovalProcessed(ApprovalProcessed),
    Payment(Payment),
    Invoice(Invoice),
    SystemAlert(SystemAlert),
    PerformanceAlert(PerformanceAlert),
}

impl FeedEvent {
    /// Decode `payload` received on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Protocol`] if the payload is not a JSON object.
    pub fn decode(channel: Channel, payload: &serde_json::Value) -> FeedResult<Self> {
        if !payload.is_object() {
            return Err(FeedError::protocol(format!(
                "{channel} payload is not an object"
            )));
        }
        let value = payload.clone();
        let event = match channel {
            Channel::SystemMetricsUpdated => Self::SystemMetrics(serde_json::from_value(value)?),
            Channel::NetworkStatusChanged => Self::NetworkStatus(serde_json::from_value(value)?),
            Channel::SlaBreachDetected => Self::SlaBreach(serde_json::from_value(value)?),
            Channel::SlaMetricsUpdated => Self::SlaMetrics(serde_json::from_value(value)?),
            Channel::NewApprovalRequest => Self::ApprovalRequest(serde_json::from_value(value)?),
            Channel::ApprovalProcessed => Self::ApprovalProcessed(serde_json::from_value(value)?),
            Channel::PaymentReceived => Self::Payment(serde_json::from_value(value)?),
            Channel::InvoiceGenerated => Self::Invoice(serde_json::from_value(value)?),
            Channel::SystemAlertTriggered => Self::SystemAlert(serde_json::from_value(value)?),
            Channel::PerformanceThresholdExceeded => {
                Self::PerformanceAlert(serde_json::from_value(value)?)
            }
        };
        Ok(event)
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::SystemMetrics(_) => Channel::SystemMetricsUpdated,
            Self::NetworkStatus(_) => Channel::NetworkStatusChanged,
            Self::SlaBreach(_) => Channel::SlaBreachDetected,
            Self::SlaMetrics(_) => Channel::SlaMetricsUpdated,
            Self::ApprovalRequest(_) => Channel::NewApprovalRequest,
            Self::ApprovalProcessed(_) => Channel::ApprovalProcessed,
            Self::Payment(_) => Channel::PaymentReceived,
            Self::Invoice(_) => Channel::InvoiceGenerated,
            Self::SystemAlert(_) => Channel::SystemAlertTriggered,
            Self::PerformanceAlert(_) => Channel::PerformanceThresholdExceeded,
        }
    }

    /// Timestamp carried by the payload itself, if any.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::SlaBreach(p) => p.timestamp,
            Self::Payment(p) => p.timestamp,
            Self::SystemAlert(p) => p.timestamp,
            Self::PerformanceAlert(p) => p.timestamp,
            _ => None,
        }
    }
}

/// A retained event: category, payload and timing.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord<T> {
    pub category: Channel,
    pub payload: T,
    pub received_at: DateTime<Utc>,
    /// Payload timestamp, or the arrival time when the payload has none.
    pub timestamp: DateTime<Utc>,
}

impl<T> EventRecord<T> {
    pub fn new(
        category: Channel,
        payload: T,
        timestamp: Option<DateTime<Utc>>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            category,
            payload,
            received_at,
            timestamp: timestamp.unwrap_or(received_at),
        }
    }
}
