//! Console feed configuration.

use std::time::Duration;

use crate::reconnect::BackoffConfig;

/// Configuration for the console feed.
///
/// Builder-style: start from [`FeedConfig::new`] (or `Default`) and chain
/// setters. The reconnect, handshake and refresh defaults are provisional
/// values awaiting product sign-off.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    // Endpoints
    /// Event source (WebSocket) URL.
    pub url: String,
    /// Base URL of the authentication API.
    pub api_base_url: String,
    /// Timeout for authentication API requests.
    pub request_timeout: Duration,

    // Connection
    /// Maximum time to wait for the join acknowledgment.
    pub handshake_timeout: Duration,
    /// Initial delay before the first reconnection attempt.
    pub reconnect_initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub reconnect_max_delay: Duration,
    /// Backoff multiplier for reconnection delays.
    pub reconnect_backoff_factor: f64,
    /// Random jitter factor (0.0–1.0) for reconnection delays.
    pub reconnect_jitter: f64,
    /// Consecutive connection failures before the user is alerted.
    pub failure_alert_threshold: u32,

    // Session
    /// Elevated sessions with less remaining lifetime than this get a
    /// scheduled refresh.
    pub refresh_threshold: Duration,
    /// How long before expiry the scheduled refresh fires.
    pub refresh_lead: Duration,
    /// Minimum spacing between consecutive refresh attempts.
    pub min_refresh_interval: Duration,

    // Buffers
    /// Retained SLA breaches.
    pub breach_capacity: usize,
    /// Retained system alerts.
    pub alert_capacity: usize,
    /// Retained performance alerts.
    pub performance_alert_capacity: usize,
    /// Retained payments.
    pub payment_capacity: usize,
    /// Retained invoices.
    pub invoice_capacity: usize,

    // Aggregation
    /// Trailing window in which a performance alert counts as active.
    pub performance_window: Duration,
    /// Pending approvals above this count need attention.
    pub attention_pending_threshold: usize,
    /// Interval at which the snapshot is re-evaluated without new events.
    pub reevaluation_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_base_url: String::new(),
            request_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_backoff_factor: 2.0,
            reconnect_jitter: 0.0,
            failure_alert_threshold: 5,
            refresh_threshold: Duration::from_secs(60 * 60),
            refresh_lead: Duration::from_secs(5 * 60),
            min_refresh_interval: Duration::from_secs(30),
            breach_capacity: 50,
            alert_capacity: 100,
            performance_alert_capacity: 20,
            payment_capacity: 50,
            invoice_capacity: 50,
            performance_window: Duration::from_secs(5 * 60),
            attention_pending_threshold: 10,
            reevaluation_interval: Duration::from_secs(30),
        }
    }
}

impl FeedConfig {
    /// Create a new configuration with the given event source URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the authentication API base URL.
    #[must_use]
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Set the authentication API request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the initial reconnection delay.
    #[must_use]
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay = delay;
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the reconnection backoff factor.
    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the reconnection jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Set the number of consecutive failures before alerting the user.
    #[must_use]
    pub fn failure_alert_threshold(mut self, failures: u32) -> Self {
        self.failure_alert_threshold = failures;
        self
    }

    /// Set the refresh threshold for elevated sessions.
    #[must_use]
    pub fn refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Set how long before expiry a scheduled refresh fires.
    #[must_use]
    pub fn refresh_lead(mut self, lead: Duration) -> Self {
        self.refresh_lead = lead;
        self
    }

    /// Set the minimum spacing between consecutive refresh attempts.
    #[must_use]
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Set the SLA breach buffer capacity.
    #[must_use]
    pub fn breach_capacity(mut self, capacity: usize) -> Self {
        self.breach_capacity = capacity;
        self
    }

    /// Set the system alert buffer capacity.
    #[must_use]
    pub fn alert_capacity(mut self, capacity: usize) -> Self {
        self.alert_capacity = capacity;
        self
    }

    /// Set the performance alert buffer capacity.
    #[must_use]
    pub fn performance_alert_capacity(mut self, capacity: usize) -> Self {
        self.performance_alert_capacity = capacity;
        self
    }

    /// Set the payment buffer capacity.
    #[must_use]
    pub fn payment_capacity(mut self, capacity: usize) -> Self {
        self.payment_capacity = capacity;
        self
    }

    /// Set the invoice buffer capacity.
    #[must_use]
    pub fn invoice_capacity(mut self, capacity: usize) -> Self {
        self.invoice_capacity = capacity;
        self
    }

    /// Set the trailing window for active performance alerts.
    #[must_use]
    pub fn performance_window(mut self, window: Duration) -> Self {
        self.performance_window = window;
        self
    }

    /// Set the pending-approval count above which attention is needed.
    #[must_use]
    pub fn attention_pending_threshold(mut self, threshold: usize) -> Self {
        self.attention_pending_threshold = threshold;
        self
    }

    /// Set the snapshot re-evaluation interval.
    #[must_use]
    pub fn reevaluation_interval(mut self, interval: Duration) -> Self {
        self.reevaluation_interval = interval;
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_initial_delay,
            max_delay: self.reconnect_max_delay,
            factor: self.reconnect_backoff_factor,
            jitter: self.reconnect_jitter,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("Request timeout must be > 0".to_string());
        }
        if self.handshake_timeout.is_zero() {
            return Err("Handshake timeout must be > 0".to_string());
        }
        self.backoff().validate()?;
        if self.min_refresh_interval.is_zero() {
            return Err("Minimum refresh interval must be > 0".to_string());
        }
        if self.failure_alert_threshold == 0 {
            return Err("Failure alert threshold must be > 0".to_string());
        }
        let capacities = [
            self.breach_capacity,
            self.alert_capacity,
            self.performance_alert_capacity,
            self.payment_capacity,
            self.invoice_capacity,
        ];
        if capacities.contains(&0) {
            return Err("Buffer capacities must be > 0".to_string());
        }
        if self.reevaluation_interval.is_zero() {
            return Err("Re-evaluation interval must be > 0".to_string());
        }
        Ok(())
    }
}
