use prometheus::{
    Counter, Gauge, Histogram, Encoder, TextEncoder,
    register_counter, register_gauge, register_histogram,
};
use lazy_static::lazy_static;

lazy_static! {
    // Read metrics
    pub static ref CALLS: Counter = register_counter!(
        "superchain_calls_total",
        "Read-only contract calls issued"
    ).unwrap();

    pub static ref FAILED_CALLS: Counter = register_counter!(
        "superchain_failed_calls_total",
        "Read-only contract calls that failed"
    ).unwrap();

    // Transaction metrics
    pub static ref TRANSACTION_LATENCY: Histogram = register_histogram!(
        "superchain_transaction_latency_seconds",
        "Time from signing to receipt in seconds",
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 15.0]
    ).unwrap();

    pub static ref SUCCESSFUL_TRANSACTIONS: Counter = register_counter!(
        "superchain_successful_transactions_total",
        "Transactions included with a successful status"
    ).unwrap();

    pub static ref FAILED_TRANSACTIONS: Counter = register_counter!(
        "superchain_failed_transactions_total",
        "Transactions that failed to submit, were dropped or reverted"
    ).unwrap();

    pub static ref DEPLOYMENTS: Counter = register_counter!(
        "superchain_deployments_total",
        "Contract deployments submitted by this process"
    ).unwrap();

    // Observer metrics
    pub static ref POLL_ATTEMPTS: Counter = register_counter!(
        "superchain_poll_attempts_total",
        "Predicate evaluations made while waiting for cross-chain effects"
    ).unwrap();

    pub static ref LOGS_DELIVERED: Counter = register_counter!(
        "superchain_logs_delivered_total",
        "Event logs handed to subscription callbacks"
    ).unwrap();

    pub static ref ACTIVE_SUBSCRIPTIONS: Gauge = register_gauge!(
        "superchain_active_subscriptions",
        "Event subscriptions that have not been cancelled"
    ).unwrap();
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn increment_call(&self) {
        CALLS.inc();
    }

    pub fn increment_failed_call(&self) {
        FAILED_CALLS.inc();
    }

    pub fn record_transaction_latency(&self, duration_secs: f64) {
        TRANSACTION_LATENCY.observe(duration_secs);
    }

    pub fn increment_successful_transaction(&self) {
        SUCCESSFUL_TRANSACTIONS.inc();
    }

    pub fn increment_failed_transaction(&self) {
        FAILED_TRANSACTIONS.inc();
    }

    pub fn increment_deployment(&self) {
        DEPLOYMENTS.inc();
    }

    pub fn increment_poll_attempt(&self) {
        POLL_ATTEMPTS.inc();
    }

    pub fn increment_logs_delivered(&self, count: usize) {
        LOGS_DELIVERED.inc_by(count as f64);
    }

    pub fn subscription_opened(&self) {
        ACTIVE_SUBSCRIPTIONS.inc();
    }

    pub fn subscription_closed(&self) {
        ACTIVE_SUBSCRIPTIONS.dec();
    }
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        log::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
