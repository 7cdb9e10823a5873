//! Prometheus metrics for messaging

use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry};

/// Messaging metrics
pub struct MessagingMetrics {
    /// Messages accepted by a transport
    pub messages_sent: CounterVec,

    /// Sends that failed after their retry tier was exhausted
    pub send_failures: CounterVec,

    /// Retries performed, by policy
    pub retry_attempts: CounterVec,

    /// Deliveries handed to handlers
    pub deliveries: CounterVec,

    /// Successful settlements, by outcome
    pub settlements: CounterVec,

    /// Bodies that failed to decode
    pub decode_failures: CounterVec,

    /// Entities created by the topology manager
    pub entities_created: CounterVec,

    /// Requests currently awaiting a reply
    pub pending_requests: IntGauge,

    /// Time from request send to reply resolution
    pub request_duration: HistogramVec,
}

impl MessagingMetrics {
    fn new() -> Self {
        Self {
            messages_sent: CounterVec::new(
                Opts::new("messages_sent_total", "Total number of messages sent")
                    .namespace("relay_bus"),
                &["entity"],
            )
            .expect("Failed to create messages_sent_total metric"),

            send_failures: CounterVec::new(
                Opts::new("send_failures_total", "Total number of failed sends")
                    .namespace("relay_bus"),
                &["entity", "error"],
            )
            .expect("Failed to create send_failures_total metric"),

            retry_attempts: CounterVec::new(
                Opts::new("retry_attempts_total", "Total number of retries performed")
                    .namespace("relay_bus"),
                &["policy"],
            )
            .expect("Failed to create retry_attempts_total metric"),

            deliveries: CounterVec::new(
                Opts::new("deliveries_total", "Total number of deliveries handed to handlers")
                    .namespace("relay_bus"),
                &["entity"],
            )
            .expect("Failed to create deliveries_total metric"),

            settlements: CounterVec::new(
                Opts::new("settlements_total", "Total number of settled deliveries")
                    .namespace("relay_bus"),
                &["entity", "outcome"],
            )
            .expect("Failed to create settlements_total metric"),

            decode_failures: CounterVec::new(
                Opts::new("decode_failures_total", "Total number of undecodable bodies")
                    .namespace("relay_bus"),
                &["entity"],
            )
            .expect("Failed to create decode_failures_total metric"),

            entities_created: CounterVec::new(
                Opts::new("entities_created_total", "Total number of provisioned entities")
                    .namespace("relay_bus"),
                &["kind"],
            )
            .expect("Failed to create entities_created_total metric"),

            pending_requests: IntGauge::with_opts(
                Opts::new("pending_requests", "Requests awaiting a reply").namespace("relay_bus"),
            )
            .expect("Failed to create pending_requests metric"),

            request_duration: HistogramVec::new(
                HistogramOpts::new(
                    "request_duration_seconds",
                    "Time from request send to reply resolution",
                )
                .namespace("relay_bus")
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                    60.0,
                ]),
                &["outcome"],
            )
            .expect("Failed to create request_duration_seconds metric"),
        }
    }
}

lazy_static! {
    /// Global messaging metrics instance
    pub static ref MESSAGING_METRICS: MessagingMetrics = MessagingMetrics::new();
}

/// Register messaging metrics with a Prometheus registry
pub fn init_messaging_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(MESSAGING_METRICS.messages_sent.clone()))?;
    registry.register(Box::new(MESSAGING_METRICS.send_failures.clone()))?;
    registry.register(Box::new(MESSAGING_METRICS.retry_attempts.clone()))?;
    registry.register(Box::new(MESSAGING_METRICS.deliveries.clone()))?;
    registry.register(Box::new(MESSAGING_METRICS.settlements.clone()))?;
    registry.register(Box::new(MESSAGING_METRICS.decode_failures.clone()))?;
    registry.register(Box::new(MESSAGING_METRICS.entities_created.clone()))?;
    registry.register(Box::new(MESSAGING_METRICS.pending_requests.clone()))?;
    registry.register(Box::new(MESSAGING_METRICS.request_duration.clone()))?;

    tracing::info!("Messaging metrics initialized");
    Ok(())
}
