//! Prometheus adapter for pipeline outcome metrics.
//!
//! Counters are registered with the registry owned by `actix-web-prom` so they
//! appear on the same `/metrics` endpoint as the HTTP request metrics.

use async_trait::async_trait;
use prometheus::{CounterVec, Opts, Registry};

use crate::domain::ports::{SyncMetrics, SyncMetricsError};

/// Prometheus-backed pipeline metrics recorder.
///
/// # Metric Specification
///
/// - `mailpush_webhook_deliveries_total{outcome}`: one per webhook response
///   (`applied`, `noop`, `duplicate`, `skipped`, `unknown_mailbox`,
///   `resync_required`, `failed`, ...).
/// - `mailpush_reconcile_passes_total{outcome}`: one per reconciliation pass.
/// - `mailpush_events_published_total{result}`: `delivered` or `failed`.
pub struct PrometheusSyncMetrics {
    deliveries_total: CounterVec,
    reconcile_total: CounterVec,
    published_total: CounterVec,
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    label: &str,
) -> Result<CounterVec, prometheus::Error> {
    let counter = CounterVec::new(Opts::new(name, help), &[label])?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl PrometheusSyncMetrics {
    /// Create and register the counters with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a counter with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            deliveries_total: counter(
                registry,
                "mailpush_webhook_deliveries_total",
                "Webhook deliveries by response outcome",
                "outcome",
            )?,
            reconcile_total: counter(
                registry,
                "mailpush_reconcile_passes_total",
                "History reconciliation passes by outcome",
                "outcome",
            )?,
            published_total: counter(
                registry,
                "mailpush_events_published_total",
                "Change events published to user topics",
                "result",
            )?,
        })
    }
}

#[async_trait]
impl SyncMetrics for PrometheusSyncMetrics {
    async fn record_delivery(&self, outcome: &str) -> Result<(), SyncMetricsError> {
        self.deliveries_total.with_label_values(&[outcome]).inc();
        Ok(())
    }

    async fn record_reconcile(&self, outcome: &str) -> Result<(), SyncMetricsError> {
        self.reconcile_total.with_label_values(&[outcome]).inc();
        Ok(())
    }

    async fn record_publish(&self, delivered: bool) -> Result<(), SyncMetricsError> {
        let result = if delivered { "delivered" } else { "failed" };
        self.published_total.with_label_values(&[result]).inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> (Registry, PrometheusSyncMetrics) {
        let registry = Registry::new();
        let metrics =
            PrometheusSyncMetrics::new(&registry).expect("metric registration should succeed");
        (registry, metrics)
    }

    #[tokio::test]
    async fn registers_all_counters() {
        let (registry, metrics) = metrics();
        metrics.record_delivery("applied").await.expect("recorded");
        metrics.record_reconcile("noop").await.expect("recorded");
        metrics.record_publish(true).await.expect("recorded");

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.name().to_owned())
            .collect();
        for expected in [
            "mailpush_webhook_deliveries_total",
            "mailpush_reconcile_passes_total",
            "mailpush_events_published_total",
        ] {
            assert!(names.iter().any(|name| name == expected), "{expected} missing");
        }
    }

    #[tokio::test]
    async fn publish_results_are_split_by_label() {
        let (_registry, metrics) = metrics();
        metrics.record_publish(true).await.expect("recorded");
        metrics.record_publish(false).await.expect("recorded");
        metrics.record_publish(false).await.expect("recorded");

        let delivered = metrics.published_total.with_label_values(&["delivered"]).get();
        let failed = metrics.published_total.with_label_values(&["failed"]).get();
        assert_eq!(delivered as u64, 1);
        assert_eq!(failed as u64, 2);
    }

    #[test]
    fn duplicate_registration_fails() {
        let (registry, _metrics) = metrics();
        assert!(PrometheusSyncMetrics::new(&registry).is_err());
    }
}
