//! Domain port for recording pipeline outcomes.
//!
//! Implementations may export to Prometheus or discard metrics in tests.

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors exposed when recording pipeline metrics.
    pub enum SyncMetricsError {
        /// Metric exporter rejected the write.
        Export { message: String } => "sync metrics exporter failed: {message}",
    }
}

/// Metrics recording port for webhook, reconciliation and publish outcomes.
#[async_trait]
pub trait SyncMetrics: Send + Sync {
    /// Record how one webhook delivery was answered (for example `applied`).
    async fn record_delivery(&self, outcome: &str) -> Result<(), SyncMetricsError>;

    /// Record one reconciliation pass result (`applied`, `noop`, `stale_cursor`, `failed`).
    async fn record_reconcile(&self, outcome: &str) -> Result<(), SyncMetricsError>;

    /// Record one publish attempt.
    async fn record_publish(&self, delivered: bool) -> Result<(), SyncMetricsError>;
}

/// No-op implementation for when metrics are disabled or in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSyncMetrics;

#[async_trait]
impl SyncMetrics for NoOpSyncMetrics {
    async fn record_delivery(&self, _outcome: &str) -> Result<(), SyncMetricsError> {
        Ok(())
    }

    async fn record_reconcile(&self, _outcome: &str) -> Result<(), SyncMetricsError> {
        Ok(())
    }

    async fn record_publish(&self, _delivered: bool) -> Result<(), SyncMetricsError> {
        Ok(())
    }
}
