//! Prometheus export of registry statistics
//!
//! Metrics are refreshed from [`RegistryStats`] on every scrape rather than
//! updated on the hot path, so the registry itself stays free of any
//! metrics dependency.

use prometheus::{IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::{Arc, Mutex};
use unichat_realtime::RegistryStats;

/// Metrics error type
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Debug, Clone)]
pub struct RealtimeMetrics {
    registry: Registry,
    // Counters advance by read-then-add, so concurrent scrapes take turns
    refresh_lock: Arc<Mutex<()>>,
    connections: IntGauge,
    scopes: IntGauge,
    categories: IntGauge,
    registered_total: IntCounter,
    superseded_total: IntCounter,
    removed_total: IntCounter,
    evicted_total: IntCounter,
    delivered_total: IntCounter,
    failed_deliveries_total: IntCounter,
}

impl RealtimeMetrics {
    pub fn new(namespace: &str) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let gauge = |name: &str, help: &str| -> Result<IntGauge, MetricsError> {
            let gauge = IntGauge::with_opts(Opts::new(format!("{namespace}_{name}"), help))?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let counter = |name: &str, help: &str| -> Result<IntCounter, MetricsError> {
            let counter = IntCounter::with_opts(Opts::new(format!("{namespace}_{name}"), help))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            connections: gauge("connections", "Currently registered connections")?,
            scopes: gauge("scopes", "Non-empty category/entity buckets")?,
            categories: gauge("categories", "Categories with at least one subscriber")?,
            registered_total: counter(
                "connections_registered_total",
                "Connections successfully registered",
            )?,
            superseded_total: counter(
                "connections_superseded_total",
                "Connections replaced by a newer registration for the same key",
            )?,
            removed_total: counter(
                "connections_removed_total",
                "Connections removed explicitly, for example on logout",
            )?,
            evicted_total: counter(
                "connections_evicted_total",
                "Connections evicted by the liveness probe",
            )?,
            delivered_total: counter(
                "notifications_delivered_total",
                "Notification frames written to a transport",
            )?,
            failed_deliveries_total: counter(
                "notifications_failed_total",
                "Notification frames that could not be written",
            )?,
            registry: registry.clone(),
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Bring every metric in line with `stats`.
    pub fn refresh(&self, stats: &RegistryStats) {
        let _refreshing = self
            .refresh_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        self.connections.set(stats.connections as i64);
        self.scopes.set(stats.scopes as i64);
        self.categories.set(stats.categories as i64);

        advance(&self.registered_total, stats.registered_total);
        advance(&self.superseded_total, stats.superseded_total);
        advance(&self.removed_total, stats.removed_total);
        advance(&self.evicted_total, stats.evicted_total);
        advance(&self.delivered_total, stats.delivered_total);
        advance(&self.failed_deliveries_total, stats.failed_deliveries_total);
    }

    /// Render in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
