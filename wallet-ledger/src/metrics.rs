//! Prometheus metrics
//!
//! - `wallet_mutations_total{type, outcome}` - deposits/withdrawals by result
//! - `wallet_reconcile_runs_total{outcome}` - reconciler runs by result
//! - `wallet_reconcile_duration_seconds` - lock-held recompute + publish time
//! - `wallet_lock_contended_total` - runs abandoned because the lock was held
//! - `wallet_cache_lookups_total{result}` - balance cache hits/misses
//! - `wallet_reconcile_queue_dropped_total` - schedule requests the queue refused

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref MUTATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("wallet_mutations_total", "Deposits and withdrawals by outcome"),
        &["type", "outcome"]
    ).expect("metric can be created");

    pub static ref RECONCILE_RUNS: IntCounterVec = IntCounterVec::new(
        Opts::new("wallet_reconcile_runs_total", "Reconciler runs by outcome"),
        &["outcome"]
    ).expect("metric can be created");

    pub static ref RECONCILE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "wallet_reconcile_duration_seconds",
            "Time spent recomputing and publishing a balance"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("metric can be created");

    pub static ref LOCK_CONTENDED: IntCounter = IntCounter::new(
        "wallet_lock_contended_total",
        "Reconciler runs abandoned because another run held the lock"
    ).expect("metric can be created");

    pub static ref CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("wallet_cache_lookups_total", "Balance cache lookups by result"),
        &["result"]
    ).expect("metric can be created");

    pub static ref QUEUE_DROPPED: IntCounter = IntCounter::new(
        "wallet_reconcile_queue_dropped_total",
        "Reconcile requests dropped because the queue was full or closed"
    ).expect("metric can be created");

    static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_metrics(&registry).expect("metrics register once");
        registry
    };
}

/// Register all metrics with the given registry
pub fn register_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(MUTATIONS.clone()))?;
    registry.register(Box::new(RECONCILE_RUNS.clone()))?;
    registry.register(Box::new(RECONCILE_DURATION.clone()))?;
    registry.register(Box::new(LOCK_CONTENDED.clone()))?;
    registry.register(Box::new(CACHE_LOOKUPS.clone()))?;
    registry.register(Box::new(QUEUE_DROPPED.clone()))?;
    Ok(())
}

/// Render the crate's metrics in Prometheus text format
pub fn render() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let registry = Registry::new();
        assert!(register_metrics(&registry).is_ok());
    }

    #[test]
    fn test_render() {
        MUTATIONS.with_label_values(&["deposit", "success"]).inc();
        let output = render().unwrap();
        assert!(output.contains("wallet_mutations_total"));
    }
}
