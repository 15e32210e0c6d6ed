//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_top_ups_total` - successful top-ups
//! - `ledger_charges_total` - successful commits
//! - `ledger_reservations_total` - successful reservations
//! - `ledger_cancellations_total` - successful cancellations
//! - `ledger_not_enough_money_total` - mutations rejected for insufficient funds
//! - `ledger_mutation_duration_seconds` - histogram of mutation latencies

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry, Encoder, Histogram,
    HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry backing the collectors
    pub registry: Registry,

    /// Successful top-ups
    pub top_ups_total: IntCounter,

    /// Successful commits
    pub charges_total: IntCounter,

    /// Successful reservations
    pub reservations_total: IntCounter,

    /// Successful cancellations
    pub cancellations_total: IntCounter,

    /// Mutations rejected for insufficient funds
    pub not_enough_money_total: IntCounter,

    /// Mutation latency histogram
    pub mutation_duration: Histogram,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let top_ups_total = register_int_counter_with_registry!(
            Opts::new("ledger_top_ups_total", "Successful top-ups"),
            registry
        )?;
        let charges_total = register_int_counter_with_registry!(
            Opts::new("ledger_charges_total", "Successful commits"),
            registry
        )?;
        let reservations_total = register_int_counter_with_registry!(
            Opts::new("ledger_reservations_total", "Successful reservations"),
            registry
        )?;
        let cancellations_total = register_int_counter_with_registry!(
            Opts::new("ledger_cancellations_total", "Successful cancellations"),
            registry
        )?;
        let not_enough_money_total = register_int_counter_with_registry!(
            Opts::new(
                "ledger_not_enough_money_total",
                "Mutations rejected for insufficient funds"
            ),
            registry
        )?;
        let mutation_duration = register_histogram_with_registry!(
            HistogramOpts::new(
                "ledger_mutation_duration_seconds",
                "Histogram of mutation latencies"
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
            registry
        )?;

        Ok(Metrics {
            registry,
            top_ups_total,
            charges_total,
            reservations_total,
            cancellations_total,
            not_enough_money_total,
            mutation_duration,
        })
    }

    /// Export all metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_export() {
        let metrics = Metrics::new().unwrap();
        metrics.top_ups_total.inc();
        metrics.not_enough_money_total.inc();
        metrics.mutation_duration.observe(0.003);

        let exported = metrics.export().unwrap();
        assert!(exported.contains("ledger_top_ups_total 1"));
        assert!(exported.contains("ledger_not_enough_money_total 1"));
        assert!(exported.contains("ledger_mutation_duration_seconds"));
    }
}
