use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus metrics for the scheduler
pub struct SchedulerMetrics {
    pub registry: Registry,

    // Scene lifecycle
    pub scenes_active: IntGauge,
    pub scenes_finalized_total: IntCounter,
    pub finalize_duration: Histogram,

    // Worker metrics
    pub workers_connected: IntGauge,

    // Unit flow
    pub units_assigned_total: IntCounter,
    pub units_completed_total: IntCounter,
    pub units_requeued_total: IntCounterVec,
    pub results_discarded_total: IntCounterVec,
}

impl SchedulerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let scenes_active = IntGauge::new("tf_scenes_active", "Number of scenes being rendered")?;
        registry.register(Box::new(scenes_active.clone()))?;

        let scenes_finalized_total =
            IntCounter::new("tf_scenes_finalized_total", "Total number of finalized scenes")?;
        registry.register(Box::new(scenes_finalized_total.clone()))?;

        let finalize_duration = Histogram::with_opts(HistogramOpts::new(
            "tf_finalize_duration_seconds",
            "Time spent assembling and writing a finished scene",
        ))?;
        registry.register(Box::new(finalize_duration.clone()))?;

        let workers_connected =
            IntGauge::new("tf_workers_connected", "Number of workers joined to a scene")?;
        registry.register(Box::new(workers_connected.clone()))?;

        let units_assigned_total =
            IntCounter::new("tf_units_assigned_total", "Total number of unit assignments")?;
        registry.register(Box::new(units_assigned_total.clone()))?;

        let units_completed_total =
            IntCounter::new("tf_units_completed_total", "Total number of accepted unit results")?;
        registry.register(Box::new(units_completed_total.clone()))?;

        let units_requeued_total = IntCounterVec::new(
            Opts::new("tf_units_requeued_total", "Units put back on the pending queue by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(units_requeued_total.clone()))?;

        let results_discarded_total = IntCounterVec::new(
            Opts::new("tf_results_discarded_total", "Unit results dropped by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(results_discarded_total.clone()))?;

        Ok(SchedulerMetrics {
            registry,
            scenes_active,
            scenes_finalized_total,
            finalize_duration,
            workers_connected,
            units_assigned_total,
            units_completed_total,
            units_requeued_total,
            results_discarded_total,
        })
    }

    pub fn inc_requeued(&self, reason: &str) {
        self.units_requeued_total.with_label_values(&[reason]).inc();
    }

    pub fn inc_discarded(&self, reason: &str) {
        self.results_discarded_total.with_label_values(&[reason]).inc();
    }

    pub fn requeued(&self, reason: &str) -> u64 {
        self.units_requeued_total.with_label_values(&[reason]).get()
    }

    pub fn discarded(&self, reason: &str) -> u64 {
        self.results_discarded_total.with_label_values(&[reason]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_counters() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.inc_requeued("timeout");
        metrics.inc_requeued("timeout");
        metrics.inc_discarded("duplicate");

        assert_eq!(metrics.requeued("timeout"), 2);
        assert_eq!(metrics.requeued("leave"), 0);
        assert_eq!(metrics.discarded("duplicate"), 1);
        assert!(!metrics.registry.gather().is_empty());
    }
}
