use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub claim_conflicts_total: IntCounter,
    pub orders_total: IntCounterVec,
    pub events_redelivered_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assignment processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let claim_conflicts_total = IntCounter::new(
            "claim_conflicts_total",
            "Claims lost to a concurrent assignment",
        )
        .expect("valid claim_conflicts_total metric");

        let orders_total = IntCounterVec::new(
            Opts::new("orders_total", "Order state transitions by resulting status"),
            &["status"],
        )
        .expect("valid orders_total metric");

        let events_redelivered_total = IntCounterVec::new(
            Opts::new(
                "events_redelivered_total",
                "Events left uncommitted after a dependency failure",
            ),
            &["topic"],
        )
        .expect("valid events_redelivered_total metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(claim_conflicts_total.clone()))
            .expect("register claim_conflicts_total");
        registry
            .register(Box::new(orders_total.clone()))
            .expect("register orders_total");
        registry
            .register(Box::new(events_redelivered_total.clone()))
            .expect("register events_redelivered_total");

        Self {
            registry,
            assignments_total,
            assignment_latency_seconds,
            claim_conflicts_total,
            orders_total,
            events_redelivered_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
