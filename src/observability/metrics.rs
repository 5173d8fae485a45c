use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub courier_assignments_total: IntCounterVec,
    pub position_writes_total: IntCounterVec,
    pub realtime_connections: IntGauge,
    pub realtime_events_dropped: IntCounter,
    pub dispatch_query_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order status transitions by outcome"),
            &["outcome"],
        )
        .expect("valid order_transitions_total metric");

        let courier_assignments_total = IntCounterVec::new(
            Opts::new(
                "courier_assignments_total",
                "Courier assignment attempts by outcome",
            ),
            &["outcome"],
        )
        .expect("valid courier_assignments_total metric");

        let position_writes_total = IntCounterVec::new(
            Opts::new("position_writes_total", "Courier position samples stored"),
            &["kind"],
        )
        .expect("valid position_writes_total metric");

        let realtime_connections =
            IntGauge::new("realtime_connections", "Currently open realtime connections")
                .expect("valid realtime_connections metric");

        let realtime_events_dropped = IntCounter::new(
            "realtime_events_dropped_total",
            "Realtime messages dropped on full or closed subscriber queues",
        )
        .expect("valid realtime_events_dropped_total metric");

        let dispatch_query_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_query_seconds",
                "Latency of nearby-job and nearby-vendor queries in seconds",
            ),
            &["query"],
        )
        .expect("valid dispatch_query_seconds metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(courier_assignments_total.clone()))
            .expect("register courier_assignments_total");
        registry
            .register(Box::new(position_writes_total.clone()))
            .expect("register position_writes_total");
        registry
            .register(Box::new(realtime_connections.clone()))
            .expect("register realtime_connections");
        registry
            .register(Box::new(realtime_events_dropped.clone()))
            .expect("register realtime_events_dropped_total");
        registry
            .register(Box::new(dispatch_query_seconds.clone()))
            .expect("register dispatch_query_seconds");

        Self {
            registry,
            order_transitions_total,
            courier_assignments_total,
            position_writes_total,
            realtime_connections,
            realtime_events_dropped,
            dispatch_query_seconds,
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

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
