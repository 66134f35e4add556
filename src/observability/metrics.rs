use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub claims_total: IntCounterVec,
    pub claim_latency_seconds: HistogramVec,
    pub broadcasts_opened_total: IntCounter,
    pub broadcasts_expired_total: IntCounter,
    pub manual_assignments_total: IntCounter,
    pub cancellations_total: IntCounter,
    pub open_broadcasts: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            Opts::new("dispatch_claims_total", "Claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_claims_total metric");

        let claim_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_claim_latency_seconds",
                "Latency of claim arbitration in seconds",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["outcome"],
        )
        .expect("valid dispatch_claim_latency_seconds metric");

        let broadcasts_opened_total = IntCounter::new(
            "dispatch_broadcasts_opened_total",
            "Orders marked ready and broadcast to couriers",
        )
        .expect("valid dispatch_broadcasts_opened_total metric");

        let broadcasts_expired_total = IntCounter::new(
            "dispatch_broadcasts_expired_total",
            "Broadcasts that elapsed without a claim",
        )
        .expect("valid dispatch_broadcasts_expired_total metric");

        let manual_assignments_total = IntCounter::new(
            "dispatch_manual_assignments_total",
            "Orders assigned by restaurant staff after expiry",
        )
        .expect("valid dispatch_manual_assignments_total metric");

        let cancellations_total =
            IntCounter::new("dispatch_cancellations_total", "Orders cancelled")
                .expect("valid dispatch_cancellations_total metric");

        let open_broadcasts = IntGauge::new(
            "dispatch_open_broadcasts",
            "Orders currently open for claims",
        )
        .expect("valid dispatch_open_broadcasts metric");

        registry
            .register(Box::new(claims_total.clone()))
            .expect("register dispatch_claims_total");
        registry
            .register(Box::new(claim_latency_seconds.clone()))
            .expect("register dispatch_claim_latency_seconds");
        registry
            .register(Box::new(broadcasts_opened_total.clone()))
            .expect("register dispatch_broadcasts_opened_total");
        registry
            .register(Box::new(broadcasts_expired_total.clone()))
            .expect("register dispatch_broadcasts_expired_total");
        registry
            .register(Box::new(manual_assignments_total.clone()))
            .expect("register dispatch_manual_assignments_total");
        registry
            .register(Box::new(cancellations_total.clone()))
            .expect("register dispatch_cancellations_total");
        registry
            .register(Box::new(open_broadcasts.clone()))
            .expect("register dispatch_open_broadcasts");

        Self {
            registry,
            claims_total,
            claim_latency_seconds,
            broadcasts_opened_total,
            broadcasts_expired_total,
            manual_assignments_total,
            cancellations_total,
            open_broadcasts,
        }
    }

    pub fn observe_claim(&self, outcome: &str, elapsed_secs: f64) {
        self.claims_total.with_label_values(&[outcome]).inc();
        self.claim_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed_secs);
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

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn claim_outcomes_are_exported_by_label() {
        let metrics = Metrics::new();
        metrics.observe_claim("claimed", 0.0002);
        metrics.observe_claim("already_claimed", 0.0001);

        let body = metrics.encode().unwrap();
        assert!(body.contains("dispatch_claims_total{outcome=\"claimed\"} 1"));
        assert!(body.contains("dispatch_claims_total{outcome=\"already_claimed\"} 1"));
    }
}
