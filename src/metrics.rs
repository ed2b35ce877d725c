use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub operation: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResponseLabels {
    pub allowed: &'static str,
    pub mutated: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
    pub decision: &'static str,
}

/// Outcome of the mutation pipeline for a single request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Skipped,
    Patched,
    NoTarget,
    Error,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Skipped => "skipped",
            Decision::Patched => "patched",
            Decision::NoTarget => "no_target",
            Decision::Error => "error",
        }
    }
}

pub struct InjectorMetrics {
    pub admission_requests_total: Family<RequestLabels, Counter>,
    pub admission_responses_total: Family<ResponseLabels, Counter>,
    pub mutation_decisions_total: Family<DecisionLabels, Counter>,
    pub admission_request_duration_seconds: Histogram,
}

const DURATION_BUCKETS: [f64; 12] = [
    0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0,
];

impl InjectorMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let admission_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "injector_admission_requests",
            "Total number of admission requests decoded",
            admission_requests_total.clone(),
        );

        let admission_responses_total = Family::<ResponseLabels, Counter>::default();
        registry.register(
            "injector_admission_responses",
            "Total number of admission responses sent",
            admission_responses_total.clone(),
        );

        let mutation_decisions_total = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "injector_mutation_decisions",
            "Total number of mutation decisions by outcome",
            mutation_decisions_total.clone(),
        );

        let admission_request_duration_seconds = Histogram::new(DURATION_BUCKETS.iter().copied());
        registry.register(
            "injector_admission_request_duration_seconds",
            "Duration of admission request processing in seconds",
            admission_request_duration_seconds.clone(),
        );

        Self {
            admission_requests_total,
            admission_responses_total,
            mutation_decisions_total,
            admission_request_duration_seconds,
        }
    }

    pub fn record_request(&self, operation: String) {
        self.admission_requests_total
            .get_or_create(&RequestLabels { operation })
            .inc();
    }

    pub fn record_response(&self, allowed: bool, mutated: bool) {
        self.admission_responses_total
            .get_or_create(&ResponseLabels {
                allowed: if allowed { "true" } else { "false" },
                mutated: if mutated { "true" } else { "false" },
            })
            .inc();
    }

    pub fn record_decision(&self, decision: Decision) {
        self.mutation_decisions_total
            .get_or_create(&DecisionLabels {
                decision: decision.as_str(),
            })
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use prometheus_client::encoding::text::encode;

    use super::*;

    #[test]
    fn test_counters_are_exported() {
        let mut registry = Registry::default();
        let metrics = InjectorMetrics::new(&mut registry);

        metrics.record_request("CREATE".to_string());
        metrics.record_decision(Decision::Patched);
        metrics.record_response(true, true);

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();

        assert!(buffer.contains(r#"injector_admission_requests_total{operation="CREATE"} 1"#));
        assert!(buffer.contains(r#"injector_mutation_decisions_total{decision="patched"} 1"#));
        assert!(
            buffer.contains(r#"injector_admission_responses_total{allowed="true",mutated="true"} 1"#)
        );
    }
}
