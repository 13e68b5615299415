use ports::secondary::metrics_port::{ProgramMetrics, ReconcileMetrics};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets_range};
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StageLabels {
    pub kind: String,
    pub stage: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SectionLabels {
    pub section: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SetLabels {
    pub set: String,
}

// ── Agent metrics registry ──────────────────────────────────────────

/// Prometheus metrics registry for the agent.
///
/// All metric families use interior mutability (atomics), so recording
/// only requires `&self`. Wrap in `Arc` for multi-task sharing.
pub struct AgentMetrics {
    registry: Registry,
    pub attaches_total: Family<SectionLabels, Counter>,
    pub apply_failures_total: Family<StageLabels, Counter>,
    pub apply_duration_seconds: Family<KindLabels, Histogram>,
    pub dirty_items: Family<SetLabels, Gauge>,
    pub workloads_cached: Gauge,
}

impl AgentMetrics {
    /// Create a new registry with all metrics registered under the
    /// `bpfplane` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("bpfplane");

        let attaches_total = Family::<SectionLabels, Counter>::default();
        registry.register(
            "attaches",
            "Successful tc program attaches by section",
            attaches_total.clone(),
        );

        let apply_failures_total = Family::<StageLabels, Counter>::default();
        registry.register(
            "apply_failures",
            "Failed program applies by endpoint kind and stage",
            apply_failures_total.clone(),
        );

        let apply_duration_seconds = Family::<KindLabels, Histogram>::new_with_constructor(|| {
            // Compile+attach runs external toolchains: 10ms to 10s.
            Histogram::new(exponential_buckets_range(0.01, 10.0, 8))
        });
        registry.register(
            "apply_duration_seconds",
            "Time to program one endpoint (qdisc + compile + attach)",
            apply_duration_seconds.clone(),
        );

        let dirty_items = Family::<SetLabels, Gauge>::default();
        registry.register(
            "dirty_items",
            "Items left dirty after the last reconcile pass",
            dirty_items.clone(),
        );

        let workloads_cached = Gauge::default();
        registry.register(
            "workloads_cached",
            "Workload endpoints currently cached",
            workloads_cached.clone(),
        );

        Self {
            registry,
            attaches_total,
            apply_failures_total,
            apply_duration_seconds,
            dirty_items,
            workloads_cached,
        }
    }

    /// Encode the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramMetrics for AgentMetrics {
    fn observe_apply_duration(&self, kind: &str, duration_seconds: f64) {
        self.apply_duration_seconds
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .observe(duration_seconds);
    }

    fn record_apply_failure(&self, kind: &str, stage: &str) {
        self.apply_failures_total
            .get_or_create(&StageLabels {
                kind: kind.to_string(),
                stage: stage.to_string(),
            })
            .inc();
    }

    fn record_attach(&self, section: &str) {
        self.attaches_total
            .get_or_create(&SectionLabels {
                section: section.to_string(),
            })
            .inc();
    }
}

impl ReconcileMetrics for AgentMetrics {
    fn set_dirty_sizes(&self, ifaces: u64, workloads: u64) {
        self.dirty_items
            .get_or_create(&SetLabels {
                set: "ifaces".to_string(),
            })
            .set(ifaces as i64);
        self.dirty_items
            .get_or_create(&SetLabels {
                set: "workloads".to_string(),
            })
            .set(workloads as i64);
    }

    fn set_workloads_cached(&self, count: u64) {
        self.workloads_cached.set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_metrics_appear_in_exposition() {
        let metrics = AgentMetrics::new();
        metrics.record_attach("calico_from_host_ep");
        metrics.record_apply_failure("workload", "compile");
        metrics.observe_apply_duration("host", 0.25);
        metrics.set_dirty_sizes(2, 3);
        metrics.set_workloads_cached(7);

        let text = metrics.encode().unwrap();
        assert!(text.contains("bpfplane_attaches_total"));
        assert!(text.contains("section=\"calico_from_host_ep\""));
        assert!(text.contains("bpfplane_apply_failures_total"));
        assert!(text.contains("stage=\"compile\""));
        assert!(text.contains("bpfplane_apply_duration_seconds"));
        assert!(text.contains("bpfplane_dirty_items"));
        assert!(text.contains("bpfplane_workloads_cached 7"));
    }

    #[test]
    fn fresh_registry_encodes_cleanly() {
        let metrics = AgentMetrics::new();
        assert!(metrics.encode().is_ok());
    }
}
