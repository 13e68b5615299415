// Focused sub-traits for recording Prometheus metrics.
//
// All methods take `&self`; implementations use interior mutability
// (atomics via `prometheus-client`). Default implementations are
// no-ops so test mocks only implement what they assert on.

// ── Program compile/attach metrics ─────────────────────────────────

pub trait ProgramMetrics: Send + Sync {
    /// Observe how long one program apply (qdisc + compile + attach)
    /// took, labelled by endpoint kind.
    fn observe_apply_duration(&self, _kind: &str, _duration_seconds: f64) {}

    /// Record a failed apply, labelled by endpoint kind and stage
    /// (compile/attach/sysctl).
    fn record_apply_failure(&self, _kind: &str, _stage: &str) {}

    /// Record a successful attach for a program section.
    fn record_attach(&self, _section: &str) {}
}

// ── Reconciliation metrics ─────────────────────────────────────────

pub trait ReconcileMetrics: Send + Sync {
    /// Set the dirty-set sizes left over after a reconcile pass.
    fn set_dirty_sizes(&self, _ifaces: u64, _workloads: u64) {}

    /// Set the number of workload endpoints currently cached.
    fn set_workloads_cached(&self, _count: u64) {}
}

/// Everything the endpoint manager records.
pub trait MetricsPort: ProgramMetrics + ReconcileMetrics {}

impl<T: ProgramMetrics + ReconcileMetrics> MetricsPort for T {}
