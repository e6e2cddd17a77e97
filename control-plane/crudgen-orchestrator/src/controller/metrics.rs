//! Prometheus counters for the reconcile loop.

use std::sync::{Arc, Mutex};

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WriteLabels {
    pub kind: String,
    pub op: String,
}

/// Counters shared between the reconciler and the HTTP endpoint. Cloning is
/// cheap; all clones update the same series.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Mutex<Registry>>,
    reconciles: Family<OutcomeLabels, Counter>,
    errors: Counter,
    child_writes: Family<WriteLabels, Counter>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let reconciles = Family::<OutcomeLabels, Counter>::default();
        let errors = Counter::default();
        let child_writes = Family::<WriteLabels, Counter>::default();

        let mut registry = Registry::default();
        registry.register(
            "crudgen_reconcile",
            "Reconcile invocations by outcome",
            reconciles.clone(),
        );
        registry.register(
            "crudgen_reconcile_errors",
            "Reconcile invocations that returned an error",
            errors.clone(),
        );
        registry.register(
            "crudgen_child_writes",
            "Child resource writes by kind and operation",
            child_writes.clone(),
        );

        Self {
            registry: Arc::new(Mutex::new(registry)),
            reconciles,
            errors,
            child_writes,
        }
    }

    pub fn reconciled(&self, outcome: &str) {
        self.reconciles
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn failed(&self) {
        self.errors.inc();
    }

    pub fn child_write(&self, kind: &str, op: &str) {
        self.child_writes
            .get_or_create(&WriteLabels {
                kind: kind.to_string(),
                op: op.to_string(),
            })
            .inc();
    }

    pub fn reconcile_count(&self, outcome: &str) -> u64 {
        self.reconciles
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .get()
    }

    pub fn error_count(&self) -> u64 {
        self.errors.get()
    }

    pub fn child_write_count(&self, kind: &str, op: &str) -> u64 {
        self.child_writes
            .get_or_create(&WriteLabels {
                kind: kind.to_string(),
                op: op.to_string(),
            })
            .get()
    }

    /// Text exposition of every registered series.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.lock().map_err(|_| std::fmt::Error)?;
        encode(&mut buffer, &*registry)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_counters_in_text_format() {
        let metrics = Metrics::new();
        metrics.reconciled("converged");
        metrics.reconciled("converged");
        metrics.failed();
        metrics.child_write("Deployment", "create");

        assert_eq!(metrics.reconcile_count("converged"), 2);
        assert_eq!(metrics.error_count(), 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("crudgen_reconcile_total{outcome=\"converged\"} 2"));
        assert!(text.contains("crudgen_reconcile_errors_total 1"));
        assert!(text.contains(
            "crudgen_child_writes_total{kind=\"Deployment\",op=\"create\"} 1"
        ));
    }
}
