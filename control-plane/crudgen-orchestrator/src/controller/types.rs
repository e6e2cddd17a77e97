use kube::ResourceExt;

use crate::crd::ServiceDefinition;

/// Namespaced identity of a service definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn of(def: &ServiceDefinition) -> Self {
        Self {
            namespace: def.namespace().unwrap_or_else(|| "default".into()),
            name: def.name_any(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of one reconcile invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The definition no longer exists.
    Absent,
    /// Deletion was observed and cleanup finished.
    Finalized,
    /// The image is not ready yet; no child was touched.
    Deferred,
    /// Every enabled child converged. `first_deploy` is true on the
    /// invocation that flipped `deployed`.
    Converged { first_deploy: bool },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Absent => "absent",
            Outcome::Finalized => "finalized",
            Outcome::Deferred => "deferred",
            Outcome::Converged { .. } => "converged",
        }
    }
}
