//! Release of side effects that owner-reference cascade cannot reach.

use std::sync::Arc;

use async_trait::async_trait;

use crate::crd::ServiceDefinition;

pub const FINALIZER: &str = "api.crudgen.org/finalizer";

pub type CleanupError = Box<dyn std::error::Error + Send + Sync>;

/// One external resource released before a definition may go away.
#[async_trait]
pub trait CleanupStep: Send + Sync {
    fn name(&self) -> &str;

    /// Must be idempotent: it runs again when a later step failed.
    async fn cleanup(&self, def: &ServiceDefinition) -> Result<(), CleanupError>;
}

/// Ordered cleanup steps. While non-empty, definitions carry [`FINALIZER`].
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    steps: Vec<Arc<dyn CleanupStep>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, step: impl CleanupStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Arc<dyn CleanupStep>> {
        self.steps.iter()
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| s.name().to_string()))
            .finish()
    }
}
