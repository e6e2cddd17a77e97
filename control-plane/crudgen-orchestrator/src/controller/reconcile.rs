use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::cleanup::{CleanupRegistry, FINALIZER};
use super::metrics::Metrics;
use super::status::{derive_phase, desired_status, should_patch_status};
use super::sync::{ChildKind, SyncOutcome, ensure};
use super::types::{ObjectKey, Outcome};
use super::ReconcileErr;
use crate::cluster::{ClusterApi, ClusterError, kind_of};
use crate::config::SyncSettings;
use crate::crd::{Phase, ServiceDefinition};
use crate::scheme::Scheme;
use crate::templates::{self, RenderContext};

/// Converges a single definition per call. Holds no per-key state, so one
/// instance serves every key concurrently.
pub struct Reconciler<C> {
    cluster: C,
    scheme: Arc<Scheme>,
    settings: SyncSettings,
    cleanup: CleanupRegistry,
    metrics: Metrics,
}

impl<C: ClusterApi> Reconciler<C> {
    pub fn new(cluster: C, scheme: Arc<Scheme>, settings: SyncSettings) -> Self {
        Self {
            cluster,
            scheme,
            settings,
            cleanup: CleanupRegistry::default(),
            metrics: Metrics::default(),
        }
    }

    pub fn with_cleanup(mut self, cleanup: CleanupRegistry) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[instrument(skip_all, fields(ns = %key.namespace, name = %key.name))]
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
    ) -> Result<Outcome, ReconcileErr> {
        let res = self.converge(key).await;
        match &res {
            Ok(outcome) => {
                debug!(?outcome, "reconcile finished");
                self.metrics.reconciled(outcome.label());
            }
            Err(_) => self.metrics.failed(),
        }
        res
    }

    async fn converge(&self, key: &ObjectKey) -> Result<Outcome, ReconcileErr> {
        let def = self
            .cluster
            .get::<ServiceDefinition>(&key.namespace, &key.name)
            .await
            .map_err(|source| ReconcileErr::Fetch {
                kind: kind_of::<ServiceDefinition>(),
                name: key.to_string(),
                source,
            })?;
        let Some(def) = def else {
            debug!("definition is gone");
            return Ok(Outcome::Absent);
        };

        if def.is_deleting() {
            return self.finalize(key, def).await;
        }

        if !def.image_ready() {
            debug!("image not ready; deferring");
            let phase = derive_phase(false, def.is_deployed(), false);
            self.write_status(key, &def, phase, None).await?;
            return Ok(Outcome::Deferred);
        }

        let def = self.ensure_finalizer(key, def).await?;

        if let Err(e) = self.sync_children(key, &def).await {
            if !def.is_deployed() {
                // Record that the image is ready even though convergence
                // did not finish; the original error is what gets reported.
                if let Err(status_err) =
                    self.write_status(key, &def, Phase::Ready, None).await
                {
                    warn!(error = %status_err, "could not record Ready phase");
                }
            }
            return Err(e);
        }

        let first_deploy = !def.is_deployed();
        self.write_status(key, &def, Phase::Deployed, def.meta().generation)
            .await?;
        if first_deploy {
            info!("definition deployed");
        }
        Ok(Outcome::Converged { first_deploy })
    }

    /// Children in dependency order. The first failure aborts the pass.
    async fn sync_children(
        &self,
        key: &ObjectKey,
        def: &ServiceDefinition,
    ) -> Result<(), ReconcileErr> {
        let ctx = RenderContext::new(def, &self.settings).map_err(|source| {
            ReconcileErr::Invalid {
                key: key.to_string(),
                source,
            }
        })?;

        if let Some(sts) = templates::database_stateful_set(&ctx) {
            self.sync(def, sts).await?;
        }
        if let Some(svc) = templates::database_service(&ctx) {
            self.sync(def, svc).await?;
        }
        self.sync(def, templates::workload(&ctx)).await?;
        self.sync(def, templates::network_service(&ctx)).await?;
        self.sync(def, templates::ingress(&ctx)).await?;
        if self.settings.autoscaler {
            self.sync(def, templates::autoscaler(&ctx)).await?;
        }
        Ok(())
    }

    async fn sync<K: ChildKind>(
        &self,
        def: &ServiceDefinition,
        desired: K,
    ) -> Result<(), ReconcileErr> {
        let outcome =
            ensure(&self.cluster, &self.scheme, &self.settings, def, desired)
                .await?;
        let op = match outcome {
            SyncOutcome::Created => "create",
            SyncOutcome::Updated(_) => "update",
            SyncOutcome::Unchanged => return Ok(()),
        };
        self.metrics.child_write(&kind_of::<K>(), op);
        Ok(())
    }

    async fn ensure_finalizer(
        &self,
        key: &ObjectKey,
        def: ServiceDefinition,
    ) -> Result<ServiceDefinition, ReconcileErr> {
        if self.cleanup.is_empty() || def.has_finalizer(FINALIZER) {
            return Ok(def);
        }
        info!("adding finalizer");
        let mut finalizers = def.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        self.cluster
            .patch_finalizers(&def, finalizers)
            .await
            .map_err(|source| ReconcileErr::Finalizer {
                key: key.to_string(),
                source,
            })
    }

    /// Deletion branch. Never creates or updates children.
    async fn finalize(
        &self,
        key: &ObjectKey,
        def: ServiceDefinition,
    ) -> Result<Outcome, ReconcileErr> {
        if !def.has_finalizer(FINALIZER) {
            debug!("deleting without finalizer; nothing to release");
            return Ok(Outcome::Finalized);
        }

        let def = self.write_status(key, &def, Phase::Deleting, None).await?;
        for step in self.cleanup.steps() {
            debug!(step = step.name(), "running cleanup step");
            step.cleanup(&def).await.map_err(|source| {
                ReconcileErr::Cleanup {
                    step: step.name().to_string(),
                    source,
                }
            })?;
        }

        info!("removing finalizer");
        let finalizers = def
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        match self.cluster.patch_finalizers(&def, finalizers).await {
            Ok(_) | Err(ClusterError::Gone { .. }) => Ok(Outcome::Finalized),
            Err(source) => Err(ReconcileErr::Finalizer {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Persist the status implied by `phase` when it changed. Returns the
    /// definition as stored afterwards.
    async fn write_status(
        &self,
        key: &ObjectKey,
        def: &ServiceDefinition,
        phase: Phase,
        observed_generation: Option<i64>,
    ) -> Result<ServiceDefinition, ReconcileErr> {
        let current = def.status.clone().unwrap_or_default();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let desired = desired_status(&current, phase, observed_generation, &now);
        if !should_patch_status(def.status.as_ref(), &desired) {
            debug!(%phase, "status unchanged");
            return Ok(def.clone());
        }
        debug!(%phase, "writing status");
        self.cluster
            .patch_status(def, &desired)
            .await
            .map_err(|source| ReconcileErr::Status {
                key: key.to_string(),
                source,
            })
    }
}
