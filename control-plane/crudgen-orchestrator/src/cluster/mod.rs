//! Narrow view of the cluster API used by the reconciler.
//!
//! The trait keeps the convergence logic independent from the transport:
//! [`KubeCluster`] talks to the API server, [`MemoryCluster`] keeps objects
//! in memory with the same optimistic-concurrency rules and records writes.

mod kube_cluster;
mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{Serialize, de::DeserializeOwned};

use crate::crd::{ServiceDefinition, ServiceDefinitionStatus};

pub use kube_cluster::KubeCluster;
pub use memory::{MemoryCluster, WriteOp, WriteRecord};

/// Namespaced kinds the reconciler can read and write.
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Managed for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("{kind} {name} was modified concurrently (stale resource version)")]
    Conflict { kind: String, name: String },
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },
    #[error("{kind} {name} does not exist")]
    Gone { kind: String, name: String },
    #[error("{kind} {name} carries no resource version; refusing blind write")]
    MissingResourceVersion { kind: String, name: String },
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("injected failure: {0}")]
    Injected(String),
}

impl ClusterError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }
}

/// Cluster operations needed to converge one service definition.
///
/// Every write that modifies an existing object is conditional on the
/// resource version carried by the object passed in.
#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: Managed>(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<K>, ClusterError>;

    async fn create<K: Managed>(
        &self,
        ns: &str,
        obj: &K,
    ) -> Result<K, ClusterError>;

    /// Replace a whole object; `obj` must carry the observed resource version.
    async fn replace<K: Managed>(
        &self,
        ns: &str,
        obj: &K,
    ) -> Result<K, ClusterError>;

    /// Write the status subresource of `def`, guarded by its resource version.
    async fn patch_status(
        &self,
        def: &ServiceDefinition,
        status: &ServiceDefinitionStatus,
    ) -> Result<ServiceDefinition, ClusterError>;

    /// Overwrite the finalizer list of `def`, guarded by its resource version.
    async fn patch_finalizers(
        &self,
        def: &ServiceDefinition,
        finalizers: Vec<String>,
    ) -> Result<ServiceDefinition, ClusterError>;
}

pub(crate) fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}
