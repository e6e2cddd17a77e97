use async_trait::async_trait;
use kube::{
    Client, ResourceExt,
    api::{Api, Patch, PatchParams, PostParams},
};
use serde_json::json;
use tracing::trace;

use super::{ClusterApi, ClusterError, Managed, kind_of};
use crate::crd::{ServiceDefinition, ServiceDefinitionStatus};

/// [`ClusterApi`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn definitions(&self, def: &ServiceDefinition) -> Api<ServiceDefinition> {
        let ns = def.namespace().unwrap_or_else(|| "default".to_string());
        Api::namespaced(self.client.clone(), &ns)
    }
}

fn classify(e: kube::Error, kind: String, name: &str) -> ClusterError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            ClusterError::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => ClusterError::Conflict {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::Gone {
            kind,
            name: name.to_string(),
        },
        other => ClusterError::Kube(other),
    }
}

fn resource_version(
    def: &ServiceDefinition,
) -> Result<String, ClusterError> {
    def.resource_version()
        .ok_or_else(|| ClusterError::MissingResourceVersion {
            kind: kind_of::<ServiceDefinition>(),
            name: def.name_any(),
        })
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get<K: Managed>(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<K>, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), ns);
        api.get_opt(name)
            .await
            .map_err(|e| classify(e, kind_of::<K>(), name))
    }

    async fn create<K: Managed>(
        &self,
        ns: &str,
        obj: &K,
    ) -> Result<K, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), ns);
        let name = obj.name_any();
        trace!(%ns, %name, kind = %kind_of::<K>(), "create");
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, kind_of::<K>(), &name))
    }

    async fn replace<K: Managed>(
        &self,
        ns: &str,
        obj: &K,
    ) -> Result<K, ClusterError> {
        let name = obj.name_any();
        if obj.resource_version().is_none() {
            return Err(ClusterError::MissingResourceVersion {
                kind: kind_of::<K>(),
                name,
            });
        }
        let api: Api<K> = Api::namespaced(self.client.clone(), ns);
        trace!(%ns, %name, kind = %kind_of::<K>(), "replace");
        api.replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, kind_of::<K>(), &name))
    }

    async fn patch_status(
        &self,
        def: &ServiceDefinition,
        status: &ServiceDefinitionStatus,
    ) -> Result<ServiceDefinition, ClusterError> {
        let name = def.name_any();
        // A resourceVersion inside a merge patch makes the write conditional.
        let patch = json!({
            "metadata": { "resourceVersion": resource_version(def)? },
            "status": status,
        });
        self.definitions(def)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, kind_of::<ServiceDefinition>(), &name))
    }

    async fn patch_finalizers(
        &self,
        def: &ServiceDefinition,
        finalizers: Vec<String>,
    ) -> Result<ServiceDefinition, ClusterError> {
        let name = def.name_any();
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version(def)?,
                "finalizers": finalizers,
            }
        });
        self.definitions(def)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, kind_of::<ServiceDefinition>(), &name))
    }
}
