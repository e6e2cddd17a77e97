//! Registry of the resource kinds the orchestrator knows how to manage.
//!
//! Built once at startup and handed to the reconciler; ownership links are
//! only ever produced for registered owner kinds, and only registered child
//! kinds may be synchronized.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    ObjectMeta, OwnerReference,
};
use kube::Resource;

use crate::crd::ServiceDefinition;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KindInfo {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl KindInfo {
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self {
            group: K::group(&()).to_string(),
            version: K::version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            plural: K::plural(&()).to_string(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SchemeError {
    #[error("kind {0} is not registered")]
    Unregistered(String),
    #[error("{kind} {name} has no uid yet")]
    MissingUid { kind: String, name: String },
    #[error("{kind} has no name")]
    MissingName { kind: String },
}

#[derive(Clone, Debug, Default)]
pub struct Scheme {
    kinds: BTreeMap<String, KindInfo>,
}

fn type_key<K: Resource<DynamicType = ()>>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// The definition kind plus every child kind the synchronizers manage.
    pub fn with_defaults() -> Self {
        Self::new()
            .register::<ServiceDefinition>()
            .register::<Deployment>()
            .register::<Service>()
            .register::<Ingress>()
            .register::<HorizontalPodAutoscaler>()
            .register::<StatefulSet>()
    }

    pub fn register<K: Resource<DynamicType = ()>>(mut self) -> Self {
        self.kinds.insert(type_key::<K>(), KindInfo::of::<K>());
        self
    }

    pub fn lookup<K: Resource<DynamicType = ()>>(&self) -> Option<&KindInfo> {
        self.kinds.get(&type_key::<K>())
    }

    pub fn require<K: Resource<DynamicType = ()>>(
        &self,
    ) -> Result<&KindInfo, SchemeError> {
        self.lookup::<K>()
            .ok_or_else(|| SchemeError::Unregistered(type_key::<K>()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &KindInfo> {
        self.kinds.values()
    }

    /// Controller owner reference pointing at `owner`. Fails when the owner
    /// kind is unknown or the owner has not been persisted yet (no uid).
    pub fn controller_reference<P>(
        &self,
        owner: &P,
    ) -> Result<OwnerReference, SchemeError>
    where
        P: Resource<DynamicType = ()>,
    {
        let info = self.require::<P>()?;
        let meta = owner.meta();
        let name = meta.name.clone().ok_or_else(|| SchemeError::MissingName {
            kind: info.kind.clone(),
        })?;
        let uid = meta.uid.clone().ok_or_else(|| SchemeError::MissingUid {
            kind: info.kind.clone(),
            name: name.clone(),
        })?;
        Ok(OwnerReference {
            api_version: info.api_version(),
            kind: info.kind.clone(),
            name,
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}

/// Uid of the controlling owner of an object, if any.
pub fn controller_uid(meta: &ObjectMeta) -> Option<&str> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|o| o.controller == Some(true))
        .map(|o| o.uid.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ServiceDefinitionSpec;

    fn definition(uid: Option<&str>) -> ServiceDefinition {
        let mut def = ServiceDefinition::new(
            "orders",
            ServiceDefinitionSpec {
                api_description: "x".into(),
                domain_prefix: "orders".into(),
                enable_tls: true,
            },
        );
        def.metadata.uid = uid.map(str::to_string);
        def
    }

    #[test]
    fn builds_controller_reference_for_registered_owner() {
        let scheme = Scheme::with_defaults();
        let oref = scheme
            .controller_reference(&definition(Some("uid-1")))
            .unwrap();
        assert_eq!(oref.api_version, "api.crudgen.org/v1");
        assert_eq!(oref.kind, "CRUD");
        assert_eq!(oref.name, "orders");
        assert_eq!(oref.uid, "uid-1");
        assert_eq!(oref.controller, Some(true));
        assert_eq!(oref.block_owner_deletion, Some(true));
    }

    #[test]
    fn refuses_owner_without_uid() {
        let err = Scheme::with_defaults()
            .controller_reference(&definition(None))
            .unwrap_err();
        assert!(matches!(err, SchemeError::MissingUid { .. }));
    }

    #[test]
    fn refuses_unregistered_owner() {
        let err = Scheme::new()
            .register::<Deployment>()
            .controller_reference(&definition(Some("uid-1")))
            .unwrap_err();
        assert_eq!(
            err,
            SchemeError::Unregistered(
                "api.crudgen.org/v1/CRUD".into()
            )
        );
    }

    #[test]
    fn core_kinds_have_empty_group() {
        let scheme = Scheme::with_defaults();
        let svc = scheme.lookup::<Service>().unwrap();
        assert_eq!(svc.api_version(), "v1");
        let hpa = scheme.lookup::<HorizontalPodAutoscaler>().unwrap();
        assert_eq!(hpa.api_version(), "autoscaling/v2");
        assert_eq!(scheme.kinds().count(), 6);
    }
}
