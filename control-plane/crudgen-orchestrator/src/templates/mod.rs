//! Desired shapes of the children of a [`ServiceDefinition`].
//!
//! Builders are pure: they read the definition and the injected
//! [`SyncSettings`] and never touch the cluster. Ownership links are attached
//! by the synchronizer right before creation.

pub mod autoscaler;
pub mod database;
pub mod network;
pub mod workload;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::config::{DatabaseSettings, SyncSettings};
use crate::crd::ServiceDefinition;

pub use autoscaler::autoscaler;
pub use database::{database_service, database_stateful_set};
pub use network::{ingress, network_service};
pub use workload::workload;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("status.{0} must be set before the definition can be deployed")]
    MissingStatus(&'static str),
    #[error("status.port {0} is outside 1..=65535")]
    InvalidPort(i32),
    #[error("name {0} ends with the reserved suffix -database")]
    ReservedName(String),
}

#[derive(Clone, Debug)]
pub struct RenderContext<'a> {
    pub def: &'a ServiceDefinition,
    pub settings: &'a SyncSettings,
    pub namespace: String,
    pub image: &'a str,
    pub port: i32,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        def: &'a ServiceDefinition,
        settings: &'a SyncSettings,
    ) -> Result<Self, TemplateError> {
        if def.has_reserved_name() {
            return Err(TemplateError::ReservedName(def.name_any()));
        }
        let status = def.status.as_ref();
        let image = status
            .and_then(|s| s.image.as_deref())
            .filter(|i| !i.is_empty())
            .ok_or(TemplateError::MissingStatus("image"))?;
        let port = status
            .and_then(|s| s.port)
            .ok_or(TemplateError::MissingStatus("port"))?;
        if !(1..=65535).contains(&port) {
            return Err(TemplateError::InvalidPort(port));
        }
        Ok(Self {
            def,
            settings,
            namespace: def.namespace().unwrap_or_else(|| "default".into()),
            image,
            port,
        })
    }

    pub fn host(&self) -> String {
        self.def.host(&self.settings.root_domain)
    }

    pub fn database(&self) -> Option<&'a DatabaseSettings> {
        self.settings.database.as_ref()
    }

    /// Secret holding the database credentials for this definition.
    pub fn database_secret(&self) -> Option<String> {
        self.database().map(|db| {
            db.secret
                .clone()
                .unwrap_or_else(|| self.def.database_credentials_secret_name())
        })
    }

    pub(crate) fn meta(
        &self,
        name: String,
        labels: BTreeMap<String, String>,
    ) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_requires_image_and_port() {
        let settings = SyncSettings::new("example.com", "letsencrypt");
        let mut def = fixtures::orders(true);
        assert!(RenderContext::new(&def, &settings).is_ok());

        def.status.as_mut().unwrap().image = Some(String::new());
        assert_eq!(
            RenderContext::new(&def, &settings).unwrap_err(),
            TemplateError::MissingStatus("image")
        );

        def.status.as_mut().unwrap().image = Some("orders:v3".into());
        def.status.as_mut().unwrap().port = Some(0);
        assert_eq!(
            RenderContext::new(&def, &settings).unwrap_err(),
            TemplateError::InvalidPort(0)
        );
    }

    #[test]
    fn database_suffix_is_reserved() {
        let settings = SyncSettings::new("example.com", "letsencrypt");
        let mut def = fixtures::orders(true);
        def.metadata.name = Some("orders-database".into());
        assert_eq!(
            RenderContext::new(&def, &settings).unwrap_err(),
            TemplateError::ReservedName("orders-database".into())
        );

        def.metadata.name = Some("orders-database-v2".into());
        assert!(RenderContext::new(&def, &settings).is_ok());
    }

    #[test]
    fn database_secret_defaults_per_definition() {
        let def = fixtures::orders(true);
        let settings = SyncSettings::new("example.com", "letsencrypt")
            .with_database(DatabaseSettings::default());
        let ctx = RenderContext::new(&def, &settings).unwrap();
        assert_eq!(
            ctx.database_secret().as_deref(),
            Some("orders-database-credentials")
        );
    }
}
