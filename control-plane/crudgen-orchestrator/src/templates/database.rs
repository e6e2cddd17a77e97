use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, EnvVar,
    EnvVarSource, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, SecretKeySelector, Service, ServicePort, ServiceSpec,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::RenderContext;
use crate::config::DatabaseSettings;
use crate::crd::{DATABASE_NAME, DATABASE_PORT, MANAGED_BY, MANAGED_BY_LABEL};

const DATABASE_IMAGE: &str = "postgres:13";
const DATA_PATH: &str = "/var/lib/postgresql/data";

fn labels(ctx: &RenderContext<'_>) -> BTreeMap<String, String> {
    let mut labels = ctx.def.database_label();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
}

/// Single-replica postgres with one persistent volume claim. `None` when the
/// database feature is disabled.
pub fn database_stateful_set(ctx: &RenderContext<'_>) -> Option<StatefulSet> {
    let db = ctx.database()?;
    let secret = ctx.database_secret()?;
    let def = ctx.def;

    let container = Container {
        name: "pg".into(),
        image: Some(DATABASE_IMAGE.into()),
        ports: Some(vec![ContainerPort {
            name: Some(DATABASE_NAME.into()),
            container_port: DATABASE_PORT,
            ..Default::default()
        }]),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: db.config_map.clone(),
                optional: None,
            }),
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: "POSTGRES_PASSWORD".into(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret,
                    key: "password".into(),
                    optional: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: DATABASE_NAME.into(),
            mount_path: DATA_PATH.into(),
            sub_path: Some("postgres".into()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Some(StatefulSet {
        metadata: ctx.meta(def.database_stateful_name(), labels(ctx)),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: def.database_service_name(),
            selector: LabelSelector {
                match_labels: Some(def.database_label()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(def.database_label()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![claim(db)]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn claim(db: &DatabaseSettings) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATABASE_NAME.into()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            storage_class_name: Some(db.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(db.storage_size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn database_service(ctx: &RenderContext<'_>) -> Option<Service> {
    ctx.database()?;
    let def = ctx.def;
    Some(Service {
        metadata: ctx.meta(def.database_service_name(), labels(ctx)),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(def.database_label()),
            ports: Some(vec![ServicePort {
                name: Some("pg".into()),
                port: DATABASE_PORT,
                target_port: Some(IntOrString::Int(DATABASE_PORT)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::templates::fixtures::orders;

    fn settings() -> SyncSettings {
        SyncSettings::new("example.com", "letsencrypt")
            .with_database(DatabaseSettings::default())
    }

    #[test]
    fn disabled_feature_renders_nothing() {
        let def = orders(true);
        let settings = SyncSettings::new("example.com", "letsencrypt");
        let ctx = RenderContext::new(&def, &settings).unwrap();
        assert!(database_stateful_set(&ctx).is_none());
        assert!(database_service(&ctx).is_none());
    }

    #[test]
    fn stateful_set_mounts_claim_and_reads_secret() {
        let def = orders(true);
        let settings = settings();
        let sts =
            database_stateful_set(&RenderContext::new(&def, &settings).unwrap())
                .unwrap();
        assert_eq!(sts.metadata.name.as_deref(), Some("orders-database"));
        let spec = sts.spec.unwrap();
        assert_eq!(Some(spec.service_name.as_str()), Some("orders-database"));

        let pod = spec.template.spec.unwrap();
        let pg = &pod.containers[0];
        assert_eq!(pg.image.as_deref(), Some("postgres:13"));
        let mount = &pg.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, "/var/lib/postgresql/data");
        assert_eq!(mount.sub_path.as_deref(), Some("postgres"));
        let password = &pg.env.as_ref().unwrap()[0];
        assert!(password.value.is_none());
        assert_eq!(
            password
                .value_from
                .as_ref()
                .and_then(|v| v.secret_key_ref.as_ref())
                .map(|s| s.name.as_str()),
            Some("orders-database-credentials")
        );

        let claim = &spec.volume_claim_templates.unwrap()[0];
        let claim_spec = claim.spec.as_ref().unwrap();
        assert_eq!(claim_spec.storage_class_name.as_deref(), Some("hiops"));
        assert_eq!(
            claim_spec
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref())
                .and_then(|r| r.get("storage")),
            Some(&Quantity("3G".into()))
        );
    }

    #[test]
    fn service_selects_database_pods() {
        let def = orders(true);
        let settings = settings();
        let svc = database_service(&RenderContext::new(&def, &settings).unwrap())
            .unwrap();
        let spec = svc.spec.unwrap();
        assert_eq!(spec.selector, Some(def.database_label()));
        assert_eq!(spec.ports.unwrap()[0].port, 5432);
    }
}
