use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta,
};
use kube::ResourceExt;

use super::RenderContext;

pub fn workload(ctx: &RenderContext<'_>) -> Deployment {
    let def = ctx.def;
    let labels = def.workload_labels();
    let selector = LabelSelector {
        match_labels: Some(def.label_selectors()),
        ..Default::default()
    };

    let container = Container {
        name: def.name_any(),
        image: Some(ctx.image.to_string()),
        ports: Some(vec![ContainerPort {
            name: Some("api".into()),
            container_port: ctx.port,
            ..Default::default()
        }]),
        env: database_env(ctx),
        ..Default::default()
    };

    Deployment {
        metadata: ctx.meta(def.deployment_name(), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Connection settings for the database, when it is managed. The host is
/// credential-free; user and password come from the injected secret.
fn database_env(ctx: &RenderContext<'_>) -> Option<Vec<EnvVar>> {
    let secret = ctx.database_secret()?;
    Some(vec![
        EnvVar {
            name: "DATABASE_HOST".into(),
            value: Some(ctx.def.database_host()),
            ..Default::default()
        },
        secret_env("DATABASE_USER", &secret, "username"),
        secret_env("DATABASE_PASSWORD", &secret, "password"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseSettings, SyncSettings};
    use crate::templates::fixtures::orders;

    #[test]
    fn renders_single_replica_with_status_image() {
        let def = orders(true);
        let settings = SyncSettings::new("example.com", "letsencrypt");
        let dep = workload(&RenderContext::new(&def, &settings).unwrap());

        assert_eq!(dep.metadata.name.as_deref(), Some("orders"));
        assert_eq!(dep.metadata.namespace.as_deref(), Some("shop"));
        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].name, "orders");
        assert_eq!(pod.containers[0].image.as_deref(), Some("orders:v3"));
        assert!(pod.containers[0].env.is_none());
        assert_eq!(
            spec.selector.match_labels,
            Some(def.label_selectors()),
            "selector must stay stable across label additions"
        );
    }

    #[test]
    fn database_env_uses_secret_refs_only() {
        let def = orders(true);
        let settings = SyncSettings::new("example.com", "letsencrypt")
            .with_database(DatabaseSettings {
                secret: Some("pg-credentials".into()),
                ..Default::default()
            });
        let dep = workload(&RenderContext::new(&def, &settings).unwrap());
        let env = dep.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();

        let host = env.iter().find(|e| e.name == "DATABASE_HOST").unwrap();
        assert_eq!(
            host.value.as_deref(),
            Some("postgres://orders-database:5432/ordb")
        );
        for name in ["DATABASE_USER", "DATABASE_PASSWORD"] {
            let var = env.iter().find(|e| e.name == name).unwrap();
            assert!(var.value.is_none());
            let secret = var
                .value_from
                .as_ref()
                .and_then(|v| v.secret_key_ref.as_ref())
                .unwrap();
            assert_eq!(secret.name, "pg-credentials");
        }
    }
}
