// Requires a running Kubernetes cluster with the `cruds` CRD
// applied (`cargo run --bin crdgen | kubectl apply -f -`). Ignored by default.

use std::sync::Arc;

use k8s_openapi::api::{
    apps::v1::Deployment, core::v1::Service, networking::v1::Ingress,
};
use kube::{
    Client, ResourceExt,
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
};
use serde_json::json;

use crudgen_orchestrator::cluster::KubeCluster;
use crudgen_orchestrator::config::SyncSettings;
use crudgen_orchestrator::controller::{ObjectKey, Outcome, Reconciler};
use crudgen_orchestrator::crd::{ServiceDefinition, ServiceDefinitionSpec};
use crudgen_orchestrator::scheme::Scheme;

#[test_log::test(tokio::test)]
#[ignore]
async fn reconciler_converges_against_live_cluster() {
    let client = Client::try_default().await.expect("kube client");
    let ns = "default";
    let name = format!("crudgen-it-{}", chrono::Utc::now().timestamp());
    let api: Api<ServiceDefinition> = Api::namespaced(client.clone(), ns);

    let def = ServiceDefinition::new(
        &name,
        ServiceDefinitionSpec {
            api_description: "openapi: 3.0.0".into(),
            domain_prefix: name.clone(),
            enable_tls: true,
        },
    );
    api.create(&PostParams::default(), &def)
        .await
        .expect("create definition");

    // Act as the image pipeline.
    let status = json!({
        "status": {"imageReady": true, "image": "nginx:1.27", "port": 80}
    });
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status))
        .await
        .expect("patch status");

    let rec = Reconciler::new(
        KubeCluster::new(client.clone()),
        Arc::new(Scheme::with_defaults()),
        SyncSettings::new("example.com", "letsencrypt"),
    );
    let key = ObjectKey::new(ns, &name);
    let outcome = rec.reconcile(&key).await.expect("first reconcile");
    assert_eq!(outcome, Outcome::Converged { first_deploy: true });
    let outcome = rec.reconcile(&key).await.expect("second reconcile");
    assert_eq!(outcome, Outcome::Converged { first_deploy: false });

    let dep = Api::<Deployment>::namespaced(client.clone(), ns)
        .get(&name)
        .await
        .expect("deployment");
    assert_eq!(dep.owner_references().len(), 1);
    Api::<Service>::namespaced(client.clone(), ns)
        .get(&name)
        .await
        .expect("service");
    let ing = Api::<Ingress>::namespaced(client.clone(), ns)
        .get(&name)
        .await
        .expect("ingress");
    assert_eq!(
        ing.annotations()
            .get("cert-manager.io/cluster-issuer")
            .map(String::as_str),
        Some("letsencrypt")
    );

    let stored = api.get(&name).await.expect("definition");
    assert!(stored.is_deployed());

    let _ = api.delete(&name, &DeleteParams::default()).await;
}
