use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const API_GROUP: &str = "api.crudgen.org";
pub const SELECTOR_LABEL: &str = "api.crudgen.org/selector";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "crudgen-orchestrator";

/// Port the database workload listens on.
pub const DATABASE_PORT: i32 = 5432;
/// Database name created by the `pgconfig` environment.
pub const DATABASE_NAME: &str = "ordb";
/// Suffix of the database children. Definition names may not end with it,
/// or a definition's Service would share a name with another's database
/// Service.
pub const DATABASE_SUFFIX: &str = "-database";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "api.crudgen.org",
    version = "v1",
    kind = "CRUD",
    root = "ServiceDefinition",
    plural = "cruds",
    namespaced,
    status = "ServiceDefinitionStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.image"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.imageReady"}"#,
    printcolumn = r#"{"name":"Deployed","type":"boolean","jsonPath":".status.deployed"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinitionSpec {
    /// Opaque description of the API surface to deploy
    pub api_description: String,
    /// Left-most label of the public host name (`<prefix>.<root domain>`)
    pub domain_prefix: String,
    /// Provision TLS termination through the configured cluster issuer
    #[serde(rename = "enableTLS", default = "default_enable_tls")]
    pub enable_tls: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinitionStatus {
    /// Set by the image build pipeline once `image` can be deployed.
    #[serde(default)]
    pub image_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_description_hash: Option<String>,
    /// Flipped to true once, after the first full convergence.
    #[serde(default)]
    pub deployed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq,
)]
pub enum Phase {
    Pending,
    Ready,
    Deployed,
    Deleting,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Ready => write!(f, "Ready"),
            Phase::Deployed => write!(f, "Deployed"),
            Phase::Deleting => write!(f, "Deleting"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        rename = "lastTransitionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    /// The image is built and the definition can be converged
    Ready,
    /// Every child resource has been converged at least once
    Deployed,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

fn default_enable_tls() -> bool {
    true
}

// Deterministic child names and label sets. Everything here is a pure
// function of the definition's name so ensure-operations stay idempotent.
impl ServiceDefinition {
    pub fn label_selectors(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(SELECTOR_LABEL.to_string(), self.name_any())])
    }

    pub fn workload_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.label_selectors();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
        labels
    }

    pub fn database_label(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "postgres".to_string()),
            ("crud".to_string(), self.name_any()),
        ])
    }

    pub fn deployment_name(&self) -> String {
        self.name_any()
    }

    pub fn service_name(&self) -> String {
        self.name_any()
    }

    pub fn ingress_name(&self) -> String {
        self.name_any()
    }

    pub fn autoscaler_name(&self) -> String {
        self.name_any()
    }

    pub fn tls_secret_name(&self) -> String {
        format!("{}-tls", self.name_any())
    }

    pub fn database_service_name(&self) -> String {
        format!("{}{}", self.name_any(), DATABASE_SUFFIX)
    }

    pub fn database_stateful_name(&self) -> String {
        format!("{}{}", self.name_any(), DATABASE_SUFFIX)
    }

    pub fn database_credentials_secret_name(&self) -> String {
        format!("{}{}-credentials", self.name_any(), DATABASE_SUFFIX)
    }

    /// Whether the name falls in the namespace reserved for database
    /// children.
    pub fn has_reserved_name(&self) -> bool {
        self.name_any().ends_with(DATABASE_SUFFIX)
    }

    /// Connection endpoint of the database service. Credentials are never
    /// part of it; they reach the workload through secret references.
    pub fn database_host(&self) -> String {
        format!(
            "postgres://{}:{}/{}",
            self.database_service_name(),
            DATABASE_PORT,
            DATABASE_NAME
        )
    }

    pub fn host(&self, root_domain: &str) -> String {
        format!("{}.{}", self.spec.domain_prefix, root_domain)
    }

    pub fn image_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.image_ready).unwrap_or(false)
    }

    pub fn is_deployed(&self) -> bool {
        self.status.as_ref().map(|s| s.deployed).unwrap_or(false)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};
    use serde_json::json;

    fn orders() -> ServiceDefinition {
        let mut def = ServiceDefinition::new(
            "orders",
            ServiceDefinitionSpec {
                api_description: "openapi: 3.0.0".into(),
                domain_prefix: "orders".into(),
                enable_tls: true,
            },
        );
        def.metadata.namespace = Some("shop".into());
        def
    }

    #[test]
    fn enable_tls_defaults_to_true() {
        let spec: ServiceDefinitionSpec = serde_json::from_value(json!({
            "apiDescription": "x",
            "domainPrefix": "orders"
        }))
        .unwrap();
        assert!(spec.enable_tls);

        let spec: ServiceDefinitionSpec = serde_json::from_value(json!({
            "apiDescription": "x",
            "domainPrefix": "orders",
            "enableTLS": false
        }))
        .unwrap();
        assert!(!spec.enable_tls);
    }

    #[test]
    fn status_uses_camel_case_and_tolerates_older_schema() {
        // Older objects carry only the build pipeline fields.
        let status: ServiceDefinitionStatus = serde_json::from_value(json!({
            "imageReady": true,
            "image": "orders:v3",
            "port": 8080,
            "apiDescriptionHash": "abc"
        }))
        .unwrap();
        assert!(status.image_ready);
        assert!(!status.deployed);
        assert_eq!(status.phase, None);

        let v = serde_json::to_value(&ServiceDefinitionStatus {
            phase: Some(Phase::Deployed),
            deployed: true,
            ..status
        })
        .unwrap();
        assert_eq!(v["apiDescriptionHash"], "abc");
        assert_eq!(v["phase"], "Deployed");
        assert_eq!(v["deployed"], true);
    }

    #[test]
    fn child_names_are_deterministic() {
        let def = orders();
        assert_eq!(def.deployment_name(), "orders");
        assert_eq!(def.service_name(), "orders");
        assert_eq!(def.ingress_name(), "orders");
        assert_eq!(def.tls_secret_name(), "orders-tls");
        assert_eq!(def.database_service_name(), "orders-database");
        assert_eq!(def.host("example.com"), "orders.example.com");
        assert_eq!(
            def.label_selectors().get(SELECTOR_LABEL).map(String::as_str),
            Some("orders")
        );
    }

    #[test]
    fn database_host_carries_no_credentials() {
        let host = orders().database_host();
        assert_eq!(host, "postgres://orders-database:5432/ordb");
        assert!(!host.contains('@'));
    }

    #[test]
    fn served_as_cruds_resource() {
        let crd = ServiceDefinition::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("cruds.api.crudgen.org"));
        assert_eq!(crd.spec.names.kind, "CRUD");
        assert_eq!(crd.spec.names.plural, "cruds");
        assert_eq!(ServiceDefinition::kind(&()), "CRUD");
    }

    #[test]
    fn crd_exposes_print_columns() {
        let crd = ServiceDefinition::crd();
        assert_eq!(crd.spec.group, API_GROUP);
        let version = &crd.spec.versions[0];
        let columns: Vec<_> = version
            .additional_printer_columns
            .as_ref()
            .map(|c| c.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();
        assert_eq!(columns, ["Image", "Ready", "Deployed", "Phase", "Age"]);
        assert!(version.subresources.as_ref().unwrap().status.is_some());
    }
}
