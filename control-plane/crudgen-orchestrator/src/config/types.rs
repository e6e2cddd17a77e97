use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OrchestratorConfig {
    /// Host name suffix of every ingress route (required).
    /// Env: CRUDGEN_ROOT_DOMAIN
    #[envconfig(from = "CRUDGEN_ROOT_DOMAIN")]
    pub root_domain: Option<String>,

    /// cert-manager ClusterIssuer used for TLS ingresses (required).
    /// Env: CRUDGEN_CLUSTER_ISSUER
    #[envconfig(from = "CRUDGEN_CLUSTER_ISSUER")]
    pub cluster_issuer: Option<String>,

    #[envconfig(from = "CRUDGEN_METRICS_ADDR", default = "0.0.0.0:8080")]
    pub metrics_addr: String,

    /// Seconds before a failed reconcile is retried.
    #[envconfig(from = "CRUDGEN_REQUEUE_ERROR_SECS", default = "15")]
    pub requeue_error_secs: u64,

    #[envconfig(nested)]
    pub features: FeaturesConfig,

    #[envconfig(nested)]
    pub database: DatabaseConfig,

    #[envconfig(nested)]
    pub leader: LeaderConfig,
}

#[derive(Envconfig, Clone, Debug, Default)]
pub struct FeaturesConfig {
    #[envconfig(from = "CRUDGEN_FEATURES_AUTOSCALER", default = "false")]
    pub autoscaler: bool,
    #[envconfig(from = "CRUDGEN_FEATURES_DATABASE", default = "false")]
    pub database: bool,
}

#[derive(Envconfig, Clone, Debug)]
pub struct DatabaseConfig {
    /// ConfigMap providing the database container environment.
    #[envconfig(from = "CRUDGEN_DATABASE_CONFIG_MAP", default = "pgconfig")]
    pub config_map: String,
    /// Secret holding `username`/`password`. When unset, each definition
    /// uses `<name>-database-credentials`.
    #[envconfig(from = "CRUDGEN_DATABASE_SECRET")]
    pub secret: Option<String>,
    #[envconfig(from = "CRUDGEN_DATABASE_STORAGE_CLASS", default = "hiops")]
    pub storage_class: String,
    #[envconfig(from = "CRUDGEN_DATABASE_STORAGE_SIZE", default = "3G")]
    pub storage_size: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct LeaderConfig {
    #[envconfig(from = "CRUDGEN_LEADER_ELECTION", default = "false")]
    pub enabled: bool,
    #[envconfig(from = "CRUDGEN_LEADER_ELECTION_NAMESPACE", default = "default")]
    pub namespace: String,
    #[envconfig(from = "CRUDGEN_LEASE_NAME", default = "335d05c5.crudgen.org")]
    pub lease_name: String,
    #[envconfig(from = "CRUDGEN_LEASE_DURATION_SECS", default = "15")]
    pub lease_duration_secs: u64,
    /// Identity written into the lease; falls back to HOSTNAME.
    #[envconfig(from = "CRUDGEN_POD_NAME")]
    pub identity: Option<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid metrics address {addr:?}: {reason}")]
    MetricsAddr { addr: String, reason: String },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("leader election needs CRUDGEN_POD_NAME or HOSTNAME")]
    MissingIdentity,
}

/// Settings the reconciler needs for rendering children. Injected by the
/// process, never derived from the resource itself.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncSettings {
    pub root_domain: String,
    pub cluster_issuer: String,
    pub autoscaler: bool,
    pub database: Option<DatabaseSettings>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseSettings {
    pub config_map: String,
    pub secret: Option<String>,
    pub storage_class: String,
    pub storage_size: String,
}

impl SyncSettings {
    pub fn new(root_domain: &str, cluster_issuer: &str) -> Self {
        Self {
            root_domain: root_domain.to_string(),
            cluster_issuer: cluster_issuer.to_string(),
            autoscaler: false,
            database: None,
        }
    }

    pub fn with_autoscaler(mut self) -> Self {
        self.autoscaler = true;
        self
    }

    pub fn with_database(mut self, database: DatabaseSettings) -> Self {
        self.database = Some(database);
        self
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            config_map: "pgconfig".into(),
            secret: None,
            storage_class: "hiops".into(),
            storage_size: "3G".into(),
        }
    }
}

fn required(
    value: &Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(name))
}

impl OrchestratorConfig {
    /// Startup validation; any error here is fatal for the process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync_settings()?;
        self.metrics_socket_addr()?;
        if self.requeue_error_secs == 0 {
            return Err(ConfigError::Zero {
                name: "CRUDGEN_REQUEUE_ERROR_SECS",
            });
        }
        if self.leader.enabled {
            if self.leader.lease_duration_secs == 0 {
                return Err(ConfigError::Zero {
                    name: "CRUDGEN_LEASE_DURATION_SECS",
                });
            }
            self.leader_identity()?;
        }
        Ok(())
    }

    pub fn sync_settings(&self) -> Result<SyncSettings, ConfigError> {
        let database = self.features.database.then(|| DatabaseSettings {
            config_map: self.database.config_map.clone(),
            secret: self.database.secret.clone(),
            storage_class: self.database.storage_class.clone(),
            storage_size: self.database.storage_size.clone(),
        });
        Ok(SyncSettings {
            root_domain: required(&self.root_domain, "CRUDGEN_ROOT_DOMAIN")?,
            cluster_issuer: required(
                &self.cluster_issuer,
                "CRUDGEN_CLUSTER_ISSUER",
            )?,
            autoscaler: self.features.autoscaler,
            database,
        })
    }

    /// Bind address of the HTTP endpoint. A bare `:port` binds every
    /// interface.
    pub fn metrics_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = match self.metrics_addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.metrics_addr.clone(),
        };
        addr.parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::MetricsAddr {
                addr: self.metrics_addr.clone(),
                reason: e.to_string(),
            })
    }

    pub fn requeue_error(&self) -> Duration {
        Duration::from_secs(self.requeue_error_secs)
    }

    pub fn leader_identity(&self) -> Result<String, ConfigError> {
        self.leader
            .identity
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingIdentity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> OrchestratorConfig {
        OrchestratorConfig {
            root_domain: Some("example.com".into()),
            cluster_issuer: Some("letsencrypt".into()),
            metrics_addr: "0.0.0.0:8080".into(),
            requeue_error_secs: 15,
            features: FeaturesConfig::default(),
            database: DatabaseConfig {
                config_map: "pgconfig".into(),
                secret: None,
                storage_class: "hiops".into(),
                storage_size: "3G".into(),
            },
            leader: LeaderConfig {
                enabled: false,
                namespace: "default".into(),
                lease_name: "335d05c5.crudgen.org".into(),
                lease_duration_secs: 15,
                identity: None,
            },
        }
    }

    #[test]
    fn valid_config_yields_sync_settings() {
        let cfg = base();
        assert_eq!(cfg.validate(), Ok(()));
        let settings = cfg.sync_settings().unwrap();
        assert_eq!(settings, SyncSettings::new("example.com", "letsencrypt"));
    }

    #[test]
    fn root_domain_is_required() {
        let mut cfg = base();
        cfg.root_domain = None;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Missing("CRUDGEN_ROOT_DOMAIN"))
        );
        cfg.root_domain = Some("  ".into());
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Missing("CRUDGEN_ROOT_DOMAIN"))
        );
    }

    #[test]
    fn cluster_issuer_is_required() {
        let mut cfg = base();
        cfg.cluster_issuer = None;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.to_string(), "CRUDGEN_CLUSTER_ISSUER must be set");
    }

    #[test]
    fn bare_port_metrics_addr_binds_all_interfaces() {
        let mut cfg = base();
        cfg.metrics_addr = ":8080".into();
        assert!(cfg.validate().is_ok());
        assert_eq!(
            cfg.metrics_socket_addr().unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn malformed_metrics_addr_is_rejected() {
        let mut cfg = base();
        cfg.metrics_addr = "localhost".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MetricsAddr { .. })
        ));
    }

    #[test]
    fn features_shape_sync_settings() {
        let mut cfg = base();
        cfg.features.autoscaler = true;
        cfg.features.database = true;
        cfg.database.secret = Some("pg-credentials".into());
        let settings = cfg.sync_settings().unwrap();
        assert!(settings.autoscaler);
        let db = settings.database.unwrap();
        assert_eq!(db.secret.as_deref(), Some("pg-credentials"));
        assert_eq!(db.storage_size, "3G");
    }

    #[test]
    fn leader_election_needs_identity() {
        let mut cfg = base();
        cfg.leader.enabled = true;
        cfg.leader.identity = Some("crudgen-0".into());
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.leader_identity().unwrap(), "crudgen-0");
        cfg.leader.lease_duration_secs = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Zero { .. })));
    }
}
