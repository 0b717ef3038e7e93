use super::{BuildParams, ConfigFile, Contribution, Contributor, Stage};
use crate::config::SupervisorConfig;
use crate::error::ConfigurationError;
use crate::secrets::{
    KeystoreMaterial, ProvisionedSecrets, SecretsProvisioner, TRUSTSTORE_FILE,
};
use std::path::PathBuf;
use tracing::{info, warn};

const SYSTEM_INDICES: &str = ".plugins-ml-model,.plugins-ml-task,.opendistro-alerting-config,\
.opendistro-alerting-alert*,.opendistro-anomaly-results*,.opendistro-anomaly-detector*,\
.opendistro-anomaly-checkpoints,.opendistro-anomaly-detection-state,.opendistro-reports-*,\
.opensearch-notifications-*,.opensearch-notebooks,.opensearch-observability,\
.opendistro-asynchronous-search-response*,.replication-metadata-store";

/// TLS keystores, truststore and access-control defaults
pub struct SecurityContributor {
    insecure_startup: bool,
    audit_type: Option<String>,
    config_dir: PathBuf,
    provisioner: SecretsProvisioner,
}

impl SecurityContributor {
    pub fn new(config: &SupervisorConfig, provisioner: SecretsProvisioner) -> Self {
        Self {
            insecure_startup: config.security.insecure_startup,
            audit_type: config
                .security
                .audit_type
                .clone()
                .filter(|t| !t.trim().is_empty()),
            config_dir: config.config_dir(),
            provisioner,
        }
    }

    fn secured_properties(
        &self,
        http: &KeystoreMaterial,
        transport: &KeystoreMaterial,
    ) -> Contribution {
        let mut contribution = Contribution::new()
            .property("plugins.security.disabled", "false")
            .property("plugins.security.nodes_dn", "CN=*")
            .property("plugins.security.allow_default_init_securityindex", "true")
            .property("plugins.security.enable_snapshot_restore_privilege", "true")
            .property("plugins.security.check_snapshot_restore_write_privileges", "true")
            .property(
                "plugins.security.restapi.roles_enabled",
                "all_access,security_rest_api_access,readall",
            )
            .property("plugins.security.system_indices.enabled", "true")
            .property("plugins.security.system_indices.indices", SYSTEM_INDICES);

        for (layer, material) in [("transport", transport), ("http", http)] {
            let prefix = format!("plugins.security.ssl.{}", layer);
            contribution = contribution
                .property(format!("{}.keystore_type", prefix), material.format().as_str())
                .property(format!("{}.keystore_filepath", prefix), material.file_name())
                .property(
                    format!("{}.keystore_alias", prefix),
                    material.alias().unwrap_or_default(),
                )
                .property(format!("{}.truststore_type", prefix), "PKCS12")
                .property(format!("{}.truststore_filepath", prefix), TRUSTSTORE_FILE);
        }

        contribution
            .property("plugins.security.ssl.http.enabled", "true")
            .property("plugins.security.ssl.http.clientauth_mode", "OPTIONAL")
    }

    fn keystore_entries(&self, secrets: &ProvisionedSecrets) -> Vec<(String, String)> {
        let truststore_password = secrets.truststore.password().to_string();
        let mut entries = vec![
            (
                "plugins.security.ssl.transport.truststore_password_secure".to_string(),
                truststore_password.clone(),
            ),
            (
                "plugins.security.ssl.http.truststore_password_secure".to_string(),
                truststore_password,
            ),
        ];
        if let Some(http) = &secrets.http {
            entries.push((
                "plugins.security.ssl.http.keystore_password_secure".to_string(),
                http.password().to_string(),
            ));
        }
        if let Some(transport) = &secrets.transport {
            entries.push((
                "plugins.security.ssl.transport.keystore_password_secure".to_string(),
                transport.password().to_string(),
            ));
        }
        entries
    }
}

impl Contributor for SecurityContributor {
    fn name(&self) -> &'static str {
        "security"
    }

    fn stage(&self) -> Stage {
        Stage::Security
    }

    fn contribute(&self, params: &BuildParams) -> Result<Contribution, ConfigurationError> {
        let secrets = if self.insecure_startup {
            warn!("Insecure startup requested, TLS and access control are disabled");
            SecretsProvisioner::insecure().provision(&params.trusted_certificates)?
        } else {
            self.provisioner.provision(&params.trusted_certificates)?
        };

        let mut contribution = match (&secrets.http, &secrets.transport) {
            (Some(http), Some(transport)) => {
                info!("Security enabled with certificates from {:?}", secrets.source);
                let mut secured = self.secured_properties(http, transport);
                secured.security_configured = true;
                secured
            }
            _ => Contribution::new()
                .property("plugins.security.disabled", "true")
                .property("plugins.security.ssl.http.enabled", "false"),
        };

        contribution = contribution.property("plugins.security.restapi.admin.enabled", "true");
        if let Some(audit_type) = &self.audit_type {
            contribution = contribution.property("plugins.security.audit.type", audit_type);
        }

        let truststore_path = self.config_dir.join(TRUSTSTORE_FILE);
        contribution = contribution
            .java_opt(format!("-Djavax.net.ssl.trustStore={}", truststore_path.display()))
            .java_opt(format!(
                "-Djavax.net.ssl.trustStorePassword={}",
                secrets.truststore.password()
            ))
            .java_opt("-Djavax.net.ssl.trustStoreType=pkcs12");

        contribution.keystore_entries = self.keystore_entries(&secrets).into_iter().collect();

        for material in secrets.materials() {
            contribution.config_files.push(
                ConfigFile::inline(material.file_name(), material.bytes().to_vec()).private(),
            );
            contribution.keystores.push(material.clone());
        }

        Ok(contribution)
    }
}
