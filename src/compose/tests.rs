use super::*;
use crate::config::SupervisorConfig;
use crate::secrets::{FilesystemCertificateSource, KeystoreKind, TRUSTSTORE_FILE};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const GB: u64 = 1024 * 1024 * 1024;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Config rooted in a temp dir with a minimal distribution
fn test_config(root: &Path) -> SupervisorConfig {
    let distribution = root.join("dist");
    fs::create_dir_all(distribution.join("config/opensearch-security")).unwrap();
    fs::write(distribution.join("config/jvm.options"), "-XX:+UseG1GC\n").unwrap();
    fs::write(distribution.join("config/opensearch.yml"), "bundled: true\n").unwrap();
    fs::write(
        distribution.join("config/opensearch-security/roles.yml"),
        "_meta: {}\n",
    )
    .unwrap();

    let mut config = SupervisorConfig::default();
    config.paths.distribution = distribution.display().to_string();
    config.paths.config_dir = root.join("config").display().to_string();
    config.paths.data_dir = root.join("data").display().to_string();
    config.paths.logs_dir = root.join("logs").display().to_string();
    config
}

fn composer(config: &SupervisorConfig, env: Vec<(&str, &str)>, usable: u64) -> ConfigurationComposer {
    let env = env
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()));
    let contributors: Vec<Box<dyn Contributor>> = vec![
        Box::new(EnvironmentContributor::new("opensearch", env).unwrap()),
        Box::new(DefaultFilesContributor::new(config.distribution_dir().join("config"))),
        Box::new(ClusterContributor::new(
            config,
            Arc::new(StaticNodeRegistry::default()),
        )),
        Box::new(CommonSettingsContributor::new(config)),
        Box::new(SearchRoleContributor::new(
            config,
            Arc::new(FixedDiskSpace(usable)),
        )),
        Box::new(SecurityContributor::new(config, SecretsProvisioner::insecure())),
    ];
    ConfigurationComposer::new(config, contributors)
}

#[test]
fn test_contributors_run_in_stage_order() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let composer = composer(&config, vec![], 100 * GB);

    assert_eq!(
        composer.stages(),
        vec![
            Stage::DefaultFiles,
            Stage::Cluster,
            Stage::Common,
            Stage::SearchRole,
            Stage::Security,
            Stage::Environment,
        ]
    );
    assert!(Stage::DefaultFiles < Stage::Environment);
    assert!(Stage::Environment < Stage::OverridesFile);
}

#[test]
fn test_common_settings() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path());
    config.node.network_host = Some("10.0.0.5".to_string());
    let launch = composer(&config, vec![], 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();

    let p = &launch.properties;
    assert_eq!(p["cluster.name"], "datanode-cluster");
    assert_eq!(p["node.name"], "node1");
    assert_eq!(p["http.port"], "9200");
    assert_eq!(p["transport.port"], "9300");
    assert_eq!(p["network.host"], "10.0.0.5");
    assert_eq!(p["action.auto_create_index"], "false");
    assert_eq!(p["indices.query.bool.max_clause_count"], "32768");
    assert!(p["path.data"].ends_with("node1"));
    assert!(launch.java_opts.contains(&"-Xms1g".to_string()));
    assert!(launch.java_opts.contains(&"-Xmx1g".to_string()));
}

#[test]
fn test_composition_is_deterministic() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let env = vec![
        ("opensearch.custom.b", "2"),
        ("opensearch.custom.a", "1"),
        ("opensearch.indices.memory.index_buffer_size", "20%"),
    ];

    let first = composer(&config, env.clone(), 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();
    let second = composer(&config, env, 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();

    assert_eq!(first.properties, second.properties);
    assert_eq!(first.warnings, second.warnings);
    assert_eq!(first.config_files.len(), second.config_files.len());
}

#[test]
fn test_passthrough_warns_once_per_unlisted_key() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let launch = composer(
        &config,
        vec![
            ("opensearch.custom.setting", "on"),
            ("opensearch.indices.memory.index_buffer_size", "20%"),
            ("opensearch.single", "ignored"),
            ("OPENSEARCH_HOME", "/opt"),
        ],
        100 * GB,
    )
    .compose(&BuildParams::default())
    .unwrap();

    assert_eq!(launch.properties["custom.setting"], "on");
    assert_eq!(launch.properties["indices.memory.index_buffer_size"], "20%");
    assert!(!launch.properties.contains_key("single"));

    let custom: Vec<_> = launch
        .warnings
        .iter()
        .filter(|w| w.contains("custom.setting"))
        .collect();
    assert_eq!(custom.len(), 1);
    assert!(!launch.warnings.iter().any(|w| w.contains("indices.memory")));
}

#[test]
fn test_environment_skips_names_with_invalid_characters() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let launch = composer(
        &config,
        vec![
            ("opensearch.node.attr.zone-a", "x"),
            ("opensearch.node.attr.rack", "r1"),
        ],
        100 * GB,
    )
    .compose(&BuildParams::default())
    .unwrap();

    assert!(!launch.properties.contains_key("node.attr.zone-a"));
    assert_eq!(launch.properties["node.attr.rack"], "r1");
    assert!(!launch.warnings.iter().any(|w| w.contains("zone-a")));
}

#[test]
fn test_environment_overrides_earlier_contributors() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let launch = composer(&config, vec![("opensearch.http.port", "9999")], 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();

    assert_eq!(launch.properties["http.port"], "9999");
    assert_eq!(launch.warnings.len(), 1);
}

#[test]
fn test_passthrough_filter() {
    let filter = PassthroughFilter::new("opensearch").unwrap();
    assert_eq!(
        filter.extract("opensearch.node.attr.zone"),
        Some("node.attr.zone".to_string())
    );
    assert_eq!(filter.extract("opensearch.zone"), None);
    assert_eq!(filter.extract("opensearchx.node.attr"), None);
    assert_eq!(filter.extract("other.node.attr"), None);
    assert_eq!(filter.extract("opensearch.node.attr.zone-a"), None);
    assert_eq!(filter.extract("opensearch.indices.foo bar: baz"), None);
    assert!(filter.is_allowed("node.attr.zone"));
    assert!(filter.is_allowed("cluster.routing.allocation.disk.threshold_enabled"));
    assert!(!filter.is_allowed("plugins.security.disabled"));
}

#[test]
fn test_overrides_file() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("overrides.properties");
    fs::write(
        &path,
        "# comment\n\
         opensearch.logger.org.opensearch = debug\n\
         opensearch.plugins.security.audit.type=noop\n\
         cluster.name=elsewhere\n",
    )
    .unwrap();

    let contributor = OverridesFileContributor::new(&path, "opensearch").unwrap();
    let contribution = contributor.contribute(&BuildParams::default()).unwrap();

    assert_eq!(contribution.properties["logger.org.opensearch"], "debug");
    assert_eq!(contribution.properties["plugins.security.audit.type"], "noop");
    assert!(!contribution.properties.contains_key("cluster.name"));
    assert_eq!(contribution.warnings.len(), 2);
    assert!(contribution.warnings.iter().any(|w| w.contains("plugins.security.audit.type")));
    assert!(contribution.warnings.iter().any(|w| w.contains("cluster.name")));
}

#[test]
fn test_overrides_file_ignores_partially_matching_keys() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("overrides.properties");
    fs::write(
        &path,
        "opensearch.indices.foo bar: baz=y\n\
         opensearch.node.attr.zone-a=x\n\
         opensearch.node.attr.zone=a\n",
    )
    .unwrap();

    let contributor = OverridesFileContributor::new(&path, "opensearch").unwrap();
    let contribution = contributor.contribute(&BuildParams::default()).unwrap();

    assert_eq!(contribution.properties.len(), 1);
    assert_eq!(contribution.properties["node.attr.zone"], "a");
    assert_eq!(contribution.warnings.len(), 2);
    assert!(contribution
        .warnings
        .iter()
        .any(|w| w.contains("opensearch.indices.foo bar: baz") && w.contains("ignored")));
    assert!(contribution
        .warnings
        .iter()
        .any(|w| w.contains("opensearch.node.attr.zone-a") && w.contains("ignored")));
}

#[test]
fn test_overrides_file_errors_are_fatal() {
    let root = TempDir::new().unwrap();
    let missing = OverridesFileContributor::new(root.path().join("missing"), "opensearch").unwrap();
    assert!(matches!(
        missing.contribute(&BuildParams::default()),
        Err(ConfigurationError::Io { .. })
    ));

    let path = root.path().join("broken");
    fs::write(&path, "no separator here\n").unwrap();
    let broken = OverridesFileContributor::new(&path, "opensearch").unwrap();
    assert!(matches!(
        broken.contribute(&BuildParams::default()),
        Err(ConfigurationError::Contributor { .. })
    ));
}

#[test]
fn test_search_role_requires_snapshot_repository() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let launch = composer(&config, vec![], 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();

    assert!(!launch.node_roles.contains("search"));
    assert!(!launch.properties["node.roles"].contains("search"));
    assert!(launch.properties["node.roles"].contains("data"));
    assert!(!launch.properties.contains_key("node.search.cache.size"));
}

#[test]
fn test_search_role_enabled_with_repository() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path());
    config.paths.repo = vec!["/mnt/snapshots".to_string()];
    let launch = composer(&config, vec![], 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();

    assert!(launch.node_roles.contains("search"));
    assert_eq!(launch.properties["path.repo"], "/mnt/snapshots");
    assert_eq!(launch.properties["node.search.cache.size"], "10gb");
    assert!(launch.warnings.is_empty());
}

#[test]
fn test_cache_larger_than_disk_aborts_composition() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path());
    config.search.object_storage = true;
    config.search.cache_size = "10GB".to_string();

    let result = composer(&config, vec![], 5_368_709_120).compose(&BuildParams::default());
    assert!(matches!(
        result,
        Err(ConfigurationError::InsufficientDiskSpace { .. })
    ));
}

#[test]
fn test_cache_close_to_disk_limit_warns() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path());
    config.search.object_storage = true;
    config.search.cache_size = "9GB".to_string();

    let launch = composer(&config, vec![], 10 * GB)
        .compose(&BuildParams::default())
        .unwrap();
    assert_eq!(launch.warnings.len(), 1);
}

#[test]
fn test_malformed_cache_size_aborts_composition() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path());
    config.search.object_storage = true;
    config.search.cache_size = "10".to_string();

    let result = composer(&config, vec![], 100 * GB).compose(&BuildParams::default());
    assert!(matches!(result, Err(ConfigurationError::MalformedSize { .. })));
}

#[test]
fn test_cluster_single_node() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path());
    config.node.single_node = true;
    let contributor = ClusterContributor::new(&config, Arc::new(StaticNodeRegistry::default()));
    let contribution = contributor.contribute(&BuildParams::default()).unwrap();

    assert_eq!(contribution.properties["discovery.type"], "single-node");
    assert!(contribution.config_files.is_empty());
}

#[test]
fn test_cluster_seed_hosts_from_registry() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path());
    config.node.seed_hosts = vec!["static:9300".to_string()];
    config.node.initial_cluster_manager_nodes = vec!["node1".to_string(), "node2".to_string()];
    let registry = StaticNodeRegistry::new(vec![
        "node3:9300".to_string(),
        "localhost:9300".to_string(),
        "node2:9300".to_string(),
    ]);
    let contribution = ClusterContributor::new(&config, Arc::new(registry))
        .contribute(&BuildParams::default())
        .unwrap();

    assert_eq!(contribution.properties["discovery.seed_providers"], "file");
    assert_eq!(
        contribution.properties["cluster.initial_cluster_manager_nodes"],
        "node1,node2"
    );
    let file = &contribution.config_files[0];
    assert_eq!(file.relative_path, PathBuf::from(UNICAST_HOSTS_FILE));
    assert_eq!(
        file.source,
        ContentSource::Inline(b"node2:9300\nnode3:9300\n".to_vec())
    );
}

#[test]
fn test_cluster_seed_hosts_static_fallback() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path());
    config.node.seed_hosts = vec!["static:9300".to_string()];
    let contribution = ClusterContributor::new(&config, Arc::new(StaticNodeRegistry::default()))
        .contribute(&BuildParams::default())
        .unwrap();

    assert!(!contribution
        .properties
        .contains_key("cluster.initial_cluster_manager_nodes"));
    assert_eq!(
        contribution.config_files[0].source,
        ContentSource::Inline(b"static:9300\n".to_vec())
    );
}

#[test]
fn test_insecure_launch() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let launch = composer(&config, vec![], 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();

    assert!(!launch.security_configured);
    assert_eq!(launch.properties["plugins.security.disabled"], "true");
    assert_eq!(launch.properties["plugins.security.ssl.http.enabled"], "false");
    assert!(launch.rest_base_url().starts_with("http://"));
    assert!(launch.keystore(KeystoreKind::Truststore).is_some());
    assert!(launch.keystore(KeystoreKind::Http).is_none());
}

#[test]
fn test_secured_launch_keeps_passwords_out_of_properties() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let source = FilesystemCertificateSource::new(fixtures())
        .with_http("node.p12", "changeit")
        .with_transport("node.p12", "changeit");
    let provisioner = SecretsProvisioner::new(vec![Box::new(source)]);
    let contributors: Vec<Box<dyn Contributor>> =
        vec![Box::new(SecurityContributor::new(&config, provisioner))];
    let launch = ConfigurationComposer::new(&config, contributors)
        .compose(&BuildParams::default())
        .unwrap();

    assert!(launch.security_configured);
    assert!(launch.rest_base_url().starts_with("https://"));
    let p = &launch.properties;
    assert_eq!(p["plugins.security.disabled"], "false");
    assert_eq!(p["plugins.security.ssl.http.keystore_filepath"], "http-keystore.p12");
    assert_eq!(
        p["plugins.security.ssl.transport.keystore_filepath"],
        "transport-keystore.p12"
    );
    assert_eq!(p["plugins.security.ssl.http.truststore_filepath"], TRUSTSTORE_FILE);
    assert_eq!(p["plugins.security.ssl.http.keystore_alias"], "datanode");
    assert_eq!(p["plugins.security.ssl.http.clientauth_mode"], "OPTIONAL");

    assert_eq!(launch.keystore_entries.len(), 4);
    for secret in launch.keystore_entries.values() {
        assert!(!p.values().any(|v| v.contains(secret.as_str())));
    }
    assert!(launch
        .java_opts
        .iter()
        .any(|o| o.starts_with("-Djavax.net.ssl.trustStore=")));
    assert!(!launch.trust_anchors().is_empty());
}

#[test]
fn test_materialize_writes_config_dir() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let launch = composer(&config, vec![], 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();
    launch.materialize().unwrap();

    let config_dir = config.config_dir();
    assert!(config_dir.join("jvm.options").exists());
    assert!(config_dir.join("opensearch-security/roles.yml").exists());
    assert!(config_dir.join(UNICAST_HOSTS_FILE).exists());
    assert!(config_dir.join(TRUSTSTORE_FILE).exists());

    let rendered = fs::read_to_string(config_dir.join(PROPERTIES_FILE)).unwrap();
    assert!(!rendered.contains("bundled"));
    let parsed: BTreeMap<String, String> = serde_yaml::from_str(&rendered).unwrap();
    assert_eq!(parsed, launch.properties);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(config_dir.join(TRUSTSTORE_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    // regenerated, not patched
    launch.materialize().unwrap();
    let again = fs::read_to_string(config_dir.join(PROPERTIES_FILE)).unwrap();
    assert_eq!(rendered, again);
}

#[test]
fn test_process_environment() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let launch = composer(&config, vec![], 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();
    let env = launch.environment();

    assert!(env["OPENSEARCH_JAVA_HOME"].ends_with("jdk"));
    assert_eq!(env["JAVA_HOME"], env["OPENSEARCH_JAVA_HOME"]);
    assert_eq!(env["OPENSEARCH_PATH_CONF"], config.paths.config_dir);
    assert!(env["OPENSEARCH_JAVA_OPTS"].contains("-Xmx1g"));
}

#[test]
fn test_missing_distribution_is_fatal() {
    let contributor = DefaultFilesContributor::new("/nonexistent/distribution/config");
    assert!(matches!(
        contributor.contribute(&BuildParams::default()),
        Err(ConfigurationError::Io { .. })
    ));
}

#[test]
fn test_report_redacts_secure_settings() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let launch = composer(&config, vec![("opensearch.custom.x", "1")], 100 * GB)
        .compose(&BuildParams::default())
        .unwrap();
    let report = launch.report();

    assert!(report.contains("node: node1"));
    assert!(report.contains("<redacted>"));
    assert!(report.contains("custom.x"));
    for secret in launch.keystore_entries.values() {
        assert!(!report.contains(secret.as_str()));
    }
}
