use crate::compose::LaunchConfiguration;
use crate::error::HealthCheckError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Transient cluster setting used to drain shards off a node before removal
pub const ALLOCATION_EXCLUDE_SETTING: &str = "cluster.routing.allocation.exclude._name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Green,
    Yellow,
    Red,
}

/// The subset of `_cluster/health` the supervisor acts on
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterHealth {
    #[serde(default)]
    pub cluster_name: Option<String>,
    pub status: ClusterStatus,
    #[serde(default)]
    pub discovered_cluster_manager: bool,
    /// Pre-2.0 name of the same flag
    #[serde(default)]
    pub discovered_master: bool,
    #[serde(default)]
    pub number_of_nodes: u64,
    #[serde(default)]
    pub relocating_shards: u64,
}

impl ClusterHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status, ClusterStatus::Green | ClusterStatus::Yellow)
    }

    /// Whether the node sees an elected cluster manager
    pub fn has_leader(&self) -> bool {
        self.discovered_cluster_manager || self.discovered_master
    }
}

/// REST calls the supervisor makes against its own node
#[async_trait]
pub trait ClusterHealthClient: Send + Sync {
    async fn cluster_health(&self) -> Result<ClusterHealth, HealthCheckError>;

    /// Current transient allocation exclusion, if any
    async fn allocation_exclusion(&self) -> Result<Option<String>, HealthCheckError>;

    /// Set the allocation exclusion to `node`, or clear it with `None`
    async fn set_allocation_exclusion(&self, node: Option<&str>) -> Result<(), HealthCheckError>;
}

/// `ClusterHealthClient` over the node's HTTP(S) endpoint
#[derive(Clone)]
pub struct RestClusterClient {
    base_url: String,
    credentials: Option<(String, String)>,
    http: reqwest::Client,
}

impl RestClusterClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Option<(String, String)>,
        trust_anchors: &[Vec<u8>],
    ) -> Result<Self, HealthCheckError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        for der in trust_anchors {
            let certificate = reqwest::Certificate::from_der(der)
                .map_err(|e| HealthCheckError::Transport(format!("invalid trust anchor: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder
            .build()
            .map_err(|e| HealthCheckError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            http,
        })
    }

    /// Client for the node a launch configuration describes
    pub fn for_launch(launch: &LaunchConfiguration, timeout: Duration) -> Result<Self, HealthCheckError> {
        Self::new(
            launch.rest_base_url(),
            timeout,
            launch.rest_credentials.clone(),
            &launch.trust_anchors(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .http
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value, HealthCheckError> {
        let response = request
            .send()
            .await
            .map_err(|e| HealthCheckError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HealthCheckError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| HealthCheckError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ClusterHealthClient for RestClusterClient {
    async fn cluster_health(&self) -> Result<ClusterHealth, HealthCheckError> {
        let body = self
            .send_json(self.request(reqwest::Method::GET, "_cluster/health"))
            .await?;
        serde_json::from_value(body).map_err(|e| HealthCheckError::Decode(e.to_string()))
    }

    async fn allocation_exclusion(&self) -> Result<Option<String>, HealthCheckError> {
        let body = self
            .send_json(self.request(reqwest::Method::GET, "_cluster/settings?flat_settings=true"))
            .await?;

        Ok(body
            .get("transient")
            .and_then(|t| t.get(ALLOCATION_EXCLUDE_SETTING))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string))
    }

    async fn set_allocation_exclusion(&self, node: Option<&str>) -> Result<(), HealthCheckError> {
        debug!("Setting {} to {:?}", ALLOCATION_EXCLUDE_SETTING, node);
        let body = json!({ "transient": { ALLOCATION_EXCLUDE_SETTING: node } });
        let response = self
            .send_json(self.request(reqwest::Method::PUT, "_cluster/settings").json(&body))
            .await?;

        match response.get("acknowledged").and_then(Value::as_bool) {
            Some(true) => Ok(()),
            _ => Err(HealthCheckError::Decode(
                "cluster settings update was not acknowledged".to_string(),
            )),
        }
    }
}
