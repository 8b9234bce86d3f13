//! HTTP adapter for the repository manager's REST API.
//!
//! One client implements every repository-manager capability:
//! - System status and configuration import/export
//! - Repository CRUD
//! - Artifact resolve/deploy/retrieve
//! - Artifact properties
//! - Plugin install, reload and status

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::capabilities::{
    ArtifactGateway, PluginGateway, PropertiesGateway, RepositoryGateway, SystemGateway,
};
use crate::error::{GatewayError, GatewayResult};
use crate::http::{check_response, join_url};
use crate::types::{
    is_plugin_property, ArtifactRef, ArtifactSource, Health, PluginStatus, Properties, RepositoryClass,
    RepositoryDescriptor,
};

/// Default Maven-layout remote used to resolve coordinates.
pub const DEFAULT_MAVEN_REMOTE: &str = "https://repo1.maven.org/maven2";

/// Repository manager API client.
#[derive(Debug, Clone)]
pub struct RepositoryManagerClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    maven_remote: String,
}

impl RepositoryManagerClient {
    /// Create a client on top of a shared `reqwest::Client`.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            maven_remote: DEFAULT_MAVEN_REMOTE.to_string(),
        }
    }

    /// Resolve Maven coordinates against a different remote.
    pub fn with_maven_remote(mut self, maven_remote: impl Into<String>) -> Self {
        self.maven_remote = maven_remote.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn storage_url(&self, artifact: &ArtifactRef) -> String {
        self.url(&format!(
            "/api/storage/{}/{}",
            artifact.repository, artifact.path
        ))
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        debug!(method = %method, url = %url, "Repository manager request");
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }
}

#[async_trait]
impl SystemGateway for RepositoryManagerClient {
    async fn status(&self) -> GatewayResult<Health> {
        let response = self
            .request(reqwest::Method::GET, self.url("/api/system/ping"))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() && body.trim() == "OK" {
            Ok(Health::Healthy)
        } else {
            Ok(Health::Unhealthy(format!("{status}: {}", body.trim())))
        }
    }

    async fn import_config(&self, config: Bytes) -> GatewayResult<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                self.url("/api/system/configuration"),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(config)
            .send()
            .await?;
        check_response(response, "import configuration").await?;

        info!("Imported system configuration");
        Ok(())
    }

    async fn export_config(&self) -> GatewayResult<Bytes> {
        let response = self
            .request(reqwest::Method::GET, self.url("/api/system/configuration"))
            .send()
            .await?;
        let response = check_response(response, "export configuration").await?;

        Ok(response.bytes().await?)
    }
}

/// Repository entry as returned by the list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositorySummary {
    key: String,
    #[serde(rename = "type")]
    rclass: String,
    package_type: String,
    #[serde(default)]
    description: Option<String>,
}

impl RepositorySummary {
    fn into_descriptor(self) -> GatewayResult<RepositoryDescriptor> {
        let rclass: RepositoryClass = self.rclass.parse().map_err(GatewayError::Decode)?;
        Ok(RepositoryDescriptor {
            key: self.key,
            rclass,
            package_type: self.package_type.to_ascii_lowercase(),
            description: self.description.filter(|d| !d.is_empty()),
            settings: BTreeMap::new(),
        })
    }
}

#[async_trait]
impl RepositoryGateway for RepositoryManagerClient {
    async fn create_or_update(&self, descriptor: &RepositoryDescriptor) -> GatewayResult<()> {
        let exists = self
            .list()
            .await?
            .iter()
            .any(|repository| repository.key == descriptor.key);

        // Creation is a PUT, updating an existing key is a POST.
        let method = if exists {
            reqwest::Method::POST
        } else {
            reqwest::Method::PUT
        };
        let response = self
            .request(
                method,
                self.url(&format!("/api/repositories/{}", descriptor.key)),
            )
            .json(descriptor)
            .send()
            .await?;
        check_response(response, "create or update repository").await?;

        info!(repository = %descriptor.key, updated = exists, "Repository written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                self.url(&format!("/api/repositories/{key}")),
            )
            .send()
            .await?;
        check_response(response, "delete repository").await?;

        info!(repository = %key, "Repository deleted");
        Ok(())
    }

    async fn list(&self) -> GatewayResult<Vec<RepositoryDescriptor>> {
        let response = self
            .request(reqwest::Method::GET, self.url("/api/repositories"))
            .send()
            .await?;
        let response = check_response(response, "list repositories").await?;

        let summaries: Vec<RepositorySummary> = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        summaries
            .into_iter()
            .map(RepositorySummary::into_descriptor)
            .collect()
    }
}

/// Deploy response body.
#[derive(Debug, Deserialize)]
struct DeployResponse {
    repo: String,
    path: String,
}

#[async_trait]
impl ArtifactGateway for RepositoryManagerClient {
    async fn resolve(&self, source: &ArtifactSource) -> GatewayResult<Bytes> {
        let url = source.url(&self.maven_remote);
        debug!(url = %url, "Resolving fixture artifact");

        // Public sources are fetched without repository manager credentials.
        let response = self.client.get(&url).send().await?;
        let response = check_response(response, "resolve artifact").await?;

        Ok(response.bytes().await?)
    }

    async fn deploy(
        &self,
        repository: &str,
        path: &str,
        content: Bytes,
    ) -> GatewayResult<ArtifactRef> {
        let sha256 = hex::encode(Sha256::digest(&content));
        let url = self.url(&format!("/{repository}/{}", path.trim_start_matches('/')));

        let response = self
            .request(reqwest::Method::PUT, url)
            .header("X-Checksum-Sha256", sha256)
            .body(content)
            .send()
            .await?;
        let response = check_response(response, "deploy artifact").await?;

        let deployed: DeployResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(ArtifactRef::new(deployed.repo, deployed.path))
    }

    async fn retrieve(&self, artifact: &ArtifactRef) -> GatewayResult<Bytes> {
        let response = self
            .request(
                reqwest::Method::GET,
                self.url(&format!("/{}/{}", artifact.repository, artifact.path)),
            )
            .send()
            .await?;
        let response = check_response(response, "retrieve artifact").await?;

        Ok(response.bytes().await?)
    }
}

/// Property response body.
#[derive(Debug, Deserialize)]
struct PropertiesResponse {
    #[serde(default)]
    properties: BTreeMap<String, Vec<String>>,
}

/// Escape the characters the property matrix syntax reserves.
fn escape_property_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',' | '|' | '=' | ';') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn encode_properties(properties: &Properties) -> String {
    properties
        .iter()
        .map(|(key, value)| format!("{key}={}", escape_property_value(value)))
        .collect::<Vec<_>>()
        .join(";")
}

#[async_trait]
impl PropertiesGateway for RepositoryManagerClient {
    async fn get(&self, artifact: &ArtifactRef) -> GatewayResult<Properties> {
        let response = self
            .request(
                reqwest::Method::GET,
                format!("{}?properties", self.storage_url(artifact)),
            )
            .send()
            .await?;

        let response = match check_response(response, "get properties").await {
            Ok(response) => response,
            // No properties and no artifact look the same to the caller.
            Err(e) if e.is_not_found() => return Ok(Properties::new()),
            Err(e) => return Err(e),
        };

        let body: PropertiesResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(body
            .properties
            .into_iter()
            .map(|(key, values)| (key, values.join(",")))
            .collect())
    }

    async fn set(&self, artifact: &ArtifactRef, properties: &Properties) -> GatewayResult<()> {
        if properties.is_empty() {
            return Ok(());
        }

        let response = self
            .request(reqwest::Method::PUT, self.storage_url(artifact))
            .query(&[
                ("properties", encode_properties(properties)),
                ("recursive", "0".to_string()),
            ])
            .send()
            .await?;
        check_response(response, "set properties").await?;

        Ok(())
    }

    async fn clear(&self, artifact: &ArtifactRef) -> GatewayResult<()> {
        let existing = self.get(artifact).await?;
        let keys: Vec<&str> = existing
            .keys()
            .map(String::as_str)
            .filter(|key| is_plugin_property(key))
            .collect();
        if keys.is_empty() {
            return Ok(());
        }

        let keys = keys.join(",");
        let response = self
            .request(reqwest::Method::DELETE, self.storage_url(artifact))
            .query(&[("properties", keys), ("recursive", "0".to_string())])
            .send()
            .await?;

        match check_response(response, "clear properties").await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl PluginGateway for RepositoryManagerClient {
    async fn install(&self, package: Bytes, log_level: &str) -> GatewayResult<()> {
        let response = self
            .request(reqwest::Method::PUT, self.url("/api/plugins/package"))
            .query(&[("logLevel", log_level)])
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(package)
            .send()
            .await?;
        check_response(response, "install plugin").await?;

        Ok(())
    }

    async fn reload(&self) -> GatewayResult<()> {
        let response = self
            .request(reqwest::Method::POST, self.url("/api/plugins/reload"))
            .send()
            .await?;
        check_response(response, "reload plugins").await?;

        Ok(())
    }

    async fn status(&self) -> GatewayResult<PluginStatus> {
        let response = self
            .request(
                reqwest::Method::GET,
                self.url("/api/plugins/execute/pvtPluginStatus"),
            )
            .send()
            .await?;
        let response = check_response(response, "plugin status").await?;

        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_encoding_escapes_reserved() {
        let mut properties = Properties::new();
        properties.insert("a".into(), "x=y".into());
        properties.insert("b".into(), "plain".into());
        assert_eq!(encode_properties(&properties), "a=x\\=y;b=plain");
    }

    #[test]
    fn test_summary_into_descriptor() {
        let summary = RepositorySummary {
            key: "test-repo".into(),
            rclass: "LOCAL".into(),
            package_type: "Maven".into(),
            description: Some(String::new()),
        };
        let descriptor = summary.into_descriptor().unwrap();
        assert_eq!(descriptor.rclass, RepositoryClass::Local);
        assert_eq!(descriptor.package_type, "maven");
        assert!(descriptor.description.is_none());
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = RepositoryManagerClient::new(
            reqwest::Client::new(),
            "http://localhost:8081/artifactory/",
            "admin",
            "password",
        );
        assert_eq!(client.base_url(), "http://localhost:8081/artifactory");
        assert_eq!(
            client.url("/api/system/ping"),
            "http://localhost:8081/artifactory/api/system/ping"
        );
    }
}
