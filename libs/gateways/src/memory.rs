//! In-memory simulators of the repository manager, the analysis service and
//! the container runtime.
//!
//! They implement the same capability traits as the HTTP and docker adapters
//! and are used by the orchestrator's tests. Each simulator exposes knobs to
//! script failures and inspection methods to assert on what was called.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::capabilities::{
    AnalysisGateway, ArtifactGateway, ContainerRuntime, PluginGateway, PropertiesGateway,
    RepositoryGateway, SystemGateway,
};
use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    is_plugin_property, ArtifactRef, ArtifactSource, ComponentRecord, Health, InstanceEndpoint, InstanceLaunch,
    PluginStatus, Properties, RepositoryDescriptor, VulnerabilityRecord,
};

/// Leading bytes of a zip archive.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Properties the simulated plugin writes once an artifact has been read
/// `after_reads` times.
#[derive(Debug, Clone)]
struct ScriptedScan {
    properties: Properties,
    after_reads: u32,
    reads: u32,
    applied: bool,
}

#[derive(Debug, Default)]
struct PluginState {
    package: Option<Bytes>,
    log_level: Option<String>,
    loaded: bool,
    installs: u32,
    version: Option<String>,
    config_errors: Vec<String>,
}

#[derive(Debug, Default)]
struct ManagerState {
    unhealthy_polls: u32,
    never_healthy: bool,
    status_calls: u32,
    repositories: BTreeMap<String, RepositoryDescriptor>,
    repository_writes: u32,
    sources: Vec<(ArtifactSource, Bytes)>,
    artifacts: BTreeMap<ArtifactRef, Bytes>,
    properties: BTreeMap<ArtifactRef, Properties>,
    truncate_deploys: bool,
    plugin: PluginState,
    scans: BTreeMap<ArtifactRef, ScriptedScan>,
    imported_configs: Vec<Bytes>,
    exports: u32,
}

/// Simulated repository manager.
#[derive(Debug, Default)]
pub struct InMemoryRepositoryManager {
    state: Mutex<ManagerState>,
}

impl InMemoryRepositoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report unhealthy for the first `polls` status calls.
    pub async fn set_unhealthy_polls(&self, polls: u32) {
        self.state.lock().await.unhealthy_polls = polls;
    }

    /// Never report healthy.
    pub async fn set_never_healthy(&self) {
        self.state.lock().await.never_healthy = true;
    }

    /// Make a fixture resolvable.
    pub async fn register_source(&self, source: ArtifactSource, content: impl Into<Bytes>) {
        self.state.lock().await.sources.push((source, content.into()));
    }

    /// Store one byte less than was uploaded on every deploy.
    pub async fn set_truncate_deploys(&self, truncate: bool) {
        self.state.lock().await.truncate_deploys = truncate;
    }

    /// Plugin configuration errors reported by the status endpoint.
    pub async fn set_plugin_config_errors(&self, errors: Vec<String>) {
        self.state.lock().await.plugin.config_errors = errors;
    }

    /// Script the plugin's scan of `artifact`.
    pub async fn script_scan(&self, artifact: ArtifactRef, properties: Properties, after_reads: u32) {
        self.state.lock().await.scans.insert(
            artifact,
            ScriptedScan {
                properties,
                after_reads,
                reads: 0,
                applied: false,
            },
        );
    }

    /// Write properties directly, as the plugin would.
    pub async fn inject_properties(&self, artifact: &ArtifactRef, properties: Properties) {
        self.state
            .lock()
            .await
            .properties
            .entry(artifact.clone())
            .or_default()
            .extend(properties);
    }

    pub async fn status_calls(&self) -> u32 {
        self.state.lock().await.status_calls
    }

    pub async fn repository_writes(&self) -> u32 {
        self.state.lock().await.repository_writes
    }

    pub async fn repositories(&self) -> Vec<RepositoryDescriptor> {
        self.state.lock().await.repositories.values().cloned().collect()
    }

    pub async fn plugin_installs(&self) -> u32 {
        self.state.lock().await.plugin.installs
    }

    pub async fn plugin_log_level(&self) -> Option<String> {
        self.state.lock().await.plugin.log_level.clone()
    }

    pub async fn imported_configs(&self) -> Vec<Bytes> {
        self.state.lock().await.imported_configs.clone()
    }

    pub async fn exports(&self) -> u32 {
        self.state.lock().await.exports
    }

    pub async fn stored_properties(&self, artifact: &ArtifactRef) -> Properties {
        self.state
            .lock()
            .await
            .properties
            .get(artifact)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SystemGateway for InMemoryRepositoryManager {
    async fn status(&self) -> GatewayResult<Health> {
        let mut state = self.state.lock().await;
        state.status_calls += 1;

        if state.never_healthy {
            return Ok(Health::Unhealthy("starting".to_string()));
        }
        if state.unhealthy_polls > 0 {
            state.unhealthy_polls -= 1;
            return Ok(Health::Unhealthy("starting".to_string()));
        }
        Ok(Health::Healthy)
    }

    async fn import_config(&self, config: Bytes) -> GatewayResult<()> {
        self.state.lock().await.imported_configs.push(config);
        Ok(())
    }

    async fn export_config(&self) -> GatewayResult<Bytes> {
        let mut state = self.state.lock().await;
        state.exports += 1;
        Ok(state
            .imported_configs
            .last()
            .cloned()
            .unwrap_or_else(|| Bytes::from_static(b"<config/>")))
    }
}

#[async_trait]
impl RepositoryGateway for InMemoryRepositoryManager {
    async fn create_or_update(&self, descriptor: &RepositoryDescriptor) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.repository_writes += 1;
        state
            .repositories
            .insert(descriptor.key.clone(), descriptor.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        if state.repositories.remove(key).is_none() {
            return Err(GatewayError::NotFound(format!("repository {key}")));
        }
        state.artifacts.retain(|artifact, _| artifact.repository != key);
        Ok(())
    }

    async fn list(&self) -> GatewayResult<Vec<RepositoryDescriptor>> {
        Ok(self.state.lock().await.repositories.values().cloned().collect())
    }
}

#[async_trait]
impl ArtifactGateway for InMemoryRepositoryManager {
    async fn resolve(&self, source: &ArtifactSource) -> GatewayResult<Bytes> {
        self.state
            .lock()
            .await
            .sources
            .iter()
            .find(|(candidate, _)| candidate == source)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| GatewayError::NotFound(format!("source {}", source.file_name())))
    }

    async fn deploy(
        &self,
        repository: &str,
        path: &str,
        content: Bytes,
    ) -> GatewayResult<ArtifactRef> {
        let mut state = self.state.lock().await;
        if !state.repositories.contains_key(repository) {
            return Err(GatewayError::NotFound(format!("repository {repository}")));
        }

        let artifact = ArtifactRef::new(repository, path);
        let stored = if state.truncate_deploys && !content.is_empty() {
            content.slice(..content.len() - 1)
        } else {
            content
        };
        debug!(artifact = %artifact, bytes = stored.len(), "[MEMORY] Artifact deployed");
        state.artifacts.insert(artifact.clone(), stored);
        Ok(artifact)
    }

    async fn retrieve(&self, artifact: &ArtifactRef) -> GatewayResult<Bytes> {
        self.state
            .lock()
            .await
            .artifacts
            .get(artifact)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("artifact {artifact}")))
    }
}

#[async_trait]
impl PropertiesGateway for InMemoryRepositoryManager {
    async fn get(&self, artifact: &ArtifactRef) -> GatewayResult<Properties> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        // The simulated plugin only scans deployed artifacts once it is loaded.
        let scannable = state.plugin.loaded && state.artifacts.contains_key(artifact);
        if let Some(scan) = state.scans.get_mut(artifact) {
            if scannable && !scan.applied {
                scan.reads += 1;
                if scan.reads >= scan.after_reads {
                    scan.applied = true;
                    state
                        .properties
                        .entry(artifact.clone())
                        .or_default()
                        .extend(scan.properties.clone());
                }
            }
        }

        Ok(state.properties.get(artifact).cloned().unwrap_or_default())
    }

    async fn set(&self, artifact: &ArtifactRef, properties: &Properties) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        if !state.artifacts.contains_key(artifact) {
            return Err(GatewayError::NotFound(format!("artifact {artifact}")));
        }
        state
            .properties
            .entry(artifact.clone())
            .or_default()
            .extend(properties.clone());
        Ok(())
    }

    async fn clear(&self, artifact: &ArtifactRef) -> GatewayResult<()> {
        if let Some(properties) = self.state.lock().await.properties.get_mut(artifact) {
            properties.retain(|key, _| !is_plugin_property(key));
        }
        Ok(())
    }
}

#[async_trait]
impl PluginGateway for InMemoryRepositoryManager {
    async fn install(&self, package: Bytes, log_level: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.plugin.installs += 1;

        if !package.starts_with(ZIP_MAGIC) {
            return Err(GatewayError::Http {
                status: 400,
                body: "plugin package is not a zip archive".to_string(),
            });
        }

        info!(bytes = package.len(), log_level, "[MEMORY] Plugin installed");
        state.plugin.package = Some(package);
        state.plugin.log_level = Some(log_level.to_string());
        state.plugin.loaded = false;
        Ok(())
    }

    async fn reload(&self) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.plugin.loaded = state.plugin.package.is_some();
        if state.plugin.loaded {
            state.plugin.version = Some("1.0.0".to_string());
        }
        Ok(())
    }

    async fn status(&self) -> GatewayResult<PluginStatus> {
        let state = self.state.lock().await;
        Ok(PluginStatus {
            loaded: state.plugin.loaded,
            version: state.plugin.version.clone(),
            config_errors: state.plugin.config_errors.clone(),
        })
    }
}

/// Simulated analysis service.
#[derive(Debug, Default)]
pub struct InMemoryAnalysisService {
    components: Mutex<BTreeMap<String, (ComponentRecord, Vec<VulnerabilityRecord>)>>,
    failing: Mutex<bool>,
    lookups: AtomicU32,
}

impl InMemoryAnalysisService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a component known, keyed by its external identifier.
    pub async fn add_component(
        &self,
        external_id: &str,
        vulnerabilities: impl IntoIterator<Item = &str>,
    ) {
        let record = ComponentRecord {
            component_id: format!("comp-{}", self.components.lock().await.len() + 1),
            external_id: external_id.to_string(),
            name: None,
            version: None,
        };
        let vulnerabilities = vulnerabilities
            .into_iter()
            .map(|id| VulnerabilityRecord {
                id: id.to_string(),
                severity: None,
            })
            .collect();
        self.components
            .lock()
            .await
            .insert(external_id.to_string(), (record, vulnerabilities));
    }

    /// Answer every lookup with a 503 while set.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }

    async fn check_available(&self) -> GatewayResult<()> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().await {
            return Err(GatewayError::Http {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AnalysisGateway for InMemoryAnalysisService {
    async fn find_component(&self, external_id: &str) -> GatewayResult<Option<ComponentRecord>> {
        self.check_available().await?;
        Ok(self
            .components
            .lock()
            .await
            .get(external_id)
            .map(|(record, _)| record.clone()))
    }

    async fn find_vulnerabilities(
        &self,
        component_id: &str,
    ) -> GatewayResult<Vec<VulnerabilityRecord>> {
        self.check_available().await?;
        Ok(self
            .components
            .lock()
            .await
            .values()
            .find(|(record, _)| record.component_id == component_id)
            .map(|(_, vulnerabilities)| vulnerabilities.clone())
            .unwrap_or_default())
    }
}

/// Mock container runtime.
#[derive(Debug, Default)]
pub struct MockContainerRuntime {
    container_counter: AtomicU64,
    images: Mutex<BTreeSet<String>>,
    builds: AtomicU32,
    runs: AtomicU32,
    stops: AtomicU32,
    fail_runs: bool,
    fail_stops: bool,
}

impl MockContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime whose `run_instance` always fails.
    pub fn failing() -> Self {
        Self {
            fail_runs: true,
            ..Self::default()
        }
    }

    /// A runtime whose `stop_instance` always fails.
    pub fn failing_stops() -> Self {
        Self {
            fail_stops: true,
            ..Self::default()
        }
    }

    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for MockContainerRuntime {
    async fn image_exists(&self, tag: &str) -> GatewayResult<bool> {
        Ok(self.images.lock().await.contains(tag))
    }

    async fn build_image(&self, tag: &str, base_image: &str, version: &str) -> GatewayResult<()> {
        info!(tag, base_image, version, "[MOCK] Building image");
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.images.lock().await.insert(tag.to_string());
        Ok(())
    }

    async fn run_instance(&self, launch: &InstanceLaunch) -> GatewayResult<InstanceEndpoint> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_runs {
            return Err(GatewayError::Runtime(
                "mock runtime configured to fail".to_string(),
            ));
        }

        let counter = self.container_counter.fetch_add(1, Ordering::SeqCst);
        let endpoint = InstanceEndpoint {
            container_id: format!("ctr_{counter:012x}"),
            url: format!("http://localhost:{}", launch.port),
        };
        info!(container_id = %endpoint.container_id, image = %launch.image_tag, "[MOCK] Instance started");
        Ok(endpoint)
    }

    async fn stop_instance(&self, endpoint: &InstanceEndpoint) -> GatewayResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stops {
            return Err(GatewayError::Runtime(format!(
                "mock runtime refused to stop {}",
                endpoint.container_id
            )));
        }

        info!(container_id = %endpoint.container_id, "[MOCK] Instance stopped");
        Ok(())
    }
}
