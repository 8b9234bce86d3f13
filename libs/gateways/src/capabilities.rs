//! Capability traits for every collaborator the orchestrator drives.
//!
//! Implementations are shared as `Arc<dyn Trait>`; none of them holds
//! per-run mutable state, so the verification pollers can share them freely.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::GatewayResult;
use crate::types::{
    ArtifactRef, ArtifactSource, ComponentRecord, Health, InstanceEndpoint, InstanceLaunch,
    PluginStatus, Properties, RepositoryDescriptor, VulnerabilityRecord,
};

/// System status and configuration import/export.
#[async_trait]
pub trait SystemGateway: Send + Sync {
    async fn status(&self) -> GatewayResult<Health>;

    async fn import_config(&self, config: Bytes) -> GatewayResult<()>;

    async fn export_config(&self) -> GatewayResult<Bytes>;
}

/// Repository CRUD.
#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Create the repository, or update it in place if the key already exists.
    async fn create_or_update(&self, descriptor: &RepositoryDescriptor) -> GatewayResult<()>;

    async fn delete(&self, key: &str) -> GatewayResult<()>;

    async fn list(&self) -> GatewayResult<Vec<RepositoryDescriptor>>;
}

/// Fixture resolution and artifact transfer.
#[async_trait]
pub trait ArtifactGateway: Send + Sync {
    /// Fetch the fixture content from its source.
    async fn resolve(&self, source: &ArtifactSource) -> GatewayResult<Bytes>;

    async fn deploy(&self, repository: &str, path: &str, content: Bytes)
        -> GatewayResult<ArtifactRef>;

    async fn retrieve(&self, artifact: &ArtifactRef) -> GatewayResult<Bytes>;
}

/// Artifact property access.
#[async_trait]
pub trait PropertiesGateway: Send + Sync {
    /// Current properties; an artifact without properties yields an empty map.
    async fn get(&self, artifact: &ArtifactRef) -> GatewayResult<Properties>;

    async fn set(&self, artifact: &ArtifactRef, properties: &Properties) -> GatewayResult<()>;

    /// Remove every property in the plugin namespace; other properties are
    /// kept and clearing a missing artifact succeeds.
    async fn clear(&self, artifact: &ArtifactRef) -> GatewayResult<()>;
}

/// Plugin deployment on the repository manager.
#[async_trait]
pub trait PluginGateway: Send + Sync {
    async fn install(&self, package: Bytes, log_level: &str) -> GatewayResult<()>;

    async fn reload(&self) -> GatewayResult<()>;

    async fn status(&self) -> GatewayResult<PluginStatus>;
}

/// Component and vulnerability lookup on the analysis service.
#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    /// Look up a component by external identifier; `None` when unknown.
    async fn find_component(&self, external_id: &str) -> GatewayResult<Option<ComponentRecord>>;

    async fn find_vulnerabilities(&self, component_id: &str)
        -> GatewayResult<Vec<VulnerabilityRecord>>;
}

/// Container lifecycle for disposable repository-manager instances.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, tag: &str) -> GatewayResult<bool>;

    async fn build_image(&self, tag: &str, base_image: &str, version: &str) -> GatewayResult<()>;

    async fn run_instance(&self, launch: &InstanceLaunch) -> GatewayResult<InstanceEndpoint>;

    async fn stop_instance(&self, endpoint: &InstanceEndpoint) -> GatewayResult<()>;
}
