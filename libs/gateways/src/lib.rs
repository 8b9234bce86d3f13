//! Capability gateways consumed by the run orchestrator.
//!
//! Every remote system the orchestrator touches is reached through a narrow
//! capability trait:
//!
//! - `SystemGateway`, `RepositoryGateway`, `ArtifactGateway`,
//!   `PropertiesGateway`, `PluginGateway`: the repository manager
//! - `AnalysisGateway`: the component-analysis service
//! - `ContainerRuntime`: image build/run/stop for disposable instances
//!
//! HTTP adapters share one `reqwest::Client` built from an [`HttpConfig`].
//! The `memory` module provides in-memory simulators of all three systems
//! for tests and local dry runs.
//!
//! ## Modules
//!
//! - `capabilities`: the capability traits
//! - `types`: records exchanged across the traits
//! - `http`: shared client configuration and response handling
//! - `repository_manager`: HTTP adapter for the repository manager
//! - `analysis`: HTTP adapter for the analysis service
//! - `container`: docker CLI container runtime
//! - `memory`: in-memory simulators

pub mod analysis;
pub mod capabilities;
pub mod container;
pub mod error;
pub mod http;
pub mod memory;
pub mod repository_manager;
pub mod types;

pub use analysis::AnalysisClient;
pub use capabilities::{
    AnalysisGateway, ArtifactGateway, ContainerRuntime, PluginGateway, PropertiesGateway,
    RepositoryGateway, SystemGateway,
};
pub use container::DockerCli;
pub use error::{GatewayError, GatewayResult};
pub use http::HttpConfig;
pub use repository_manager::RepositoryManagerClient;
pub use types::{
    is_plugin_property, ArtifactRef, ArtifactSource, ComponentRecord, Health, InstanceEndpoint, InstanceLaunch,
    PluginStatus, Properties, RepositoryClass, RepositoryDescriptor, VulnerabilityRecord, PLUGIN_PROPERTY_PREFIX,
};
