//! pvt run orchestrator
//!
//! Runs the repository manager's analysis plugin end to end: provisions a
//! disposable instance, installs the plugin, sets up repositories and fixture
//! artifacts, waits for the analysis results the plugin reports and produces
//! a single pass/fail verdict.
//!
//! ## Architecture
//!
//! - **Provisioner**: builds/launches the instance and waits for it to be healthy
//! - **Installer**: uploads the plugin and confirms it loaded
//! - **Repositories**: converges repositories and deploys fixtures with checksum checks
//! - **Verification**: polls every target concurrently against a deadline
//! - **Orchestrator**: the stage state machine tying them together
//!
//! Collaborators are built leaves-first and passed in explicitly; every
//! remote system is reached through the capability traits in `pvt_gateways`.

pub mod config;
pub mod error;
pub mod installer;
pub mod orchestrator;
pub mod properties;
pub mod provisioner;
pub mod report;
pub mod repositories;
pub mod scenario;
pub mod verification;

pub use config::{usage_exit_code, Args, InstanceSettings, LogFormat, RunConfiguration};
pub use error::{ConfigError, DeployError, InstallError, ProvisionError, RunError};
pub use installer::{Installed, PluginInstaller};
pub use orchestrator::{RunOrchestrator, RunState, RunVerdict, StageFailure};
pub use provisioner::{InstanceHandle, InstanceProvisioner, InstanceState, StopOutcome};
pub use repositories::RepositoryManager;
pub use scenario::{FixtureArtifact, Scenario, VerificationTarget, VulnerabilityExpectation};
pub use verification::{TargetOutcome, VerificationEngine, VerificationResult};
