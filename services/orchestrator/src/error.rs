//! Error taxonomy for the run stages.
//!
//! Stage-level errors (provisioning, install, repository setup, deployment)
//! abort the run. Verification outcomes are not errors and never appear here.

use std::path::PathBuf;
use std::time::Duration;

use pvt_gateways::{ArtifactRef, GatewayError};
use thiserror::Error;

/// The instance never became usable.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("license file {path} is not readable: {source}")]
    LicenseUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("container runtime failed: {0}")]
    Runtime(#[source] GatewayError),

    #[error("instance not ready after {timeout:?}: {last_status}")]
    NotReady {
        timeout: Duration,
        last_status: String,
    },

    #[error("configuration import from {path} failed: {reason}")]
    ConfigImport { path: PathBuf, reason: String },
}

impl ProvisionError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ProvisionError::LicenseUnreadable { .. } => "license_unreadable",
            ProvisionError::Runtime(_) => "runtime_failed",
            ProvisionError::NotReady { .. } => "not_ready",
            ProvisionError::ConfigImport { .. } => "config_import_failed",
        }
    }
}

/// The plugin could not be installed or did not come up.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("instance is not ready")]
    InstanceNotReady,

    #[error("plugin already installed in this run")]
    AlreadyInstalled,

    #[error("plugin package {path} is not readable: {source}")]
    PackageUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("plugin package {path} is corrupt: {reason}")]
    CorruptPackage { path: PathBuf, reason: String },

    #[error("plugin upload failed: {0}")]
    Upload(#[source] GatewayError),

    #[error("plugin reload failed: {0}")]
    Reload(#[source] GatewayError),

    #[error("plugin not loaded after {attempts} status checks")]
    NotLoaded { attempts: u32 },

    #[error("plugin reports configuration errors: {}", .0.join("; "))]
    Misconfigured(Vec<String>),
}

impl InstallError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            InstallError::InstanceNotReady => "instance_not_ready",
            InstallError::AlreadyInstalled => "already_installed",
            InstallError::PackageUnreadable { .. } => "package_unreadable",
            InstallError::CorruptPackage { .. } => "corrupt_package",
            InstallError::Upload(_) => "upload_failed",
            InstallError::Reload(_) => "reload_failed",
            InstallError::NotLoaded { .. } => "not_loaded",
            InstallError::Misconfigured(_) => "misconfigured",
        }
    }
}

/// A repository could not be created or updated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("instance is not ready")]
    InstanceNotReady,

    #[error("listing repositories failed: {0}")]
    List(#[source] GatewayError),

    #[error("writing repository {key} failed: {source}")]
    Write { key: String, source: GatewayError },
}

/// A fixture artifact could not be deployed intact.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("instance is not ready")]
    InstanceNotReady,

    #[error("repository {0} was not set up in this run")]
    RepositoryNotEnsured(String),

    #[error("resolving {source_name} failed: {error}")]
    Resolve {
        source_name: String,
        error: GatewayError,
    },

    #[error("clearing properties of {artifact} failed: {error}")]
    ClearProperties {
        artifact: ArtifactRef,
        error: GatewayError,
    },

    #[error("uploading {artifact} failed: {error}")]
    Upload {
        artifact: ArtifactRef,
        error: GatewayError,
    },

    #[error("retrieving {artifact} failed: {error}")]
    Retrieve {
        artifact: ArtifactRef,
        error: GatewayError,
    },

    #[error("checksum mismatch for {artifact}: expected {expected}, stored {actual}")]
    ChecksumMismatch {
        artifact: ArtifactRef,
        expected: String,
        actual: String,
    },

    #[error("recording external id on {artifact} failed: {error}")]
    RecordExternalId {
        artifact: ArtifactRef,
        error: GatewayError,
    },
}

fn join_errors<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Stage-level failure cause carried by the verdict.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("repository setup failed: {}", join_errors(.0))]
    Config(Vec<ConfigError>),

    #[error("artifact deployment failed: {}", join_errors(.0))]
    Deploy(Vec<DeployError>),

    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            RunError::Provision(e) => e.reason_code(),
            RunError::Install(e) => e.reason_code(),
            RunError::Config(_) => "repository_setup_failed",
            RunError::Deploy(_) => "deploy_failed",
            RunError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_misconfigured_lists_all_errors() {
        let err = InstallError::Misconfigured(vec!["a missing".into(), "b invalid".into()]);
        assert_eq!(
            err.to_string(),
            "plugin reports configuration errors: a missing; b invalid"
        );
    }

    #[test]
    fn test_run_error_joins_sibling_failures() {
        let err = RunError::Deploy(vec![
            DeployError::RepositoryNotEnsured("one".into()),
            DeployError::RepositoryNotEnsured("two".into()),
        ]);
        assert_eq!(
            err.to_string(),
            "artifact deployment failed: repository one was not set up in this run; repository two was not set up in this run"
        );
        assert_eq!(err.reason_code(), "deploy_failed");
    }

    #[test]
    fn test_run_error_reason_codes_delegate() {
        let err = RunError::from(InstallError::NotLoaded { attempts: 3 });
        assert_eq!(err.reason_code(), "not_loaded");
    }
}
