//! Repository and artifact setup.
//!
//! Repositories are converged idempotently; fixture artifacts are resolved,
//! uploaded and read back so a truncated upload cannot go unnoticed. The
//! target's properties are cleared before each upload so stale scan results
//! from an earlier run cannot satisfy verification.

use std::collections::BTreeSet;
use std::sync::Arc;

use pvt_gateways::{
    ArtifactGateway, ArtifactRef, Properties, PropertiesGateway, RepositoryDescriptor,
    RepositoryGateway,
};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, DeployError};
use crate::properties;
use crate::provisioner::InstanceHandle;
use crate::scenario::FixtureArtifact;

#[derive(Debug, Default)]
struct Ledger {
    /// Repositories ensured in this run.
    ensured: BTreeSet<String>,
    /// Repositories that did not exist before this run.
    created: BTreeSet<String>,
}

/// Repository & artifact manager.
pub struct RepositoryManager {
    repositories: Arc<dyn RepositoryGateway>,
    artifacts: Arc<dyn ArtifactGateway>,
    properties: Arc<dyn PropertiesGateway>,
    ledger: Mutex<Ledger>,
}

impl RepositoryManager {
    pub fn new(
        repositories: Arc<dyn RepositoryGateway>,
        artifacts: Arc<dyn ArtifactGateway>,
        properties: Arc<dyn PropertiesGateway>,
    ) -> Self {
        Self {
            repositories,
            artifacts,
            properties,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Create the repository if absent, update it if it differs, otherwise
    /// leave it alone.
    pub async fn ensure_repository(
        &self,
        handle: &InstanceHandle,
        descriptor: &RepositoryDescriptor,
    ) -> Result<RepositoryDescriptor, ConfigError> {
        if !handle.is_ready() {
            return Err(ConfigError::InstanceNotReady);
        }

        let existing = self.repositories.list().await.map_err(ConfigError::List)?;
        let current = existing.iter().find(|r| r.key == descriptor.key);

        match current {
            Some(observed) if descriptor.is_satisfied_by(observed) => {
                debug!(repository = %descriptor.key, "Repository already configured");
            }
            _ => {
                self.repositories
                    .create_or_update(descriptor)
                    .await
                    .map_err(|source| ConfigError::Write {
                        key: descriptor.key.clone(),
                        source,
                    })?;
                info!(
                    repository = %descriptor.key,
                    rclass = descriptor.rclass.as_str(),
                    package_type = %descriptor.package_type,
                    created = current.is_none(),
                    "Repository configured"
                );
            }
        }

        let mut ledger = self.ledger.lock().await;
        ledger.ensured.insert(descriptor.key.clone());
        if current.is_none() {
            ledger.created.insert(descriptor.key.clone());
        }

        Ok(descriptor.clone())
    }

    /// Resolve a fixture and upload it, verifying the stored bytes.
    pub async fn deploy_artifact(
        &self,
        handle: &InstanceHandle,
        repository: &RepositoryDescriptor,
        fixture: &FixtureArtifact,
    ) -> Result<ArtifactRef, DeployError> {
        if !handle.is_ready() {
            return Err(DeployError::InstanceNotReady);
        }
        if !self.ledger.lock().await.ensured.contains(&repository.key) {
            return Err(DeployError::RepositoryNotEnsured(repository.key.clone()));
        }

        let target = ArtifactRef::new(&repository.key, fixture.target_path());

        let content = self
            .artifacts
            .resolve(&fixture.source)
            .await
            .map_err(|error| DeployError::Resolve {
                source_name: fixture.source.file_name(),
                error,
            })?;
        let expected = hex::encode(Sha256::digest(&content));
        debug!(artifact = %target, bytes = content.len(), sha256 = %expected, "Fixture resolved");

        self.properties
            .clear(&target)
            .await
            .map_err(|error| DeployError::ClearProperties {
                artifact: target.clone(),
                error,
            })?;

        let deployed = self
            .artifacts
            .deploy(&target.repository, &target.path, content)
            .await
            .map_err(|error| DeployError::Upload {
                artifact: target.clone(),
                error,
            })?;

        let stored = self
            .artifacts
            .retrieve(&deployed)
            .await
            .map_err(|error| DeployError::Retrieve {
                artifact: deployed.clone(),
                error,
            })?;
        let actual = hex::encode(Sha256::digest(&stored));
        if actual != expected {
            warn!(artifact = %deployed, expected = %expected, actual = %actual, "Checksum mismatch");
            return Err(DeployError::ChecksumMismatch {
                artifact: deployed,
                expected,
                actual,
            });
        }

        if let Some(external_id) = fixture.external_id() {
            let mut recorded = Properties::new();
            recorded.insert(properties::EXTERNAL_ID.to_string(), external_id);
            self.properties
                .set(&deployed, &recorded)
                .await
                .map_err(|error| DeployError::RecordExternalId {
                    artifact: deployed.clone(),
                    error,
                })?;
        }

        info!(artifact = %deployed, sha256 = %actual, "Artifact deployed");
        Ok(deployed)
    }

    /// Delete the repositories this run created. Failures are logged only.
    pub async fn cleanup(&self) {
        let created: Vec<String> = self.ledger.lock().await.created.iter().cloned().collect();
        for key in created {
            match self.repositories.delete(&key).await {
                Ok(()) => info!(repository = %key, "Repository removed"),
                Err(e) => warn!(repository = %key, error = %e, "Failed to remove repository"),
            }
        }
    }
}
