//! Instance provisioner.
//!
//! Brings up a disposable repository-manager instance (or attaches to an
//! existing one), waits for it to report healthy, and tears it down again.
//! `stop` is best-effort and never returns an error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pvt_gateways::{
    ContainerRuntime, GatewayResult, Health, InstanceEndpoint, InstanceLaunch,
    SystemGateway,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::InstanceSettings;
use crate::error::ProvisionError;

/// File imported from the config-import directory.
pub const CONFIG_FILE_NAME: &str = "config.xml";

/// Lifecycle of the provisioned instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Starting => "starting",
            InstanceState::Ready => "ready",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The provisioned instance. Only the provisioner changes its state.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    image_tag: String,
    url: String,
    endpoint: Option<InstanceEndpoint>,
    managed: bool,
    state: InstanceState,
}

impl InstanceHandle {
    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    /// Base URL the gateways talk to.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn container_id(&self) -> Option<&str> {
        self.endpoint.as_ref().map(|e| e.container_id.as_str())
    }

    pub fn managed(&self) -> bool {
        self.managed
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == InstanceState::Ready
    }
}

/// Result of a teardown attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
    /// Nothing was ever started.
    NotStarted,
    Failed(String),
}

impl StopOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StopOutcome::Failed(_))
    }
}

/// Instance provisioner.
pub struct InstanceProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    system: Arc<dyn SystemGateway>,
    poll_interval: Duration,
}

impl InstanceProvisioner {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(runtime: Arc<dyn ContainerRuntime>, system: Arc<dyn SystemGateway>) -> Self {
        Self {
            runtime,
            system,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Interval between health checks in `wait_ready`.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Launch the instance, building its image first if it is not cached.
    ///
    /// An unmanaged instance is only attached to; the container runtime is
    /// not touched.
    pub async fn start(&self, settings: &InstanceSettings) -> Result<InstanceHandle, ProvisionError> {
        let image_tag = settings.image_tag();

        if !settings.managed {
            info!(url = %settings.server_url, "Using existing instance");
            return Ok(InstanceHandle {
                image_tag,
                url: settings.server_url.clone(),
                endpoint: None,
                managed: false,
                state: InstanceState::Starting,
            });
        }

        if let Some(path) = &settings.license_path {
            std::fs::metadata(path).map_err(|source| ProvisionError::LicenseUnreadable {
                path: path.clone(),
                source,
            })?;
        }

        let cached = self
            .runtime
            .image_exists(&image_tag)
            .await
            .map_err(ProvisionError::Runtime)?;
        if cached {
            debug!(image = %image_tag, "Reusing cached image");
        } else {
            info!(image = %image_tag, base_image = %settings.base_image, "Building image");
            self.runtime
                .build_image(&image_tag, &settings.base_image, &settings.version)
                .await
                .map_err(ProvisionError::Runtime)?;
        }

        let launch = InstanceLaunch {
            image_tag: image_tag.clone(),
            license_file: settings.license_path.clone(),
            config_dir: settings.config_import_dir.clone(),
            port: settings.port,
        };
        let endpoint = self
            .runtime
            .run_instance(&launch)
            .await
            .map_err(ProvisionError::Runtime)?;

        info!(
            container_id = %endpoint.container_id,
            endpoint = %endpoint.url,
            image = %image_tag,
            "Instance launched"
        );

        Ok(InstanceHandle {
            image_tag,
            url: settings.server_url.clone(),
            endpoint: Some(endpoint),
            managed: true,
            state: InstanceState::Starting,
        })
    }

    /// Poll the status endpoint until healthy or until `timeout` has elapsed.
    ///
    /// A zero timeout fails without polling. Status errors count as
    /// unhealthy; the last one is reported on timeout.
    pub async fn wait_ready(
        &self,
        handle: &mut InstanceHandle,
        timeout: Duration,
    ) -> Result<(), ProvisionError> {
        if handle.state == InstanceState::Ready {
            return Ok(());
        }

        if timeout.is_zero() {
            handle.state = InstanceState::Failed;
            return Err(ProvisionError::NotReady {
                timeout,
                last_status: "zero timeout".to_string(),
            });
        }

        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        // The last poll lands on the deadline itself
        let last_status = loop {
            attempts += 1;
            let status = match self.system.status().await {
                Ok(Health::Healthy) => {
                    handle.state = InstanceState::Ready;
                    info!(url = %handle.url, attempts, "Instance ready");
                    return Ok(());
                }
                Ok(Health::Unhealthy(reason)) => {
                    debug!(attempts, reason = %reason, "Instance not ready yet");
                    reason
                }
                Err(e) => {
                    debug!(attempts, error = %e, "Status check failed");
                    e.to_string()
                }
            };

            let now = Instant::now();
            if now >= deadline {
                break status;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        };

        handle.state = InstanceState::Failed;
        warn!(attempts, last_status = %last_status, "Instance did not become ready");
        Err(ProvisionError::NotReady {
            timeout,
            last_status,
        })
    }

    /// Import `config.xml` from `dir` into a ready instance.
    pub async fn import_config(
        &self,
        handle: &InstanceHandle,
        dir: &Path,
    ) -> Result<(), ProvisionError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !handle.is_ready() {
            return Err(ProvisionError::ConfigImport {
                path,
                reason: format!("instance is {}", handle.state),
            });
        }

        let contents = std::fs::read(&path).map_err(|e| ProvisionError::ConfigImport {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        self.system
            .import_config(Bytes::from(contents))
            .await
            .map_err(|e| ProvisionError::ConfigImport {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        info!(path = %path.display(), "Configuration imported");
        Ok(())
    }

    /// Write the instance's exported configuration into `dir`.
    pub async fn export_diagnostics(&self, dir: &Path) -> GatewayResult<PathBuf> {
        let exported = self.system.export_config().await?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "config-export-{}.xml",
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
        ));
        std::fs::write(&path, &exported)?;
        info!(path = %path.display(), bytes = exported.len(), "Diagnostics exported");
        Ok(path)
    }

    /// Stop the instance. Safe to call repeatedly and on handles that never
    /// became ready; failures are logged and reported, never returned.
    pub async fn stop(&self, handle: &mut InstanceHandle) -> StopOutcome {
        if handle.state == InstanceState::Stopped {
            debug!("Instance already stopped");
            return StopOutcome::AlreadyStopped;
        }

        handle.state = InstanceState::Stopping;

        let Some(endpoint) = handle.endpoint.clone() else {
            handle.state = InstanceState::Stopped;
            debug!(managed = handle.managed, "No container to stop");
            return StopOutcome::Stopped;
        };

        match self.runtime.stop_instance(&endpoint).await {
            Ok(()) => {
                handle.state = InstanceState::Stopped;
                info!(container_id = %endpoint.container_id, "Instance stopped");
                StopOutcome::Stopped
            }
            Err(e) => {
                handle.state = InstanceState::Failed;
                error!(container_id = %endpoint.container_id, error = %e, "Failed to stop instance");
                StopOutcome::Failed(e.to_string())
            }
        }
    }
}
