//! Plugin installer.
//!
//! Uploads the plugin package, reloads plugins and waits for the plugin to
//! report itself loaded. Installing over a live plugin is not safe, so an
//! installer refuses a second install.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pvt_gateways::PluginGateway;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::InstallError;
use crate::provisioner::InstanceHandle;

/// Leading bytes of a zip archive.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// A loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Installed {
    pub version: Option<String>,
    pub sha256: String,
    pub log_level: String,
}

/// Plugin installer.
pub struct PluginInstaller {
    plugin: Arc<dyn PluginGateway>,
    status_attempts: u32,
    status_interval: Duration,
    installed: AtomicBool,
}

impl PluginInstaller {
    pub const DEFAULT_STATUS_ATTEMPTS: u32 = 10;
    pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(3);

    pub fn new(plugin: Arc<dyn PluginGateway>) -> Self {
        Self {
            plugin,
            status_attempts: Self::DEFAULT_STATUS_ATTEMPTS,
            status_interval: Self::DEFAULT_STATUS_INTERVAL,
            installed: AtomicBool::new(false),
        }
    }

    /// How often, and how far apart, the plugin status is checked after reload.
    pub fn with_status_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.status_attempts = attempts.max(1);
        self.status_interval = interval;
        self
    }

    /// Install `package` into the instance and confirm it loaded.
    ///
    /// Never retried: any failure is returned as-is and a second call fails
    /// with `AlreadyInstalled`.
    pub async fn install(
        &self,
        handle: &InstanceHandle,
        package: &Path,
        log_level: &str,
    ) -> Result<Installed, InstallError> {
        if !handle.is_ready() {
            return Err(InstallError::InstanceNotReady);
        }
        if self.installed.swap(true, Ordering::SeqCst) {
            return Err(InstallError::AlreadyInstalled);
        }

        let contents = read_package(package)?;
        let sha256 = hex::encode(Sha256::digest(&contents));
        info!(
            package = %package.display(),
            bytes = contents.len(),
            sha256 = %sha256,
            log_level,
            "Uploading plugin"
        );

        self.plugin
            .install(Bytes::from(contents), log_level)
            .await
            .map_err(InstallError::Upload)?;
        self.plugin.reload().await.map_err(InstallError::Reload)?;

        for attempt in 1..=self.status_attempts {
            match self.plugin.status().await {
                Ok(status) if status.loaded => {
                    if !status.config_errors.is_empty() {
                        warn!(errors = ?status.config_errors, "Plugin loaded with configuration errors");
                        return Err(InstallError::Misconfigured(status.config_errors));
                    }
                    info!(version = ?status.version, attempt, "Plugin loaded");
                    return Ok(Installed {
                        version: status.version,
                        sha256,
                        log_level: log_level.to_string(),
                    });
                }
                Ok(_) => debug!(attempt, "Plugin not loaded yet"),
                Err(e) => debug!(attempt, error = %e, "Plugin status check failed"),
            }

            if attempt < self.status_attempts {
                tokio::time::sleep(self.status_interval).await;
            }
        }

        Err(InstallError::NotLoaded {
            attempts: self.status_attempts,
        })
    }
}

/// Read the package and reject obviously corrupt archives before upload.
fn read_package(path: &Path) -> Result<Vec<u8>, InstallError> {
    let contents = std::fs::read(path).map_err(|source| InstallError::PackageUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    if contents.is_empty() {
        return Err(InstallError::CorruptPackage {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    if !contents.starts_with(ZIP_MAGIC) {
        return Err(InstallError::CorruptPackage {
            path: path.to_path_buf(),
            reason: "not a zip archive".to_string(),
        });
    }

    Ok(contents)
}
