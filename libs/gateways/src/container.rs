//! Docker CLI container runtime.
//!
//! Shells out to the `docker` binary; the image for an instance is a thin
//! layer over the repository manager's base image, tagged per version so
//! repeated runs reuse it.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::capabilities::ContainerRuntime;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{InstanceEndpoint, InstanceLaunch};

/// Where the license file is mounted inside the container.
const LICENSE_MOUNT: &str = "/artifactory_extra_conf/artifactory.lic";

/// Where the config-import directory is mounted inside the container.
const CONFIG_MOUNT: &str = "/pvt/import";

/// Port the repository manager listens on inside the container.
const CONTAINER_PORT: u16 = 8081;

/// Container runtime backed by the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    host: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker", "localhost")
    }
}

impl DockerCli {
    /// `host` is the address published ports are reachable on.
    pub fn new(binary: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            host: host.into(),
        }
    }

    async fn run(&self, args: &[String]) -> GatewayResult<std::process::Output> {
        debug!(binary = %self.binary, args = ?args, "Running container command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(output)
    }

    fn failure(action: &str, output: &std::process::Output) -> GatewayError {
        GatewayError::Runtime(format!(
            "{action} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Dockerfile for the per-version instance image.
fn dockerfile(base_image: &str, version: &str) -> String {
    format!("FROM {base_image}:{version}\nEXPOSE {CONTAINER_PORT}\n")
}

fn run_args(launch: &InstanceLaunch) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--detach".to_string(),
        "--publish".to_string(),
        format!("{}:{CONTAINER_PORT}", launch.port),
    ];

    if let Some(license) = &launch.license_file {
        args.push("--volume".to_string());
        args.push(format!("{}:{LICENSE_MOUNT}:ro", license.display()));
    }

    if let Some(config_dir) = &launch.config_dir {
        args.push("--volume".to_string());
        args.push(format!("{}:{CONFIG_MOUNT}:ro", config_dir.display()));
    }

    args.push(launch.image_tag.clone());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn image_exists(&self, tag: &str) -> GatewayResult<bool> {
        let output = self
            .run(&["image".into(), "inspect".into(), tag.to_string()])
            .await?;
        Ok(output.status.success())
    }

    async fn build_image(&self, tag: &str, base_image: &str, version: &str) -> GatewayResult<()> {
        info!(tag, base_image, version, "Building instance image");

        // The Dockerfile comes in on stdin, so there is no build context.
        let mut child = Command::new(&self.binary)
            .args(["build", "--tag", tag, "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(dockerfile(base_image, version).as_bytes())
                .await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Self::failure("docker build", &output));
        }

        Ok(())
    }

    async fn run_instance(&self, launch: &InstanceLaunch) -> GatewayResult<InstanceEndpoint> {
        let output = self.run(&run_args(launch)).await?;
        if !output.status.success() {
            return Err(Self::failure("docker run", &output));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(GatewayError::Runtime(
                "docker run printed no container id".to_string(),
            ));
        }

        let endpoint = InstanceEndpoint {
            container_id,
            url: format!("http://{}:{}", self.host, launch.port),
        };
        info!(container_id = %endpoint.container_id, url = %endpoint.url, "Instance container started");
        Ok(endpoint)
    }

    async fn stop_instance(&self, endpoint: &InstanceEndpoint) -> GatewayResult<()> {
        let output = self
            .run(&[
                "rm".into(),
                "--force".into(),
                endpoint.container_id.clone(),
            ])
            .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            warn!(container_id = %endpoint.container_id, "Container already gone");
            return Ok(());
        }

        Err(Self::failure("docker rm", &output))
    }
}
