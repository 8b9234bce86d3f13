//! Shared fixtures: in-memory collaborators and a runnable default configuration.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pvt_gateways::memory::{InMemoryAnalysisService, InMemoryRepositoryManager, MockContainerRuntime};
use pvt_gateways::{ArtifactRef, ArtifactSource, Properties};
use pvt_orchestrator::properties;
use pvt_orchestrator::{
    InstanceHandle, InstanceProvisioner, InstanceSettings, PluginInstaller, RepositoryManager,
    RunConfiguration, RunOrchestrator, Scenario, VerificationEngine,
};
use tempfile::TempDir;
use tokio::sync::watch;

pub const DEMO_PURL: &str = "pkg:maven/demo/demo-lib@1.0";
pub const DEMO_PATH: &str = "demo/demo-lib/1.0/demo-lib-1.0.jar";
pub const DEMO_JAR: &[u8] = b"PK\x03\x04demo-lib-1.0 class files";
pub const PLUGIN_ZIP: &[u8] = b"PK\x03\x04plugin.groovy";

pub fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Properties of a completed, clean scan.
pub fn clean_scan() -> Properties {
    props(&[
        (properties::INSPECTION_STATUS, properties::STATUS_SUCCESS),
        (properties::HIGH_VULNERABILITIES, "0"),
        (properties::MEDIUM_VULNERABILITIES, "0"),
        (properties::LOW_VULNERABILITIES, "0"),
        (properties::POLICY_STATUS, "NOT_IN_VIOLATION"),
    ])
}

pub fn demo_source() -> ArtifactSource {
    ArtifactSource::maven("demo", "demo-lib", "1.0")
}

pub fn demo_artifact() -> ArtifactRef {
    ArtifactRef::new("test-repo", DEMO_PATH)
}

/// In-memory repository manager, analysis service and container runtime,
/// plus a scratch directory for license, plugin and scenario files.
pub struct Harness {
    pub manager: Arc<InMemoryRepositoryManager>,
    pub analysis: Arc<InMemoryAnalysisService>,
    pub runtime: Arc<MockContainerRuntime>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_runtime(MockContainerRuntime::new())
    }

    pub fn with_runtime(runtime: MockContainerRuntime) -> Self {
        Self {
            manager: Arc::new(InMemoryRepositoryManager::new()),
            analysis: Arc::new(InMemoryAnalysisService::new()),
            runtime: Arc::new(runtime),
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    /// The default scenario's fixture resolves, is known to the analysis
    /// service, and is scanned clean on the second property read.
    pub async fn with_default_fixture(self) -> Self {
        self.manager.register_source(demo_source(), DEMO_JAR).await;
        self.analysis.add_component(DEMO_PURL, Vec::<&str>::new()).await;
        self.manager
            .script_scan(demo_artifact(), clean_scan(), 2)
            .await;
        self
    }

    pub fn write_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture file");
        path
    }

    pub fn settings(&self) -> InstanceSettings {
        InstanceSettings {
            managed: true,
            version: "7.71.3".to_string(),
            base_image: "releases-docker.jfrog.io/jfrog/artifactory-pro".to_string(),
            port: 8081,
            server_url: "http://localhost:8081/artifactory".to_string(),
            license_path: Some(self.write_file("artifactory.lic", b"license")),
            config_import_dir: None,
            ready_timeout: Duration::from_secs(60),
        }
    }

    pub fn config(&self) -> RunConfiguration {
        RunConfiguration {
            instance: self.settings(),
            username: "admin".to_string(),
            password: "password".to_string(),
            analysis_url: "https://analysis.example.com".to_string(),
            analysis_token: "token".to_string(),
            trust_cert: false,
            plugin_path: self.write_file("plugin.zip", PLUGIN_ZIP),
            plugin_log_level: "INFO".to_string(),
            poll_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
            http_timeout: Duration::from_secs(60),
            scenario: Scenario::default(),
            diagnostics_dir: None,
            report_path: None,
        }
    }

    pub fn provisioner(&self) -> InstanceProvisioner {
        InstanceProvisioner::new(self.runtime.clone(), self.manager.clone())
            .with_poll_interval(Duration::from_secs(1))
    }

    pub fn installer(&self) -> PluginInstaller {
        PluginInstaller::new(self.manager.clone()).with_status_polling(3, Duration::from_secs(1))
    }

    pub fn repositories(&self) -> RepositoryManager {
        RepositoryManager::new(
            self.manager.clone(),
            self.manager.clone(),
            self.manager.clone(),
        )
    }

    pub fn verifier(&self) -> VerificationEngine {
        VerificationEngine::new(self.manager.clone(), self.analysis.clone())
    }

    pub fn orchestrator(
        &self,
        config: RunConfiguration,
        shutdown: watch::Receiver<bool>,
    ) -> RunOrchestrator {
        RunOrchestrator::new(
            Arc::new(config),
            self.provisioner(),
            self.installer(),
            self.repositories(),
            self.verifier(),
            shutdown,
        )
    }

    /// A started, ready instance.
    pub async fn ready_instance(&self) -> InstanceHandle {
        let provisioner = self.provisioner();
        let mut handle = provisioner.start(&self.settings()).await.expect("start");
        provisioner
            .wait_ready(&mut handle, Duration::from_secs(10))
            .await
            .expect("ready");
        handle
    }
}
