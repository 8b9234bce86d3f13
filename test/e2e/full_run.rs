//! End-to-end runs through the HTTP adapters.
//!
//! Both remote systems are stood in for by `wiremock` servers; the container
//! runtime is the mock runtime, so no docker daemon is needed.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p pvt-e2e --test full_run
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pvt_gateways::memory::MockContainerRuntime;
use pvt_gateways::{AnalysisClient, RepositoryManagerClient};
use pvt_orchestrator::orchestrator::{EXIT_INSTALL, EXIT_PASSED, EXIT_PROVISION};
use pvt_orchestrator::report::VerdictReport;
use pvt_orchestrator::{
    InstanceProvisioner, InstanceSettings, PluginInstaller, RepositoryManager, RunConfiguration,
    RunOrchestrator, RunState, RunVerdict, Scenario, StopOutcome, VerificationEngine,
    VerificationResult,
};
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PURL: &str = "pkg:maven/demo/demo-lib@1.0";
const JAR_PATH: &str = "demo/demo-lib/1.0/demo-lib-1.0.jar";
const JAR: &[u8] = b"PK\x03\x04demo-lib";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pvt_orchestrator=debug,pvt_gateways=debug")
        .with_test_writer()
        .try_init();
}

struct Fixture {
    manager: MockServer,
    analysis: MockServer,
    runtime: Arc<MockContainerRuntime>,
    dir: TempDir,
}

impl Fixture {
    async fn start() -> Self {
        init_tracing();
        Self {
            manager: MockServer::start().await,
            analysis: MockServer::start().await,
            runtime: Arc::new(MockContainerRuntime::new()),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn config(&self) -> RunConfiguration {
        RunConfiguration {
            instance: InstanceSettings {
                managed: true,
                version: "7.71.3".to_string(),
                base_image: "releases-docker.jfrog.io/jfrog/artifactory-pro".to_string(),
                port: 8081,
                server_url: format!("{}/artifactory", self.manager.uri()),
                license_path: Some(self.write("artifactory.lic", b"license")),
                config_import_dir: None,
                ready_timeout: Duration::from_secs(2),
            },
            username: "admin".to_string(),
            password: "password".to_string(),
            analysis_url: self.analysis.uri(),
            analysis_token: "token".to_string(),
            trust_cert: false,
            plugin_path: self.write("plugin.zip", b"PK\x03\x04plugin"),
            plugin_log_level: "DEBUG".to_string(),
            poll_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            http_timeout: Duration::from_secs(5),
            scenario: Scenario::default(),
            diagnostics_dir: None,
            report_path: None,
        }
    }

    /// Build the collaborators leaves-first, the way `pvt-run` does.
    async fn run(&self, config: RunConfiguration) -> RunVerdict {
        let config = Arc::new(config);
        let client = config.http_config().build_client().unwrap();
        let manager = Arc::new(
            RepositoryManagerClient::new(
                client.clone(),
                &config.instance.server_url,
                &config.username,
                &config.password,
            )
            .with_maven_remote(format!("{}/maven2", self.manager.uri())),
        );
        let analysis = Arc::new(AnalysisClient::new(
            client,
            &config.analysis_url,
            &config.analysis_token,
        ));

        let provisioner = InstanceProvisioner::new(self.runtime.clone(), manager.clone())
            .with_poll_interval(Duration::from_millis(100));
        let installer =
            PluginInstaller::new(manager.clone()).with_status_polling(3, Duration::from_millis(50));
        let repositories = RepositoryManager::new(manager.clone(), manager.clone(), manager.clone());
        let verifier = VerificationEngine::new(manager, analysis);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        RunOrchestrator::new(
            config,
            provisioner,
            installer,
            repositories,
            verifier,
            shutdown_rx,
        )
        .run()
        .await
    }

    async fn mount_healthy(&self) {
        Mock::given(method("GET"))
            .and(path("/artifactory/api/system/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&self.manager)
            .await;
    }

    async fn mount_plugin(&self, loaded: bool) {
        Mock::given(method("PUT"))
            .and(path("/artifactory/api/plugins/package"))
            .and(query_param("logLevel", "DEBUG"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&self.manager)
            .await;
        Mock::given(method("POST"))
            .and(path("/artifactory/api/plugins/reload"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.manager)
            .await;
        Mock::given(method("GET"))
            .and(path("/artifactory/api/plugins/execute/pvtPluginStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "loaded": loaded,
                "version": "1.0.0",
                "configErrors": []
            })))
            .mount(&self.manager)
            .await;
    }

    async fn mount_repository_and_artifact(&self) {
        Mock::given(method("GET"))
            .and(path("/artifactory/api/repositories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&self.manager)
            .await;
        Mock::given(method("PUT"))
            .and(path("/artifactory/api/repositories/test-repo"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&self.manager)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/maven2/{JAR_PATH}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(JAR))
            .mount(&self.manager)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("/artifactory/test-repo/{JAR_PATH}")))
            .and(header_exists("X-Checksum-Sha256"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "repo": "test-repo",
                "path": format!("/{JAR_PATH}")
            })))
            .expect(1)
            .mount(&self.manager)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/artifactory/test-repo/{JAR_PATH}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(JAR))
            .mount(&self.manager)
            .await;

        // Nothing recorded before deployment; the plugin's results afterwards.
        let storage = format!("/artifactory/api/storage/test-repo/{JAR_PATH}");
        Mock::given(method("GET"))
            .and(path(storage.clone()))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&self.manager)
            .await;
        Mock::given(method("GET"))
            .and(path(storage.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": {
                    "blackduck.externalId": [PURL],
                    "blackduck.inspectionStatus": ["SUCCESS"],
                    "blackduck.highVulnerabilities": ["0"],
                    "blackduck.mediumVulnerabilities": ["0"],
                    "blackduck.lowVulnerabilities": ["0"],
                    "blackduck.policyStatus": ["NOT_IN_VIOLATION"]
                }
            })))
            .mount(&self.manager)
            .await;
        Mock::given(method("PUT"))
            .and(path(storage))
            .and(query_param("properties", format!("blackduck.externalId={PURL}")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&self.manager)
            .await;
    }

    async fn mount_analysis(&self) {
        Mock::given(method("GET"))
            .and(path("/api/components"))
            .and(query_param("q", PURL))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "componentId": "c-1",
                    "externalId": PURL,
                    "name": "demo-lib",
                    "version": "1.0"
                }]
            })))
            .mount(&self.analysis)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/components/c-1/vulnerabilities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": []
            })))
            .mount(&self.analysis)
            .await;
    }
}

#[tokio::test]
async fn test_default_scenario_passes_over_http() {
    let fixture = Fixture::start().await;
    fixture.mount_healthy().await;
    fixture.mount_plugin(true).await;
    fixture.mount_repository_and_artifact().await;
    fixture.mount_analysis().await;

    let verdict = fixture.run(fixture.config()).await;

    assert!(verdict.failure.is_none(), "unexpected failure: {:?}", verdict.failure);
    assert_eq!(verdict.state, RunState::Passed);
    assert_eq!(verdict.exit_code(), EXIT_PASSED);
    assert_eq!(verdict.teardown, StopOutcome::Stopped);
    assert_eq!(verdict.results.len(), 1);
    let outcome = verdict.results.values().next().unwrap();
    assert_eq!(outcome.result, VerificationResult::Matched);

    let report_path = fixture.dir.path().join("verdict.json");
    pvt_orchestrator::report::write_json(&verdict, &report_path).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["state"], "passed");
    assert_eq!(json["targets"][0]["path"], JAR_PATH);
    assert_eq!(
        json["targets"][0]["observation"]["policy_status"],
        "NOT_IN_VIOLATION"
    );
    assert_eq!(json["plugin"]["version"], "1.0.0");

    let report = VerdictReport::from(&verdict);
    assert_eq!(report.exit_code, EXIT_PASSED);
}

#[tokio::test]
async fn test_plugin_that_never_loads_fails_install() {
    let fixture = Fixture::start().await;
    fixture.mount_healthy().await;
    fixture.mount_plugin(false).await;

    let verdict = fixture.run(fixture.config()).await;

    let failure = verdict.failure.as_ref().unwrap();
    assert_eq!(failure.stage, RunState::Installing);
    assert_eq!(failure.cause.reason_code(), "not_loaded");
    assert_eq!(verdict.exit_code(), EXIT_INSTALL);
    assert_eq!(verdict.teardown, StopOutcome::Stopped);
    assert_eq!(fixture.runtime.stops(), 1);
}

#[tokio::test]
async fn test_unreachable_instance_fails_provisioning() {
    let fixture = Fixture::start().await;
    Mock::given(method("GET"))
        .and(path("/artifactory/api/system/ping"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Starting"))
        .mount(&fixture.manager)
        .await;

    let mut config = fixture.config();
    config.instance.ready_timeout = Duration::from_millis(500);
    let verdict = fixture.run(config).await;

    let failure = verdict.failure.as_ref().unwrap();
    assert_eq!(failure.stage, RunState::Provisioning);
    assert!(failure.cause.to_string().contains("Starting"));
    assert_eq!(verdict.exit_code(), EXIT_PROVISION);
    assert_eq!(verdict.teardown, StopOutcome::Stopped);
    assert_eq!(fixture.runtime.builds(), 1);
}
