//! Run orchestrator.
//!
//! Drives one run through the stage sequence
//! `Init → Provisioning → Installing → ConfiguringRepos → DeployingArtifacts
//! → Verifying → TearingDown → {Passed, Failed}`. Any stage failure skips
//! straight to teardown; teardown always runs and never changes the verdict.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pvt_gateways::{ArtifactRef, RepositoryDescriptor};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::RunConfiguration;
use crate::error::{DeployError, RunError};
use crate::installer::{Installed, PluginInstaller};
use crate::provisioner::{InstanceHandle, InstanceProvisioner, StopOutcome};
use crate::repositories::RepositoryManager;
use crate::verification::{TargetOutcome, VerificationEngine, VerificationResult};

pub const EXIT_PASSED: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_PROVISION: i32 = 2;
pub const EXIT_INSTALL: i32 = 3;
pub const EXIT_SETUP: i32 = 4;
pub const EXIT_VERIFICATION: i32 = 5;
pub const EXIT_CANCELLED: i32 = 6;

/// Run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Provisioning,
    Installing,
    ConfiguringRepos,
    DeployingArtifacts,
    Verifying,
    TearingDown,
    Passed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::Provisioning => "provisioning",
            RunState::Installing => "installing",
            RunState::ConfiguringRepos => "configuring_repos",
            RunState::DeployingArtifacts => "deploying_artifacts",
            RunState::Verifying => "verifying",
            RunState::TearingDown => "tearing_down",
            RunState::Passed => "passed",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The stage that failed and why.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: RunState,
    pub cause: RunError,
}

impl StageFailure {
    fn new(stage: RunState, cause: impl Into<RunError>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.cause)
    }
}

/// Final outcome of one run.
#[derive(Debug)]
pub struct RunVerdict {
    pub run_id: Uuid,
    pub scenario: String,
    pub state: RunState,
    pub failure: Option<StageFailure>,
    pub results: BTreeMap<ArtifactRef, TargetOutcome>,
    pub plugin: Option<Installed>,
    pub teardown: StopOutcome,
    pub transitions: Vec<RunState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunVerdict {
    pub fn passed(&self) -> bool {
        self.state == RunState::Passed
    }

    /// Process exit code; stage failures are distinguishable from
    /// verification failures.
    pub fn exit_code(&self) -> i32 {
        match &self.failure {
            Some(failure) => match failure.cause {
                RunError::Provision(_) => EXIT_PROVISION,
                RunError::Install(_) => EXIT_INSTALL,
                RunError::Config(_) | RunError::Deploy(_) => EXIT_SETUP,
                RunError::Cancelled => EXIT_CANCELLED,
            },
            None if self.passed() => EXIT_PASSED,
            None => EXIT_VERIFICATION,
        }
    }
}

/// Resolves once shutdown has been requested. A dropped sender never cancels.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Orchestrates one run. Consumed by [`RunOrchestrator::run`].
pub struct RunOrchestrator {
    config: Arc<RunConfiguration>,
    provisioner: InstanceProvisioner,
    installer: PluginInstaller,
    repositories: RepositoryManager,
    verifier: VerificationEngine,
    shutdown: watch::Receiver<bool>,
    state: RunState,
    transitions: Vec<RunState>,
}

impl RunOrchestrator {
    pub fn new(
        config: Arc<RunConfiguration>,
        provisioner: InstanceProvisioner,
        installer: PluginInstaller,
        repositories: RepositoryManager,
        verifier: VerificationEngine,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            provisioner,
            installer,
            repositories,
            verifier,
            shutdown,
            state: RunState::Init,
            transitions: vec![RunState::Init],
        }
    }

    /// Run every stage to completion and produce the verdict.
    pub async fn run(self) -> RunVerdict {
        let run_id = Uuid::now_v7();
        let span = info_span!("run", run_id = %run_id, scenario = %self.config.scenario.name);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(mut self, run_id: Uuid) -> RunVerdict {
        let started_at = Utc::now();
        info!("Run started");

        let mut handle = None;
        let mut results = BTreeMap::new();
        let mut plugin = None;

        let outcome = self
            .run_stages(&mut handle, &mut results, &mut plugin)
            .await;

        if let Err(failure) = &outcome {
            error!(
                stage = %failure.stage,
                reason = failure.cause.reason_code(),
                error = %failure.cause,
                "Stage failed"
            );
            if let Some(handle) = handle.as_ref().filter(|h| h.is_ready()) {
                self.export_diagnostics(handle).await;
            }
        }

        self.transition(RunState::TearingDown);
        let teardown = match handle.as_mut() {
            Some(handle) => {
                if !handle.managed() {
                    self.repositories.cleanup().await;
                }
                self.provisioner.stop(handle).await
            }
            None => StopOutcome::NotStarted,
        };

        let failure = outcome.err();
        let passed = failure.is_none()
            && !results.is_empty()
            && results
                .values()
                .all(|o: &TargetOutcome| o.result == VerificationResult::Matched);
        let state = if passed {
            RunState::Passed
        } else {
            RunState::Failed
        };
        self.transition(state);

        let verdict = RunVerdict {
            run_id,
            scenario: self.config.scenario.name.clone(),
            state,
            failure,
            results,
            plugin,
            teardown,
            transitions: self.transitions,
            started_at,
            finished_at: Utc::now(),
        };
        info!(state = %verdict.state, exit_code = verdict.exit_code(), "Run finished");
        verdict
    }

    async fn run_stages(
        &mut self,
        handle: &mut Option<InstanceHandle>,
        results: &mut BTreeMap<ArtifactRef, TargetOutcome>,
        plugin: &mut Option<Installed>,
    ) -> Result<(), StageFailure> {
        self.enter(RunState::Provisioning)?;
        let started = self
            .provisioner
            .start(&self.config.instance)
            .await
            .map_err(|e| StageFailure::new(RunState::Provisioning, e))?;
        let instance = handle.insert(started);

        let ready_timeout = self.config.instance.ready_timeout;
        tokio::select! {
            ready = self.provisioner.wait_ready(instance, ready_timeout) => {
                ready.map_err(|e| StageFailure::new(RunState::Provisioning, e))?;
            }
            _ = shutdown_requested(&mut self.shutdown) => {
                return Err(StageFailure::new(RunState::Provisioning, RunError::Cancelled));
            }
        }

        if let Some(dir) = &self.config.instance.config_import_dir {
            self.provisioner
                .import_config(instance, dir)
                .await
                .map_err(|e| StageFailure::new(RunState::Provisioning, e))?;
        }

        self.enter(RunState::Installing)?;
        let installed = self
            .installer
            .install(instance, &self.config.plugin_path, &self.config.plugin_log_level)
            .await
            .map_err(|e| StageFailure::new(RunState::Installing, e))?;
        *plugin = Some(installed);

        self.enter(RunState::ConfiguringRepos)?;
        let mut ensured: BTreeMap<String, RepositoryDescriptor> = BTreeMap::new();
        let mut config_errors = Vec::new();
        for descriptor in &self.config.scenario.repositories {
            match self.repositories.ensure_repository(instance, descriptor).await {
                Ok(repository) => {
                    ensured.insert(repository.key.clone(), repository);
                }
                Err(e) => {
                    error!(repository = %descriptor.key, error = %e, "Repository setup failed");
                    config_errors.push(e);
                }
            }
        }
        if !config_errors.is_empty() {
            return Err(StageFailure::new(
                RunState::ConfiguringRepos,
                RunError::Config(config_errors),
            ));
        }

        self.enter(RunState::DeployingArtifacts)?;
        let mut targets = Vec::new();
        let mut deploy_errors = Vec::new();
        for fixture in &self.config.scenario.artifacts {
            let Some(repository) = ensured.get(&fixture.repository) else {
                deploy_errors.push(DeployError::RepositoryNotEnsured(fixture.repository.clone()));
                continue;
            };
            match self
                .repositories
                .deploy_artifact(instance, repository, fixture)
                .await
            {
                Ok(artifact) => targets.push((artifact, fixture.expect.clone())),
                Err(e) => {
                    error!(
                        repository = %fixture.repository,
                        path = %fixture.target_path(),
                        error = %e,
                        "Artifact deployment failed"
                    );
                    deploy_errors.push(e);
                }
            }
        }
        if !deploy_errors.is_empty() {
            return Err(StageFailure::new(
                RunState::DeployingArtifacts,
                RunError::Deploy(deploy_errors),
            ));
        }

        self.enter(RunState::Verifying)?;
        let deadline = Instant::now() + self.config.poll_timeout;
        let verification = self
            .verifier
            .verify(targets, self.config.poll_interval, deadline);
        tokio::select! {
            outcomes = verification => {
                *results = outcomes;
            }
            _ = shutdown_requested(&mut self.shutdown) => {
                return Err(StageFailure::new(RunState::Verifying, RunError::Cancelled));
            }
        }

        for (artifact, outcome) in results.iter() {
            if outcome.result != VerificationResult::Matched {
                warn!(artifact = %artifact, result = %outcome.result, "Target not matched");
            }
        }

        Ok(())
    }

    /// Move to the next stage unless shutdown has been requested.
    fn enter(&mut self, next: RunState) -> Result<(), StageFailure> {
        if *self.shutdown.borrow() {
            return Err(StageFailure::new(next, RunError::Cancelled));
        }
        self.transition(next);
        Ok(())
    }

    fn transition(&mut self, next: RunState) {
        info!(from = %self.state, to = %next, "Run state transition");
        self.state = next;
        self.transitions.push(next);
    }

    async fn export_diagnostics(&self, handle: &InstanceHandle) {
        let Some(dir) = &self.config.diagnostics_dir else {
            return;
        };
        if let Err(e) = self.provisioner.export_diagnostics(dir).await {
            warn!(url = %handle.url(), error = %e, "Failed to export diagnostics");
        }
    }
}
