//! Verification engine.
//!
//! Polls every deployed artifact concurrently until its expected analysis
//! outcome is observed, contradicted after a completed scan, or its deadline
//! passes. A target is judged on two signals: the properties the plugin
//! writes onto the artifact and a direct query of the analysis service,
//! correlated through the artifact's recorded external id. The analysis
//! service is only consulted once the plugin itself has reported on the
//! artifact, so a plugin that never scans cannot pass a run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use pvt_gateways::{AnalysisGateway, ArtifactRef, GatewayResult, Properties, PropertiesGateway};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::properties;
use crate::scenario::{VerificationTarget, VulnerabilityExpectation};

/// Per-target outcome. Everything but `Pending` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "details", rename_all = "snake_case")]
pub enum VerificationResult {
    Pending,
    Matched,
    Mismatched(String),
    TimedOut,
}

impl VerificationResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationResult::Pending)
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationResult::Pending => f.write_str("pending"),
            VerificationResult::Matched => f.write_str("matched"),
            VerificationResult::Mismatched(details) => write!(f, "mismatched: {details}"),
            VerificationResult::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Scan progress as reported by the plugin's inspection status property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    InProgress,
    Complete,
    Failed,
}

impl ScanState {
    pub fn from_properties(props: &Properties) -> Self {
        match props.get(properties::INSPECTION_STATUS).map(String::as_str) {
            Some(properties::STATUS_SUCCESS) => ScanState::Complete,
            Some(properties::STATUS_FAILURE) => ScanState::Failed,
            _ => ScanState::InProgress,
        }
    }
}

/// Vulnerability counts written by the plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl SeverityCounts {
    pub fn from_properties(props: &Properties) -> Self {
        Self {
            high: properties::count(props, properties::HIGH_VULNERABILITIES),
            medium: properties::count(props, properties::MEDIUM_VULNERABILITIES),
            low: properties::count(props, properties::LOW_VULNERABILITIES),
        }
    }

    /// Sum of all severities. Counts come from the remote side, so this never overflows.
    pub fn total(&self) -> u64 {
        u64::from(self.high) + u64::from(self.medium) + u64::from(self.low)
    }
}

impl fmt::Display for SeverityCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} high, {} medium, {} low", self.high, self.medium, self.low)
    }
}

/// What one poll saw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub scan_state: ScanState,
    pub external_id: Option<String>,
    pub components: BTreeSet<String>,
    pub vulnerabilities: BTreeSet<String>,
    pub counts: SeverityCounts,
    pub policy_status: Option<String>,
    pub component_version_url: Option<String>,
}

/// Terminal result of one target plus what was last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    pub result: VerificationResult,
    pub observation: Option<Observation>,
    pub polls: u32,
}

impl TargetOutcome {
    fn pending() -> Self {
        Self {
            result: VerificationResult::Pending,
            observation: None,
            polls: 0,
        }
    }
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a String>) -> String {
    ids.map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Judge one observation against its target.
///
/// Nothing observed before the plugin reports scan-complete is treated as a
/// mismatch; partial results mid-scan stay `Pending`.
pub fn evaluate(target: &VerificationTarget, observed: &Observation) -> VerificationResult {
    let mut problems = Vec::new();

    let missing: Vec<&String> = target.components.difference(&observed.components).collect();
    if !missing.is_empty() {
        problems.push(format!("missing components: {}", join_ids(missing.into_iter())));
    }

    match &target.vulnerabilities {
        VulnerabilityExpectation::Any => {}
        VulnerabilityExpectation::Includes(expected) => {
            let missing: Vec<&String> = expected.difference(&observed.vulnerabilities).collect();
            if !missing.is_empty() {
                problems.push(format!(
                    "missing vulnerabilities: {}",
                    join_ids(missing.into_iter())
                ));
            }
        }
        VulnerabilityExpectation::None => {
            if !observed.vulnerabilities.is_empty() {
                problems.push(format!(
                    "unexpected vulnerabilities: {}",
                    join_ids(observed.vulnerabilities.iter())
                ));
            } else if observed.counts.total() > 0 {
                problems.push(format!("plugin reports {}", observed.counts));
            } else if observed.scan_state != ScanState::Complete {
                problems.push("scan not complete".to_string());
            }
        }
    }

    if problems.is_empty() {
        return VerificationResult::Matched;
    }

    match observed.scan_state {
        ScanState::Complete => VerificationResult::Mismatched(problems.join("; ")),
        ScanState::Failed => VerificationResult::Mismatched("inspection failed".to_string()),
        ScanState::InProgress => VerificationResult::Pending,
    }
}

/// Verification engine.
pub struct VerificationEngine {
    properties: Arc<dyn PropertiesGateway>,
    analysis: Arc<dyn AnalysisGateway>,
}

impl VerificationEngine {
    pub fn new(properties: Arc<dyn PropertiesGateway>, analysis: Arc<dyn AnalysisGateway>) -> Self {
        Self {
            properties,
            analysis,
        }
    }

    /// Poll all targets concurrently until each is terminal.
    ///
    /// Each target stops at its own timeout or at `deadline`, whichever is
    /// earlier; a target still pending then becomes `TimedOut`. Never runs
    /// past `deadline`.
    pub async fn verify(
        &self,
        targets: Vec<(ArtifactRef, VerificationTarget)>,
        poll_interval: Duration,
        deadline: Instant,
    ) -> BTreeMap<ArtifactRef, TargetOutcome> {
        let started = Instant::now();
        info!(targets = targets.len(), "Verifying targets");

        let polls = targets.into_iter().map(|(artifact, target)| {
            let target_deadline = target
                .timeout()
                .map(|timeout| (started + timeout).min(deadline))
                .unwrap_or(deadline);
            let span = info_span!("target", artifact = %artifact);

            async move {
                let mut outcome = TargetOutcome::pending();
                let finished = tokio::time::timeout_at(
                    target_deadline,
                    self.poll_until_terminal(&artifact, &target, poll_interval, &mut outcome),
                )
                .await;

                if finished.is_err() {
                    outcome.result = VerificationResult::TimedOut;
                    warn!(polls = outcome.polls, "Target timed out");
                } else {
                    info!(result = %outcome.result, polls = outcome.polls, "Target finished");
                }
                (artifact, outcome)
            }
            .instrument(span)
        });

        join_all(polls).await.into_iter().collect()
    }

    async fn poll_until_terminal(
        &self,
        artifact: &ArtifactRef,
        target: &VerificationTarget,
        poll_interval: Duration,
        outcome: &mut TargetOutcome,
    ) {
        loop {
            outcome.polls += 1;
            match self.observe(artifact).await {
                Ok(observed) => {
                    let result = evaluate(target, &observed);
                    debug!(
                        poll = outcome.polls,
                        scan_state = ?observed.scan_state,
                        components = observed.components.len(),
                        vulnerabilities = observed.vulnerabilities.len(),
                        result = %result,
                        "Polled target"
                    );
                    outcome.observation = Some(observed);
                    if result.is_terminal() {
                        outcome.result = result;
                        return;
                    }
                }
                Err(e) => warn!(poll = outcome.polls, error = %e, "Poll failed, target stays pending"),
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn observe(&self, artifact: &ArtifactRef) -> GatewayResult<Observation> {
        let props = self.properties.get(artifact).await?;

        let mut observed = Observation {
            scan_state: ScanState::from_properties(&props),
            external_id: props.get(properties::EXTERNAL_ID).cloned(),
            counts: SeverityCounts::from_properties(&props),
            policy_status: props.get(properties::POLICY_STATUS).cloned(),
            component_version_url: props.get(properties::COMPONENT_VERSION_URL).cloned(),
            ..Observation::default()
        };

        let plugin_reported = observed.scan_state != ScanState::InProgress
            || observed.component_version_url.is_some();
        if !plugin_reported {
            return Ok(observed);
        }

        if let Some(external_id) = &observed.external_id {
            if let Some(component) = self.analysis.find_component(external_id).await? {
                let vulnerabilities = self
                    .analysis
                    .find_vulnerabilities(&component.component_id)
                    .await?;
                observed.components.insert(component.external_id);
                observed.vulnerabilities = vulnerabilities.into_iter().map(|v| v.id).collect();
            }
        }

        Ok(observed)
    }
}
