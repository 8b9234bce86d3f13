//! Verdict reporting: a table on stdout and an optional JSON file.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};
use uuid::Uuid;

use crate::installer::Installed;
use crate::orchestrator::{RunState, RunVerdict};
use crate::provisioner::StopOutcome;
use crate::verification::{Observation, TargetOutcome, VerificationResult};

/// One table row per verification target.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct TargetRow {
    #[tabled(rename = "Artifact")]
    pub artifact: String,

    #[tabled(rename = "Result")]
    pub result: String,

    #[tabled(rename = "Polls")]
    pub polls: u32,

    #[tabled(rename = "Details")]
    pub details: String,
}

fn describe(outcome: &TargetOutcome) -> String {
    let observed = outcome.observation.as_ref();
    match &outcome.result {
        VerificationResult::Mismatched(details) => details.clone(),
        VerificationResult::TimedOut | VerificationResult::Pending => match observed {
            Some(o) => format!("last seen: scan {:?}, {} component(s)", o.scan_state, o.components.len()),
            None => "no successful poll".to_string(),
        },
        VerificationResult::Matched => match observed {
            Some(o) => summarize(o),
            None => String::new(),
        },
    }
}

fn summarize(observed: &Observation) -> String {
    let mut parts = vec![format!("vulnerabilities: {}", observed.counts)];
    if let Some(policy) = &observed.policy_status {
        parts.push(format!("policy: {policy}"));
    }
    parts.join(", ")
}

pub fn target_rows(verdict: &RunVerdict) -> Vec<TargetRow> {
    verdict
        .results
        .iter()
        .map(|(artifact, outcome)| TargetRow {
            artifact: artifact.to_string(),
            result: outcome.result.to_string(),
            polls: outcome.polls,
            details: describe(outcome),
        })
        .collect()
}

/// Print the verdict for humans.
pub fn print_verdict(verdict: &RunVerdict) {
    let heading = format!("Run {} ({})", verdict.run_id, verdict.scenario);
    if verdict.passed() {
        println!("{} {}", "PASSED".green().bold(), heading);
    } else {
        println!("{} {}", "FAILED".red().bold(), heading);
    }

    if let Some(failure) = &verdict.failure {
        println!(
            "{} {} ({})",
            "Stage failure:".red().bold(),
            failure,
            failure.cause.reason_code()
        );
    }

    let rows = target_rows(verdict);
    if rows.is_empty() {
        println!("{}", "No targets verified.".dimmed());
    } else {
        println!("{}", Table::new(&rows));
    }

    if verdict.teardown.is_failure() {
        println!(
            "{} {:?}",
            "Teardown:".yellow().bold(),
            verdict.teardown
        );
    }
}

#[derive(Debug, Serialize)]
pub struct FailureReport {
    pub stage: RunState,
    pub reason: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TargetReport {
    pub repository: String,
    pub path: String,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

/// Machine-readable verdict.
#[derive(Debug, Serialize)]
pub struct VerdictReport {
    pub run_id: Uuid,
    pub scenario: String,
    pub state: RunState,
    pub exit_code: i32,
    pub failure: Option<FailureReport>,
    pub targets: Vec<TargetReport>,
    pub plugin: Option<Installed>,
    pub teardown: StopOutcome,
    pub transitions: Vec<RunState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl From<&RunVerdict> for VerdictReport {
    fn from(verdict: &RunVerdict) -> Self {
        Self {
            run_id: verdict.run_id,
            scenario: verdict.scenario.clone(),
            state: verdict.state,
            exit_code: verdict.exit_code(),
            failure: verdict.failure.as_ref().map(|f| FailureReport {
                stage: f.stage,
                reason: f.cause.reason_code(),
                message: f.cause.to_string(),
            }),
            targets: verdict
                .results
                .iter()
                .map(|(artifact, outcome)| TargetReport {
                    repository: artifact.repository.clone(),
                    path: artifact.path.clone(),
                    outcome: outcome.clone(),
                })
                .collect(),
            plugin: verdict.plugin.clone(),
            teardown: verdict.teardown.clone(),
            transitions: verdict.transitions.clone(),
            started_at: verdict.started_at,
            finished_at: verdict.finished_at,
        }
    }
}

/// Write the verdict as pretty JSON.
pub fn write_json(verdict: &RunVerdict, path: &Path) -> Result<()> {
    let report = VerdictReport::from(verdict);
    let json = serde_json::to_string_pretty(&report).context("failed to serialize verdict")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use pvt_gateways::ArtifactRef;

    use crate::error::RunError;
    use crate::orchestrator::StageFailure;
    use crate::verification::{ScanState, SeverityCounts};

    fn verdict() -> RunVerdict {
        let mut results = BTreeMap::new();
        results.insert(
            ArtifactRef::new("test-repo", "demo/demo-lib/1.0/demo-lib-1.0.jar"),
            TargetOutcome {
                result: VerificationResult::Matched,
                observation: Some(Observation {
                    scan_state: ScanState::Complete,
                    counts: SeverityCounts::default(),
                    policy_status: Some("NOT_IN_VIOLATION".into()),
                    ..Observation::default()
                }),
                polls: 2,
            },
        );
        results.insert(
            ArtifactRef::new("test-repo", "other.jar"),
            TargetOutcome {
                result: VerificationResult::TimedOut,
                observation: None,
                polls: 60,
            },
        );

        RunVerdict {
            run_id: Uuid::now_v7(),
            scenario: "default".into(),
            state: RunState::Failed,
            failure: None,
            results,
            plugin: None,
            teardown: StopOutcome::Stopped,
            transitions: vec![RunState::Init, RunState::Failed],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_target_rows() {
        let rows = target_rows(&verdict());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].artifact, "test-repo/demo/demo-lib/1.0/demo-lib-1.0.jar");
        assert_eq!(rows[0].result, "matched");
        assert_eq!(
            rows[0].details,
            "vulnerabilities: 0 high, 0 medium, 0 low, policy: NOT_IN_VIOLATION"
        );
        assert_eq!(rows[1].result, "timed out");
        assert_eq!(rows[1].details, "no successful poll");
    }

    #[test]
    fn test_write_json() {
        let mut verdict = verdict();
        verdict.failure = Some(StageFailure {
            stage: RunState::Verifying,
            cause: RunError::Cancelled,
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verdict.json");
        write_json(&verdict, &path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["exit_code"], 6);
        assert_eq!(json["failure"]["stage"], "verifying");
        assert_eq!(json["failure"]["reason"], "cancelled");
        assert_eq!(json["targets"][0]["repository"], "test-repo");
        assert_eq!(json["targets"][0]["result"]["status"], "matched");
        assert_eq!(json["targets"][1]["result"]["status"], "timed_out");
        assert_eq!(json["teardown"]["outcome"], "stopped");
    }
}
