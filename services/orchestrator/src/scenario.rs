//! Test scenarios: which repositories to create, which fixtures to deploy,
//! and what the analysis plugin is expected to report for each.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pvt_gateways::{ArtifactSource, RepositoryDescriptor};
use serde::{Deserialize, Serialize};

/// Expected analysis outcome for one deployed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerificationTarget {
    /// Component identifiers (package URLs) the analysis must report.
    #[serde(default)]
    pub components: BTreeSet<String>,

    #[serde(default)]
    pub vulnerabilities: VulnerabilityExpectation,

    /// Per-target deadline, capped by the run's poll timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl VerificationTarget {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// A target with nothing to check would match vacuously.
    pub fn expects_anything(&self) -> bool {
        !self.components.is_empty() || self.vulnerabilities != VulnerabilityExpectation::Any
    }
}

/// What the analysis must say about vulnerabilities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "ids", rename_all = "snake_case")]
pub enum VulnerabilityExpectation {
    /// Vulnerabilities are not checked.
    #[default]
    Any,
    /// No vulnerabilities at all, confirmed by a completed scan.
    None,
    /// At least these vulnerability ids.
    Includes(BTreeSet<String>),
}

/// A known package deployed to exercise the scan path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureArtifact {
    pub repository: String,

    /// Repository path; defaults to the source's layout path.
    #[serde(default)]
    pub path: Option<String>,

    pub source: ArtifactSource,

    /// Identifier recorded for correlation; defaults to the source's package URL.
    #[serde(default)]
    pub external_id: Option<String>,

    #[serde(default)]
    pub expect: VerificationTarget,
}

impl FixtureArtifact {
    pub fn target_path(&self) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| self.source.layout_path())
    }

    pub fn external_id(&self) -> Option<String> {
        self.external_id
            .clone()
            .or_else(|| self.source.package_url())
    }
}

/// A complete scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub repositories: Vec<RepositoryDescriptor>,

    #[serde(default)]
    pub artifacts: Vec<FixtureArtifact>,
}

fn default_name() -> String {
    "default".to_string()
}

impl Default for Scenario {
    /// One maven repository holding `demo-lib-1.0.jar`, expected to be
    /// identified as `pkg:maven/demo/demo-lib@1.0` with no vulnerabilities.
    fn default() -> Self {
        Self {
            name: default_name(),
            repositories: vec![RepositoryDescriptor::local("test-repo", "maven")],
            artifacts: vec![FixtureArtifact {
                repository: "test-repo".to_string(),
                path: None,
                source: ArtifactSource::maven("demo", "demo-lib", "1.0"),
                external_id: None,
                expect: VerificationTarget {
                    components: BTreeSet::from(["pkg:maven/demo/demo-lib@1.0".to_string()]),
                    vulnerabilities: VulnerabilityExpectation::None,
                    timeout_secs: None,
                },
            }],
        }
    }
}

impl Scenario {
    /// Load and validate a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let scenario: Scenario = toml::from_str(&contents)
            .with_context(|| format!("failed to parse scenario {}", path.display()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.artifacts.is_empty() {
            bail!("scenario '{}' names no artifacts", self.name);
        }

        let mut keys = HashSet::new();
        for repository in &self.repositories {
            if !keys.insert(repository.key.as_str()) {
                bail!("repository '{}' is declared twice", repository.key);
            }
        }

        let mut targets = HashSet::new();
        for artifact in &self.artifacts {
            if !keys.contains(artifact.repository.as_str()) {
                bail!(
                    "artifact {} references undeclared repository '{}'",
                    artifact.source.file_name(),
                    artifact.repository
                );
            }
            let path = artifact.target_path();
            if !targets.insert((artifact.repository.as_str(), path.clone())) {
                bail!("artifact {}/{} is declared twice", artifact.repository, path);
            }
            if !artifact.expect.expects_anything() {
                bail!(
                    "artifact {}/{} has no expected components or vulnerabilities",
                    artifact.repository,
                    path
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scenario() {
        let scenario = Scenario::default();
        scenario.validate().unwrap();

        let artifact = &scenario.artifacts[0];
        assert_eq!(artifact.repository, "test-repo");
        assert_eq!(artifact.source.file_name(), "demo-lib-1.0.jar");
        assert_eq!(artifact.target_path(), "demo/demo-lib/1.0/demo-lib-1.0.jar");
        assert_eq!(
            artifact.external_id().as_deref(),
            Some("pkg:maven/demo/demo-lib@1.0")
        );
        assert_eq!(
            artifact.expect.vulnerabilities,
            VulnerabilityExpectation::None
        );
    }

    #[test]
    fn test_parse_toml() {
        let scenario: Scenario = toml::from_str(
            r#"
            name = "npm"

            [[repositories]]
            key = "npm-local"
            rclass = "local"
            packageType = "npm"
            description = "fixtures"

            [[artifacts]]
            repository = "npm-local"
            path = "lodash/-/lodash-4.17.20.tgz"
            external_id = "pkg:npm/lodash@4.17.20"
            source = { kind = "url", url = "https://registry.npmjs.org/lodash/-/lodash-4.17.20.tgz" }

            [artifacts.expect]
            components = ["pkg:npm/lodash@4.17.20"]
            vulnerabilities = { mode = "includes", ids = ["CVE-2021-23337"] }
            timeout_secs = 120
            "#,
        )
        .unwrap();
        scenario.validate().unwrap();

        let artifact = &scenario.artifacts[0];
        assert_eq!(scenario.repositories[0].package_type, "npm");
        assert_eq!(artifact.target_path(), "lodash/-/lodash-4.17.20.tgz");
        assert_eq!(
            artifact.expect.vulnerabilities,
            VulnerabilityExpectation::Includes(BTreeSet::from(["CVE-2021-23337".to_string()]))
        );
        assert_eq!(artifact.expect.timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_rejects_undeclared_repository() {
        let mut scenario = Scenario::default();
        scenario.repositories.clear();
        let err = scenario.validate().unwrap_err();
        assert!(err.to_string().contains("undeclared repository 'test-repo'"));
    }

    #[test]
    fn test_rejects_empty_scenario() {
        let mut scenario = Scenario::default();
        scenario.artifacts.clear();
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_rejects_vacuous_target() {
        let mut scenario = Scenario::default();
        scenario.artifacts[0].expect = VerificationTarget::default();
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.toml");
        std::fs::write(&path, toml::to_string(&Scenario::default()).unwrap()).unwrap();

        let loaded = Scenario::load(&path).unwrap();
        assert_eq!(loaded, Scenario::default());
    }
}
