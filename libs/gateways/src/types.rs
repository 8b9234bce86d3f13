//! Records exchanged between the orchestrator and its gateways.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Flattened artifact properties (multi-valued properties are comma-joined).
pub type Properties = BTreeMap<String, String>;

/// Prefix of every property the analysis plugin owns.
pub const PLUGIN_PROPERTY_PREFIX: &str = "blackduck.";

pub fn is_plugin_property(key: &str) -> bool {
    key.starts_with(PLUGIN_PROPERTY_PREFIX)
}

/// Health reported by the repository manager's status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy(String),
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

/// Repository class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryClass {
    Local,
    Remote,
    Virtual,
}

impl RepositoryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryClass::Local => "local",
            RepositoryClass::Remote => "remote",
            RepositoryClass::Virtual => "virtual",
        }
    }
}

impl std::str::FromStr for RepositoryClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(RepositoryClass::Local),
            "remote" => Ok(RepositoryClass::Remote),
            "virtual" => Ok(RepositoryClass::Virtual),
            other => Err(format!("unknown repository class: {other}")),
        }
    }
}

/// Name, type and configuration of a repository created for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDescriptor {
    pub key: String,
    pub rclass: RepositoryClass,
    pub package_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Additional repository settings passed through verbatim.
    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl RepositoryDescriptor {
    /// A local repository with no extra settings.
    pub fn local(key: impl Into<String>, package_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            rclass: RepositoryClass::Local,
            package_type: package_type.into(),
            description: None,
            settings: BTreeMap::new(),
        }
    }

    /// Whether an observed repository already carries this desired configuration.
    ///
    /// Settings the observed side does not report count as different.
    pub fn is_satisfied_by(&self, observed: &RepositoryDescriptor) -> bool {
        if self.key != observed.key
            || self.rclass != observed.rclass
            || !self.package_type.eq_ignore_ascii_case(&observed.package_type)
        {
            return false;
        }

        if self.description.is_some() && self.description != observed.description {
            return false;
        }

        self.settings
            .iter()
            .all(|(name, value)| observed.settings.get(name) == Some(value))
    }
}

/// Coordinates of a deployed artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub repository: String,
    pub path: String,
}

impl ArtifactRef {
    pub fn new(repository: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            path: path.into().trim_start_matches('/').to_string(),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repository, self.path)
    }
}

/// Where a fixture artifact is resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// An absolute download URL.
    Url { url: String },

    /// Maven coordinates, resolved against a Maven-layout remote.
    Maven {
        group: String,
        artifact: String,
        version: String,
        #[serde(default)]
        classifier: Option<String>,
        #[serde(default = "default_extension")]
        extension: String,
    },
}

fn default_extension() -> String {
    "jar".to_string()
}

impl ArtifactSource {
    pub fn maven(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        ArtifactSource::Maven {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
            classifier: None,
            extension: default_extension(),
        }
    }

    /// Download URL for this source; Maven coordinates are laid out under `maven_remote`.
    pub fn url(&self, maven_remote: &str) -> String {
        match self {
            ArtifactSource::Url { url } => url.clone(),
            ArtifactSource::Maven { .. } => format!(
                "{}/{}",
                maven_remote.trim_end_matches('/'),
                self.layout_path()
            ),
        }
    }

    /// Repository-relative path: Maven layout for coordinates, the file name otherwise.
    pub fn layout_path(&self) -> String {
        match self {
            ArtifactSource::Url { .. } => self.file_name(),
            ArtifactSource::Maven {
                group,
                artifact,
                version,
                ..
            } => format!(
                "{}/{}/{}/{}",
                group.replace('.', "/"),
                artifact,
                version,
                self.file_name()
            ),
        }
    }

    /// File name of the artifact (last URL segment for plain URLs).
    pub fn file_name(&self) -> String {
        match self {
            ArtifactSource::Url { url } => url
                .rsplit('/')
                .next()
                .unwrap_or(url.as_str())
                .to_string(),
            ArtifactSource::Maven {
                artifact,
                version,
                classifier,
                extension,
                ..
            } => match classifier {
                Some(classifier) => format!("{artifact}-{version}-{classifier}.{extension}"),
                None => format!("{artifact}-{version}.{extension}"),
            },
        }
    }

    /// Package URL identifying the component, when derivable from coordinates.
    pub fn package_url(&self) -> Option<String> {
        match self {
            ArtifactSource::Maven {
                group,
                artifact,
                version,
                ..
            } => Some(format!("pkg:maven/{group}/{artifact}@{version}")),
            ArtifactSource::Url { .. } => None,
        }
    }
}

/// Plugin state as reported by the plugin's own status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    pub loaded: bool,
    #[serde(default)]
    pub version: Option<String>,
    /// Configuration validation failures reported by the plugin.
    #[serde(default)]
    pub config_errors: Vec<String>,
}

/// A component known to the analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    pub component_id: String,
    pub external_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// A vulnerability attached to a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    pub id: String,
    #[serde(default)]
    pub severity: Option<String>,
}

/// Everything the container runtime needs to launch an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLaunch {
    pub image_tag: String,
    pub license_file: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
    pub port: u16,
}

/// A running container and the address it serves on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceEndpoint {
    pub container_id: String,
    pub url: String,
}
