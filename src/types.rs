use serde::{Deserialize, Serialize};

/// One catalog entry as carried in the metadata document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Tool {
    pub name: String,
    pub version: String,
    /// Binary path template; `${name}` and `${target}` placeholders.
    /// Defaulted to `${target}/bin/${name}` at catalog load.
    #[serde(default)]
    pub binary: String,
    /// Shell command template whose output is the installed version string.
    #[serde(default)]
    pub check: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub build_dependencies: Vec<String>,
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts_with: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub messages: ToolMessages,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub schema_version: u32,

    /// Per-resolution-run annotations. Never serialized; only mutated on
    /// plan-owned copies, never on the catalog's canonical instances.
    #[serde(skip)]
    pub status: ToolStatus,
}

impl Tool {
    /// Render a `${name}`/`${target}`/`${version}` template for this tool.
    pub fn render(&self, template: &str, target: &str) -> String {
        template
            .replace("${name}", &self.name)
            .replace("${target}", target)
            .replace("${version}", &self.version)
    }

    /// The absolute path of this tool's binary for a given target directory.
    pub fn binary_path(&self, target: &str) -> String {
        self.render(&self.binary, target)
    }
}

/// Free-text blurbs shown around install/update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ToolMessages {
    #[serde(default)]
    pub internals: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default)]
    pub update: Option<String>,
}

/// Transient per-plan annotations, populated by the status prober and the
/// conflict detector during one planning pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolStatus {
    pub binary_present: bool,
    pub marker_present: bool,
    pub installed_version: Option<String>,
    pub version_matches: bool,
    pub is_dependency: bool,
    pub is_requested: bool,
    pub skip_conflict: bool,
}

/// The identity under which an artifact is addressed in a registry
/// and keyed in every cache backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolIdentity {
    pub registry: String,
    pub repository: String,
    pub name: String,
    pub version: String,
}

impl ToolIdentity {
    /// Full image reference, e.g. `ghcr.io/toolpak/tools/jq:1.7.1`.
    pub fn reference(&self) -> String {
        format!(
            "{}/{}/{}:{}",
            self.registry, self.repository, self.name, self.version
        )
    }
}

impl std::fmt::Display for ToolIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reference())
    }
}
