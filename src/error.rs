//! Error types for the installation engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, probing or installing tools.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown tool name in a catalog lookup or during dependency resolution.
    #[error("Tool '{0}' not found in catalog")]
    ToolNotFound(String),

    /// A dependency cycle was hit during resolution.
    #[error("Dependency cycle detected: {0}")]
    CycleDetected(String),

    /// Conflicting tools were found in the plan.
    #[error("Conflicts detected for '{tool}': {conflicts}")]
    ConflictDetected {
        /// The tool whose conflict list matched.
        tool: String,
        /// Comma-separated conflicting tool names.
        conflicts: String,
    },

    /// A filesystem stat or version-check subprocess failed.
    #[error("Failed to probe status of '{tool}': {message}")]
    ProbeFailure {
        /// The tool being probed.
        tool: String,
        /// Error message.
        message: String,
    },

    /// The registry or daemon boundary returned an error.
    #[error("Failed to fetch artifact for '{tool}': {message}")]
    FetchFailure {
        /// The tool whose artifact was requested.
        tool: String,
        /// Error message.
        message: String,
    },

    /// A runtime dependency was neither present nor installed this run.
    #[error("Runtime dependency '{dependency}' of '{tool}' is not installed")]
    DependencyMissing {
        /// The tool being installed.
        tool: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Malformed archive, path-escape attempt or write failure during extraction.
    #[error("Extraction failed: {0}")]
    ExtractFailure(String),

    /// Marker or manifest read/write error during install or uninstall.
    #[error("State error for '{tool}': {message}")]
    StateInconsistency {
        /// The tool whose state records failed.
        tool: String,
        /// Error message.
        message: String,
    },

    /// Check mode found tools that are missing or outdated.
    #[error("{0} tool(s) missing or outdated")]
    CheckFailed(usize),

    /// The catalog document could not be parsed.
    #[error("Could not parse catalog document: {0}")]
    CatalogParse(#[from] serde_json::Error),

    /// Invalid search pattern.
    #[error("Invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn probe_failure(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProbeFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn fetch_failure(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FetchFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn state(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateInconsistency {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
