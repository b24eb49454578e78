//! Project configuration record.
//!
//! Parsing of configuration files happens elsewhere; this crate consumes the
//! already-parsed record.

use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENCODING: &str = "utf-8";

/// Default timeout for tool-level operations (project-wide, overridable per
/// operation, never below 10 seconds).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(240);

/// Minimum accepted tool timeout.
pub const MIN_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration of a single project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Absolute path to the project root.
    pub project_root: PathBuf,
    /// Languages to activate; the order is used as the routing tie-break.
    pub languages: Vec<Language>,
    /// Additional gitignore-style patterns to ignore.
    #[serde(default)]
    pub ignored_paths: Vec<String>,
    /// When true, every editing operation is rejected.
    #[serde(default)]
    pub read_only: bool,
    /// Encoding used when reading and writing source files.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// When true, all `.gitignore` files beneath the root contribute to the
    /// ignore spec.
    #[serde(default = "default_true")]
    pub honor_gitignore: bool,
    /// Tool-level timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TOOL_TIMEOUT.as_secs()
}

impl ProjectConfig {
    pub fn new(project_root: impl Into<PathBuf>, languages: Vec<Language>) -> Self {
        Self {
            project_root: project_root.into(),
            languages,
            ignored_paths: Vec::new(),
            read_only: false,
            encoding: default_encoding(),
            honor_gitignore: true,
            tool_timeout_secs: default_timeout_secs(),
        }
    }

    /// The effective tool timeout, clamped to the accepted minimum.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs).max(MIN_TOOL_TIMEOUT)
    }
}
