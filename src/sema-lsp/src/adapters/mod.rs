//! Per-language adapters.
//!
//! An adapter knows how to launch and drive one vendor language server:
//! which executable to run, which initialization options it needs, when it
//! is actually ready for requests, how to classify its stderr chatter, and
//! which build/output directories to skip when walking the project. Most
//! languages are described declaratively by a [`ServerSpec`] table entry;
//! servers with protocol quirks (the hybrid Vue server) get their own
//! adapter type.

mod specs;
mod vue;

pub use specs::{spec_for, ServerSpec, BUILTIN_SPECS};
pub use vue::VueAdapter;

use crate::handler::LanguageServerHandle;
use crate::transport::{default_stderr_classifier, StderrClassifier};
use crate::{LspError, Result};
use async_trait::async_trait;
use lsp_types::{Location, Position};
use sema_project::{IgnoreSpec, Language};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Directories no language server benefits from seeing.
pub const DEFAULT_IGNORED_DIRNAMES: &[&str] =
    &[".git", ".hg", ".svn", ".idea", ".vscode", ".sema"];

/// How an adapter signals that the server is ready for symbol queries.
#[derive(Debug, Clone, Copy)]
pub enum Readiness {
    /// Ready as soon as `initialize` has completed.
    Immediate,
    /// Ready once a `window/logMessage` contains one of `needles`
    /// (case-insensitive). When `required` is set, exceeding `timeout`
    /// fails activation; otherwise the adapter proceeds after the timeout.
    LogMessage {
        needles: &'static [&'static str],
        timeout: Duration,
        required: bool,
    },
}

/// What an adapter gets to work with once its primary server is spawned.
pub struct AdapterContext {
    pub handle: Arc<LanguageServerHandle>,
    pub root: PathBuf,
    pub ignore: Arc<IgnoreSpec>,
    pub encoding: String,
}

/// Per-language specialisation of the language-server machinery.
#[async_trait]
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> Language;

    fn display_name(&self) -> &str;

    /// Locates the vendor binary and returns the launch argv. Fails with
    /// [`LspError::MissingToolchain`] naming the tool and an install hint.
    fn resolve_command(&self, root: &Path) -> Result<Vec<String>>;

    /// Server-specific `initializationOptions`, if any.
    fn initialization_options(&self, _root: &Path) -> Option<Value> {
        None
    }

    /// Build/output directories to skip when walking source files.
    fn is_ignored_dirname(&self, name: &str) -> bool {
        DEFAULT_IGNORED_DIRNAMES.contains(&name)
    }

    fn stderr_classifier(&self) -> StderrClassifier {
        default_stderr_classifier()
    }

    fn readiness(&self) -> Readiness {
        Readiness::Immediate
    }

    /// How long to wait after the first file opens before cross-file
    /// references are trustworthy.
    fn cross_file_wait(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn language_id_for_path(&self, path: &Path) -> &'static str {
        self.language().language_id_for_path(path)
    }

    /// Called after the process is spawned and the default handlers are
    /// registered, before `initialize`. Hybrid adapters start companions
    /// and register their relay handlers here.
    async fn on_started(&self, _ctx: &AdapterContext) -> Result<()> {
        Ok(())
    }

    /// Called before the primary server shuts down.
    async fn on_stop(&self, _ctx: &AdapterContext) {}

    /// Cross-server reference resolution override. `None` means the
    /// default path (query the primary server) applies.
    async fn references_override(
        &self,
        _ctx: &AdapterContext,
        _relative_path: &Path,
        _position: Position,
    ) -> Option<Result<Vec<Location>>> {
        None
    }

    /// Number of documents this adapter intentionally holds open for
    /// indexing, outside the refcounted buffer accounting.
    fn held_open_count(&self) -> usize {
        0
    }
}

/// Creates the adapter for a language.
pub fn create_adapter(language: Language) -> Result<Arc<dyn LanguageAdapter>> {
    if language == Language::Vue {
        return Ok(Arc::new(VueAdapter::new()));
    }
    let spec = spec_for(language).ok_or_else(|| LspError::ServerInitFailed(format!(
        "no language server is configured for {language}"
    )))?;
    Ok(Arc::new(SpecAdapter { spec }))
}

/// Adapter driven entirely by a [`ServerSpec`] table entry.
pub struct SpecAdapter {
    spec: &'static ServerSpec,
}

impl SpecAdapter {
    pub fn new(spec: &'static ServerSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl LanguageAdapter for SpecAdapter {
    fn language(&self) -> Language {
        self.spec.language
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }

    fn resolve_command(&self, root: &Path) -> Result<Vec<String>> {
        for candidate in self.spec.commands {
            if let Some(resolved) = resolve_executable(candidate[0], root) {
                let mut argv = vec![resolved.to_string_lossy().into_owned()];
                argv.extend(candidate[1..].iter().map(|s| s.to_string()));
                return Ok(argv);
            }
        }
        Err(LspError::MissingToolchain {
            tool: self.spec.commands[0][0].to_string(),
            hint: self.spec.install_hint.to_string(),
        })
    }

    fn initialization_options(&self, root: &Path) -> Option<Value> {
        self.spec.init_options.map(|f| f(root))
    }

    fn is_ignored_dirname(&self, name: &str) -> bool {
        DEFAULT_IGNORED_DIRNAMES.contains(&name) || self.spec.ignored_dirnames.contains(&name)
    }

    fn stderr_classifier(&self) -> StderrClassifier {
        let quiet_markers = self.spec.stderr_quiet_markers;
        let fallback = default_stderr_classifier();
        Arc::new(move |line: &str| {
            let lower = line.to_ascii_lowercase();
            if quiet_markers.iter().any(|m| lower.contains(m)) {
                tracing::Level::DEBUG
            } else {
                fallback(line)
            }
        })
    }

    fn readiness(&self) -> Readiness {
        if self.spec.ready_needles.is_empty() {
            Readiness::Immediate
        } else {
            Readiness::LogMessage {
                needles: self.spec.ready_needles,
                timeout: Duration::from_secs(self.spec.ready_timeout_secs),
                required: self.spec.ready_required,
            }
        }
    }

    fn cross_file_wait(&self) -> Duration {
        Duration::from_secs(self.spec.cross_file_wait_secs)
    }
}

/// Looks up an executable on `PATH`, then in the project's
/// `node_modules/.bin`.
pub fn resolve_executable(name: &str, root: &Path) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Some(path);
    }
    let local = root.join("node_modules").join(".bin").join(name);
    if local.is_file() {
        return Some(local);
    }
    #[cfg(windows)]
    {
        let cmd = local.with_extension("cmd");
        if cmd.is_file() {
            return Some(cmd);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_non_vue_language_has_a_spec() {
        for language in Language::all() {
            if *language == Language::Vue {
                continue;
            }
            assert!(
                spec_for(*language).is_some(),
                "missing server spec for {language}"
            );
        }
    }

    #[test]
    fn missing_executable_reports_toolchain_hint() {
        let spec = spec_for(Language::Python).unwrap();
        // resolution of a nonsense root with no PATH hit for the fallback
        // only exercises the error shape when the tool is absent
        let adapter = SpecAdapter::new(spec);
        match adapter.resolve_command(Path::new("/nonexistent-root-for-test")) {
            Ok(cmd) => assert!(!cmd.is_empty()), // tool happens to be installed
            Err(LspError::MissingToolchain { tool, hint }) => {
                assert!(!tool.is_empty());
                assert!(!hint.is_empty());
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn spec_adapter_merges_default_and_language_ignored_dirs() {
        let adapter = SpecAdapter::new(spec_for(Language::Python).unwrap());
        assert!(adapter.is_ignored_dirname(".git"));
        assert!(adapter.is_ignored_dirname("__pycache__"));
        assert!(!adapter.is_ignored_dirname("src"));

        let rust = SpecAdapter::new(spec_for(Language::Rust).unwrap());
        assert!(rust.is_ignored_dirname("target"));
        assert!(!rust.is_ignored_dirname("__pycache__"));
    }

    #[test]
    fn gopls_discovery_chatter_is_not_an_error() {
        let adapter = SpecAdapter::new(spec_for(Language::Go).unwrap());
        let classify = adapter.stderr_classifier();
        assert_eq!(
            classify("2024/01/01 walker.go:97: walking of {file:///p} took 1s"),
            tracing::Level::DEBUG
        );
        assert_eq!(
            classify("discover.go:12: error while discovering"),
            tracing::Level::DEBUG,
            "discovery lines stay quiet even when they mention errors"
        );
        assert_eq!(classify("fatal: broken"), tracing::Level::ERROR);
    }
}
