//! The ignore spec: explicit project patterns plus gitignore files.

use crate::ProjectError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Decides which paths under the project root are ignored.
///
/// The spec is the union of explicit gitignore-style patterns from the
/// project configuration and, when enabled, every `.gitignore` file found
/// beneath the root. Paths under `.git/` are always ignored. Immutable after
/// construction; safe to share across threads.
#[derive(Debug)]
pub struct IgnoreSpec {
    root: PathBuf,
    explicit: Option<Gitignore>,
    /// One matcher per discovered `.gitignore`, ordered shallow to deep.
    gitignores: Vec<(PathBuf, Gitignore)>,
}

impl IgnoreSpec {
    /// Builds the spec by scanning the project tree for `.gitignore` files.
    ///
    /// The scan happens once at project activation; the result is immutable.
    pub fn build(
        root: &Path,
        explicit_patterns: &[String],
        honor_gitignore: bool,
    ) -> Result<Self, ProjectError> {
        let root = root.to_path_buf();

        let explicit = if explicit_patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new(&root);
            for pattern in explicit_patterns {
                if let Err(e) = builder.add_line(None, pattern) {
                    warn!("Invalid ignore pattern '{}': {}", pattern, e);
                }
            }
            match builder.build() {
                Ok(gi) => Some(gi),
                Err(e) => {
                    warn!("Failed to build explicit ignore matcher: {}", e);
                    None
                }
            }
        };

        let mut gitignores = Vec::new();
        if honor_gitignore {
            let mut files: Vec<PathBuf> = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| e.file_name() != ".git")
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && e.file_name() == ".gitignore")
                .map(|e| e.into_path())
                .collect();
            // shallow to deep, so that deeper files can be consulted first
            files.sort_by_key(|p| p.components().count());
            for file in files {
                let dir = file.parent().unwrap_or(&root).to_path_buf();
                let mut builder = GitignoreBuilder::new(&dir);
                if let Some(e) = builder.add(&file) {
                    warn!("Failed to parse {}: {}", file.display(), e);
                    continue;
                }
                match builder.build() {
                    Ok(gi) => gitignores.push((dir, gi)),
                    Err(e) => warn!("Failed to build matcher for {}: {}", file.display(), e),
                }
            }
            debug!(
                "Ignore spec built from {} .gitignore file(s) under {}",
                gitignores.len(),
                root.display()
            );
        }

        Ok(Self {
            root,
            explicit,
            gitignores,
        })
    }

    /// An empty spec that only ignores `.git/`.
    pub fn empty(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            explicit: None,
            gitignores: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the given root-relative path is ignored.
    pub fn is_ignored(&self, relative_path: &Path, is_dir: bool) -> bool {
        if relative_path
            .components()
            .any(|c| matches!(c, Component::Normal(n) if n == ".git"))
        {
            return true;
        }

        if let Some(explicit) = &self.explicit {
            if explicit
                .matched_path_or_any_parents(relative_path, is_dir)
                .is_ignore()
            {
                return true;
            }
        }

        // gitignore precedence: the deepest file containing a decision wins
        let absolute = self.root.join(relative_path);
        for (dir, gitignore) in self.gitignores.iter().rev() {
            let Ok(rel_to_dir) = absolute.strip_prefix(dir) else {
                continue;
            };
            let matched = gitignore.matched_path_or_any_parents(rel_to_dir, is_dir);
            if matched.is_ignore() {
                return true;
            }
            if matched.is_whitelist() {
                return false;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn git_dir_is_always_ignored() {
        let dir = tempdir().unwrap();
        let spec = IgnoreSpec::empty(dir.path());
        assert!(spec.is_ignored(Path::new(".git/config"), false));
        assert!(spec.is_ignored(Path::new(".git"), true));
        assert!(!spec.is_ignored(Path::new("src/main.rs"), false));
    }

    #[test]
    fn explicit_patterns_apply() {
        let dir = tempdir().unwrap();
        let spec = IgnoreSpec::build(
            dir.path(),
            &["*.log".to_string(), "build/".to_string()],
            false,
        )
        .unwrap();
        assert!(spec.is_ignored(Path::new("debug.log"), false));
        assert!(spec.is_ignored(Path::new("build/out.txt"), false));
        assert!(!spec.is_ignored(Path::new("src/main.rs"), false));
    }

    #[test]
    fn root_gitignore_is_honoured() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n*.tmp\n").unwrap();
        let spec = IgnoreSpec::build(dir.path(), &[], true).unwrap();
        assert!(spec.is_ignored(Path::new("target/debug/app"), false));
        assert!(spec.is_ignored(Path::new("scratch.tmp"), false));
        assert!(!spec.is_ignored(Path::new("src/lib.rs"), false));
    }

    #[test]
    fn nested_gitignore_applies_within_its_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/.gitignore"), "generated/\n").unwrap();
        let spec = IgnoreSpec::build(dir.path(), &[], true).unwrap();
        assert!(spec.is_ignored(Path::new("sub/generated/a.py"), false));
        assert!(!spec.is_ignored(Path::new("generated/a.py"), false));
    }

    #[test]
    fn honor_gitignore_false_skips_gitignore_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
        let spec = IgnoreSpec::build(dir.path(), &[], false).unwrap();
        assert!(!spec.is_ignored(Path::new("target/debug/app"), false));
    }
}
