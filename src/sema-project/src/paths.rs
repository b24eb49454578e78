//! Data-directory resolution.

use std::path::{Path, PathBuf};

pub const PROJECT_DATA_DIR_NAME: &str = ".sema";
pub const CACHE_DIR_NAME: &str = "cache";

/// Resolves where Sema stores its data.
///
/// Derived once from the environment and home directory at activation; the
/// only process-wide state in the system.
#[derive(Debug, Clone)]
pub struct SemaPaths {
    home_data_dir: PathBuf,
}

impl SemaPaths {
    /// Resolve from `SEMA_HOME` or fall back to `~/.sema`.
    pub fn resolve() -> Self {
        let home_data_dir = std::env::var_os("SEMA_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(PROJECT_DATA_DIR_NAME)))
            .unwrap_or_else(|| PathBuf::from(PROJECT_DATA_DIR_NAME));
        Self { home_data_dir }
    }

    /// Global (non-project) data directory.
    pub fn home_data_dir(&self) -> &Path {
        &self.home_data_dir
    }

    /// Per-project data directory (`<root>/.sema`).
    pub fn project_data_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(PROJECT_DATA_DIR_NAME)
    }

    /// Per-project cache directory (`<root>/.sema/cache`).
    pub fn project_cache_dir(&self, project_root: &Path) -> PathBuf {
        self.project_data_dir(project_root).join(CACHE_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_cache_dir_is_under_project_data_dir() {
        let paths = SemaPaths::resolve();
        let cache = paths.project_cache_dir(Path::new("/work/proj"));
        assert_eq!(cache, PathBuf::from("/work/proj/.sema/cache"));
    }
}
