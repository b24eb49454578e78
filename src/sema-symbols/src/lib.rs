//! Symbol service API for Sema.
//!
//! The language-neutral surface the rest of the system consumes: symbol
//! lookup by name path, references with enclosing-symbol metadata,
//! definitions, rename, overviews, pattern search, and symbol-aware editing
//! primitives guarded by a read-before-edit check. All operations validate
//! their paths against the project root and the ignore spec, and are
//! serialised through the project's task executor.

pub mod lines_read;
pub mod name_path;
pub mod service;
pub mod text;

pub use lines_read::LinesRead;
pub use name_path::NamePathPattern;
pub use service::{
    FindSymbolsOptions, OverviewResult, ReferencingSymbol, SearchPatternOptions, SymbolService,
};
pub use text::MatchedLines;

use sema_lsp::LspError;
use sema_project::ProjectError;
use sema_tasks::TaskError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("path escapes the project root: {0}")]
    PathEscape(PathBuf),
    #[error("path is ignored: {0}")]
    PathIgnored(String),
    #[error("project is read-only")]
    ReadOnly,
    #[error("no such file: {0}")]
    FileNotFound(String),
    #[error("no symbol found matching '{0}'")]
    SymbolNotFound(String),
    #[error("'{name_path}' matched {count} symbols where exactly one is required")]
    AmbiguousSymbol { name_path: String, count: usize },
    #[error("lines {start_line}-{end_line} of {path} must be read before they can be edited")]
    LinesNotRead {
        path: String,
        start_line: u32,
        end_line: u32,
    },
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("operation exceeded {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Lsp(LspError),
    #[error(transparent)]
    Project(ProjectError),
    #[error("{0}")]
    Internal(String),
}

impl From<ProjectError> for ServiceError {
    fn from(e: ProjectError) -> Self {
        match e {
            ProjectError::PathEscape(path) => ServiceError::PathEscape(path),
            ProjectError::PathIgnored(path) => ServiceError::PathIgnored(path),
            ProjectError::ReadOnly => ServiceError::ReadOnly,
            ProjectError::FileNotFound(path) => ServiceError::FileNotFound(path),
            other => ServiceError::Project(other),
        }
    }
}

impl From<LspError> for ServiceError {
    fn from(e: LspError) -> Self {
        match e {
            LspError::Timeout { timeout, .. } => ServiceError::Timeout(timeout),
            LspError::Project(project) => project.into(),
            other => ServiceError::Lsp(other),
        }
    }
}

impl From<TaskError> for ServiceError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::Cancelled => ServiceError::Cancelled,
            TaskError::Timeout(duration) => ServiceError::Timeout(duration),
            TaskError::Failed(message) => ServiceError::Internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
