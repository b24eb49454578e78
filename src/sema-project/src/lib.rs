//! Project model for Sema.
//!
//! Provides the pieces of a project that are independent of any language
//! server: the set of supported languages with their filename matchers, the
//! project configuration record, the ignore spec (explicit patterns plus
//! gitignore files), path-safety validation and encoded file I/O.

pub mod config;
pub mod fs;
pub mod ignore_spec;
pub mod language;
pub mod paths;

pub use config::{ProjectConfig, DEFAULT_ENCODING, DEFAULT_TOOL_TIMEOUT};
pub use fs::{read_file, resolve_relative_path, write_file};
pub use ignore_spec::IgnoreSpec;
pub use language::{FilenameMatcher, Language};
pub use paths::SemaPaths;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("path escapes the project root: {0}")]
    PathEscape(PathBuf),
    #[error("path is ignored: {0}")]
    PathIgnored(String),
    #[error("project is read-only")]
    ReadOnly,
    #[error("no such file: {0}")]
    FileNotFound(String),
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProjectError>;
