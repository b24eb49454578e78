//! Path safety and encoded file I/O.

use crate::{ProjectError, Result};
use encoding_rs::Encoding;
use std::path::{Component, Path, PathBuf};

/// Resolves a root-relative path to an absolute path, rejecting any path
/// that escapes the project root (via `..`, an absolute component, or a
/// symlink pointing outside the root).
///
/// The returned path is not required to exist; for non-existing paths the
/// nearest existing ancestor is canonicalised for the symlink check.
pub fn resolve_relative_path(root: &Path, relative_path: &Path) -> Result<PathBuf> {
    if relative_path.is_absolute() {
        return Err(ProjectError::PathEscape(relative_path.to_path_buf()));
    }

    // lexical normalisation catches `..` escapes before touching the fs
    let mut normalized = PathBuf::new();
    for component in relative_path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ProjectError::PathEscape(relative_path.to_path_buf()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ProjectError::PathEscape(relative_path.to_path_buf()));
            }
        }
    }

    let canonical_root = root.canonicalize()?;
    let joined = canonical_root.join(&normalized);

    // canonicalise the deepest existing ancestor to detect symlink escapes
    let mut existing = joined.clone();
    let mut remainder = PathBuf::new();
    while !existing.exists() {
        let Some(file_name) = existing.file_name().map(|n| n.to_os_string()) else {
            break;
        };
        remainder = if remainder.as_os_str().is_empty() {
            PathBuf::from(&file_name)
        } else {
            Path::new(&file_name).join(&remainder)
        };
        if !existing.pop() {
            break;
        }
    }
    let resolved = if existing.as_os_str().is_empty() {
        joined.clone()
    } else {
        let canonical = existing.canonicalize()?;
        if remainder.as_os_str().is_empty() {
            canonical
        } else {
            canonical.join(&remainder)
        }
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(ProjectError::PathEscape(relative_path.to_path_buf()));
    }
    Ok(resolved)
}

fn lookup_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| ProjectError::UnknownEncoding(label.to_string()))
}

/// Reads a file using the given encoding label (e.g. `utf-8`, `latin1`).
pub fn read_file(path: &Path, encoding: &str) -> Result<String> {
    let encoding = lookup_encoding(encoding)?;
    let bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProjectError::FileNotFound(path.display().to_string())
        } else {
            ProjectError::Io(e)
        }
    })?;
    let (text, _, _) = encoding.decode(&bytes);
    Ok(text.into_owned())
}

/// Writes a file using the given encoding label, creating parent directories
/// as needed.
pub fn write_file(path: &Path, content: &str, encoding: &str) -> Result<()> {
    let encoding = lookup_encoding(encoding)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let (bytes, _, _) = encoding.encode(content);
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn rejects_parent_dir_escape() {
        let dir = tempdir().unwrap();
        let err = resolve_relative_path(dir.path(), Path::new("../outside.txt")).unwrap_err();
        assert!(matches!(err, ProjectError::PathEscape(_)));
    }

    #[test]
    fn rejects_absolute_path() {
        let dir = tempdir().unwrap();
        let err = resolve_relative_path(dir.path(), Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, ProjectError::PathEscape(_)));
    }

    #[test]
    fn interior_parent_dirs_are_allowed() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let resolved = resolve_relative_path(dir.path(), Path::new("a/b/../file.txt")).unwrap();
        assert!(resolved.ends_with("a/file.txt"));
    }

    #[test]
    fn nonexistent_paths_resolve_inside_root() {
        let dir = tempdir().unwrap();
        let resolved = resolve_relative_path(dir.path(), Path::new("new/sub/file.txt")).unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let outside = tempdir().unwrap();
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let err = resolve_relative_path(dir.path(), Path::new("link/file.txt")).unwrap_err();
        assert!(matches!(err, ProjectError::PathEscape(_)));
    }

    #[test]
    fn read_write_round_trip_utf8() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.txt");
        write_file(&path, "héllo wörld", "utf-8").unwrap();
        assert_eq!(read_file(&path, "utf-8").unwrap(), "héllo wörld");
    }

    #[test]
    fn missing_file_maps_to_file_not_found() {
        let dir = tempdir().unwrap();
        let err = read_file(&dir.path().join("absent.txt"), "utf-8").unwrap_err();
        assert!(matches!(err, ProjectError::FileNotFound(_)));
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let dir = tempdir().unwrap();
        let err = read_file(&dir.path().join("f.txt"), "not-an-encoding").unwrap_err();
        assert!(matches!(err, ProjectError::UnknownEncoding(_)));
    }
}
