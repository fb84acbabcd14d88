//! Path and I/O guard: only open files that live inside an allow-listed
//! directory, and refuse to follow a symlink planted at the final path
//! component, using `O_NOFOLLOW` plus a `/proc/self/fd` identity cross-check
//! where available.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{PgMakeSchemasError, Result};

/// Returns `true` if `path` is lexically contained within `dir` (both
/// already canonicalized).
fn is_contained_in(path: &Path, dir: &Path) -> bool {
    path == dir || path.starts_with(dir)
}

pub fn check_allowed(path: &Path, allow_list: &[PathBuf]) -> Result<()> {
    let canon = path
        .canonicalize()
        .map_err(|source| PgMakeSchemasError::Io { path: path.to_path_buf(), source })?;

    if allow_list.iter().any(|dir| is_contained_in(&canon, dir)) {
        Ok(())
    } else {
        Err(PgMakeSchemasError::path_not_allowed(path))
    }
}

/// Opens `path` for reading after checking it against `allow_list`. On
/// unix, opens with `O_NOFOLLOW` so a symlink swapped in at the final
/// component is refused outright, and — when `/proc` exists — re-resolves
/// the opened descriptor's path and compares it against the canonical
/// request, defending against a TOCTOU race where the target is replaced
/// between the allow-list check and the open.
pub fn open_safely(path: &Path, allow_list: &[PathBuf]) -> Result<File> {
    check_allowed(path, allow_list)?;

    let file = open_no_follow(path)?;

    #[cfg(unix)]
    {
        if Path::new("/proc").is_dir() {
            verify_fd_identity(&file, path)?;
        }
    }

    Ok(file)
}

pub fn read_to_string_safely(path: &Path, allow_list: &[PathBuf]) -> Result<String> {
    let mut file = open_safely(path, allow_list)?;
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|source| PgMakeSchemasError::Io { path: path.to_path_buf(), source })?;
    Ok(content)
}

#[cfg(unix)]
fn open_no_follow(path: &Path) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
        .map_err(|source| PgMakeSchemasError::Io { path: path.to_path_buf(), source })
}

#[cfg(not(unix))]
fn open_no_follow(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| PgMakeSchemasError::Io { path: path.to_path_buf(), source })
}

#[cfg(unix)]
fn verify_fd_identity(file: &File, requested: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd_path = format!("/proc/self/fd/{}", file.as_raw_fd());
    let opened_path = std::fs::read_link(&fd_path)
        .map_err(|source| PgMakeSchemasError::Io { path: PathBuf::from(&fd_path), source })?;

    let requested_canon = requested
        .canonicalize()
        .map_err(|source| PgMakeSchemasError::Io { path: requested.to_path_buf(), source })?;

    if opened_path != requested_canon {
        return Err(PgMakeSchemasError::unsafe_open(
            requested,
            format!("opened file {opened_path:?} does not match requested path {requested_canon:?}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_path_outside_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let allowed = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.sql");
        fs::write(&file_path, "select 1;").unwrap();

        let err = open_safely(&file_path, &[allowed.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Path);
    }

    #[test]
    fn allows_path_inside_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.sql");
        fs::write(&file_path, "select 1;").unwrap();

        let content = read_to_string_safely(&file_path, &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(content, "select 1;");
    }

    #[cfg(unix)]
    #[test]
    fn refuses_to_follow_a_symlink_at_the_final_component() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.sql");
        fs::write(&target, "select 1;").unwrap();
        let link = dir.path().join("link.sql");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = open_safely(&link, &[dir.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }
}
