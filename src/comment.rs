//! Comment-script invocation: runs an external script with no stdin and
//! captures its trimmed stdout as the revision-push comment.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{PgMakeSchemasError, Result};

pub const COMMENT_FILE_NAME: &str = "comment.sh";

pub fn comment(comment_file_path: &Path) -> Result<String> {
    let output = Command::new(comment_file_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .output()
        .map_err(|source| PgMakeSchemasError::Io { path: comment_file_path.to_path_buf(), source })?;

    if !output.status.success() {
        return Err(PgMakeSchemasError::config(format!(
            "{}: exited with {:?}",
            comment_file_path.display(),
            output.status.code()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn captures_trimmed_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join(COMMENT_FILE_NAME);
        fs::write(&script, "#!/bin/sh\necho 'deploy 2026-08-01'\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let result = comment(&script).unwrap();
        assert_eq!(result, "deploy 2026-08-01");
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join(COMMENT_FILE_NAME);
        fs::write(&script, "#!/bin/sh\nexit 1\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let err = comment(&script).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
