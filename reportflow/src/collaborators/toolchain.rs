//! Spawning external toolchain binaries.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

use crate::errors::CollaboratorError;

/// Runs `program` to completion in `cwd`, capturing stdout and stderr.
///
/// The child is killed if the returned future is dropped, so a stage
/// timeout or cancellation never leaves a stray process behind. A missing
/// binary aborts the run; retrying cannot make it appear.
pub(crate) async fn run_tool<I, S>(
    program: &Path,
    args: I,
    cwd: &Path,
) -> Result<Output, CollaboratorError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program = %program.display(), cwd = %cwd.display(), "Spawning toolchain");
    cmd.output().await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => {
            CollaboratorError::fatal(format!(
                "missing toolchain: '{}' not found",
                program.display()
            ))
        }
        ErrorKind::PermissionDenied => {
            CollaboratorError::fatal(format!(
                "missing toolchain: '{}' is not executable",
                program.display()
            ))
        }
        _ => CollaboratorError::transient(format!("failed to run '{}': {e}", program.display())),
    })
}

/// The last `lines` lines of `text`.
pub(crate) fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Creates a scratch directory for one toolchain invocation.
pub(crate) fn scratch_dir(prefix: &str) -> Result<tempfile::TempDir, CollaboratorError> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|e| CollaboratorError::transient(format!("cannot create scratch directory: {e}")))
}
