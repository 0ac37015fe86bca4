//! Local process execution.

use super::{CapturedOutput, ExecOutput, Invocation};
use crate::core::error::{Error, Result};
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

/// Spawn the invocation with stdout/stderr redirected to its log files.
///
/// A process killed by a signal has no exit code and reports -1.
pub fn exec_logged(inv: &Invocation) -> Result<ExecOutput> {
    for log in [&inv.stdout, &inv.stderr] {
        if let Some(parent) = log.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
    }
    let stdout = File::create(&inv.stdout).map_err(|e| Error::io(&inv.stdout, e))?;
    let stderr = File::create(&inv.stderr).map_err(|e| Error::io(&inv.stderr, e))?;

    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    if let Some(dir) = &inv.cwd {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let status = cmd.status().map_err(|e| Error::io(&inv.program, e))?;
    Ok(ExecOutput {
        exit_code: status.code().unwrap_or(-1),
        duration: start.elapsed(),
    })
}

/// Run `program args...` and capture its output.
pub fn exec_capture(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<CapturedOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd.output().map_err(|e| Error::io(program, e))?;
    Ok(CapturedOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(dir: &Path, script: &str) -> Invocation {
        Invocation::new("sh", dir.join("out.log"), dir.join("out.err"))
            .arg("-c")
            .arg(script)
    }

    #[test]
    fn test_local_logged_echo() {
        let dir = tempfile::tempdir().unwrap();
        let out = exec_logged(&sh(dir.path(), "echo hello")).unwrap();
        assert!(out.success());
        let log = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert_eq!(log.trim(), "hello");
    }

    #[test]
    fn test_local_logged_failure_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let out = exec_logged(&sh(dir.path(), "echo oops >&2; exit 42")).unwrap();
        assert_eq!(out.exit_code, 42);
        let err = std::fs::read_to_string(dir.path().join("out.err")).unwrap();
        assert!(err.contains("oops"));
    }

    #[test]
    fn test_local_logged_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let inv = sh(dir.path(), "printf '%s' hi > greeting.txt").cwd(dir.path());
        assert!(exec_logged(&inv).unwrap().success());
        let text = std::fs::read_to_string(dir.path().join("greeting.txt")).unwrap();
        assert_eq!(text, "hi");
    }

    #[test]
    fn test_local_logged_creates_log_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let inv = Invocation::new("sh", nested.join("o.log"), nested.join("o.err"))
            .arg("-c")
            .arg("true");
        assert!(exec_logged(&inv).unwrap().success());
        assert!(nested.join("o.err").exists());
    }

    #[test]
    fn test_local_missing_program_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let inv = Invocation::new(dir.path().join("nope"), dir.path().join("o"), dir.path().join("e"));
        assert!(matches!(exec_logged(&inv), Err(Error::Io { .. })));
    }

    #[test]
    fn test_local_signal_killed() {
        let out = exec_capture("sh", &["-c", "kill -9 $$"], None).unwrap();
        assert_eq!(out.exit_code, -1);
    }
}
