//! Process transport: run external commands with their output captured.
//!
//! Only local execution is supported. Long-running processes stream straight
//! into log files; short queries are captured in memory.

pub mod local;

use crate::core::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result of a process whose output went to log files.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of a short query whose output is kept in memory.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A fully described process launch.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Run an invocation to completion.
pub fn exec(invocation: &Invocation) -> Result<ExecOutput> {
    local::exec_logged(invocation)
}

/// Run a short read-only query and capture its output.
pub fn query(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<CapturedOutput> {
    local::exec_capture(program, args, cwd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_exec_output_success() {
        let ok = ExecOutput { exit_code: 0, duration: Duration::ZERO };
        assert!(ok.success());
        let fail = ExecOutput { exit_code: 1, duration: Duration::ZERO };
        assert!(!fail.success());
        let sig = ExecOutput { exit_code: -1, duration: Duration::ZERO };
        assert!(!sig.success());
    }

    #[test]
    fn test_transport_invocation_builder() {
        let inv = Invocation::new("/bin/project", "/tmp/o", "/tmp/e")
            .arg("config.xml")
            .arg_path(Path::new("/out"))
            .cwd("/work");
        assert_eq!(inv.args, vec!["config.xml", "/out"]);
        assert_eq!(inv.cwd.as_deref(), Some(Path::new("/work")));
    }

    #[test]
    fn test_transport_query_delegates() {
        let out = query("echo", &["query-test"], None).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "query-test");
    }
}
