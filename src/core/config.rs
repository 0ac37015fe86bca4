//! Session configuration (`simsweep.yaml`).
//!
//! Parsed once into an immutable [`SessionConfig`] that is handed to the store,
//! build cache, and scheduler at construction. Relative paths are resolved
//! against the directory containing the config file.

use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Root of `inputs/`, `outputs/`, and the database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Source tree of the external simulation program
    #[serde(default = "default_program_dir")]
    pub program_dir: PathBuf,

    /// Maximum number of simulations running at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Toolchain settings
    #[serde(default)]
    pub build: BuildSettings,

    /// Output pruning applied after each successful run
    #[serde(default)]
    pub prune: PruneOptions,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_program_dir() -> PathBuf {
    PathBuf::from("PhysiCell")
}

fn default_max_parallel() -> usize {
    1
}

/// How the external program is compiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Toolchain invocation; `CC=`, `PROGRAM_NAME=` and macro flags are appended
    #[serde(default = "default_build_command")]
    pub command: Vec<String>,

    /// Compiler passed as `CC`
    #[serde(default = "default_compiler")]
    pub compiler: String,

    /// Extra macros required for every custom code folder
    #[serde(default)]
    pub macros: Vec<String>,

    /// Remove previous objects when the macro set changes
    #[serde(default = "default_true")]
    pub clean_on_macro_change: bool,

    /// Rebuild unconditionally
    #[serde(default)]
    pub force: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            compiler: default_compiler(),
            macros: Vec::new(),
            clean_on_macro_change: true,
            force: false,
        }
    }
}

fn default_build_command() -> Vec<String> {
    vec!["make".to_string(), "-j".to_string(), "8".to_string()]
}

fn default_compiler() -> String {
    "g++".to_string()
}

fn default_true() -> bool {
    true
}

/// Which generated output categories to delete after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneOptions {
    /// SVG snapshots
    #[serde(default)]
    pub svg: bool,

    /// Text dumps
    #[serde(default)]
    pub txt: bool,

    /// MATLAB binary dumps
    #[serde(default)]
    pub mat: bool,

    /// Also prune the `initial*` file of each pruned category
    #[serde(default)]
    pub initial: bool,

    /// Also prune the `final*` file of each pruned category
    #[serde(default, rename = "final")]
    pub final_: bool,
}

impl PruneOptions {
    pub fn any(&self) -> bool {
        self.svg || self.txt || self.mat
    }
}

impl SessionConfig {
    /// Configuration with defaults rooted at the given directories.
    pub fn new(data_dir: impl Into<PathBuf>, program_dir: impl Into<PathBuf>) -> Self {
        Self {
            version: "1.0".to_string(),
            data_dir: data_dir.into(),
            program_dir: program_dir.into(),
            max_parallel: default_max_parallel(),
            build: BuildSettings::default(),
            prune: PruneOptions::default(),
        }
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.data_dir.join("inputs")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("simsweep.db")
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    /// Parent of the per-build temporary trees.
    pub fn build_scratch_dir(&self) -> PathBuf {
        self.data_dir.join(".build")
    }

    fn resolve_relative(mut self, base: &Path) -> Self {
        if self.data_dir.is_relative() {
            self.data_dir = base.join(&self.data_dir);
        }
        if self.program_dir.is_relative() {
            self.program_dir = base.join(&self.program_dir);
        }
        self
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a session config file, resolving relative paths against its directory.
pub fn parse_config_file(path: &Path) -> Result<SessionConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let config = parse_config(&content)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(config.resolve_relative(base))
}

/// Parse a session config from a string (paths left as written).
pub fn parse_config(yaml: &str) -> Result<SessionConfig> {
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Config(format!("YAML parse error: {}", e)))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &SessionConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }
    if config.max_parallel == 0 {
        errors.push(ValidationError {
            message: "max_parallel must be at least 1".to_string(),
        });
    }
    if config.build.command.is_empty() {
        errors.push(ValidationError {
            message: "build.command must not be empty".to_string(),
        });
    }
    for m in &config.build.macros {
        if m.is_empty() || m.chars().any(char::is_whitespace) {
            errors.push(ValidationError {
                message: format!("invalid macro name '{}'", m),
            });
        }
    }

    errors
}

/// Parse and validate, collapsing validation errors into one.
pub fn load_session_config(path: &Path) -> Result<SessionConfig> {
    let config = parse_config_file(path)?;
    let errors = validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    Err(Error::Config(joined.join("; ")))
}
