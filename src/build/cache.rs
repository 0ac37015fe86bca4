//! Per-folder program binaries, rebuilt only when their inputs change.
//!
//! A custom code folder is current when its recorded macro set, program
//! revision, and source fingerprint all match and the binary exists. Each
//! (folder, macro set) pair is checked at most once per session.

use super::revision::ProgramRevision;
use crate::core::config::SessionConfig;
use crate::core::error::{Error, Result};
use crate::core::paths;
use crate::core::types::{InputFolders, ProvenanceEvent};
use crate::provenance::{eventlog, hasher};
use crate::transport::{self, Invocation};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name of the compiled program inside a custom code folder.
pub const BINARY_NAME: &str = "project";

const MACROS_FILE: &str = "macros.txt";
const REVISION_FILE: &str = "revision.txt";
const SOURCES_FILE: &str = "sources.blake3";
const BUILD_LOG: &str = "build.log";
const BUILD_ERR: &str = "build.err";

/// Files in a custom code folder that are build products, not sources.
const BUILD_PRODUCTS: &[&str] = &[
    BINARY_NAME,
    MACROS_FILE,
    REVISION_FILE,
    SOURCES_FILE,
    BUILD_LOG,
    BUILD_ERR,
];

/// Macro the program needs to read an ECM initial condition.
pub const ECM_MACRO: &str = "ADDON_PHYSIECM";

/// Why a folder needs rebuilding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Forced,
    MissingBinary,
    MacrosChanged,
    RevisionChanged,
    UntrustedRevision,
    SourcesChanged,
}

/// Session-scoped build state.
pub struct BuildCache {
    revision: ProgramRevision,
    /// Macro set each folder was last settled with, and whether it built
    settled: HashMap<String, (BTreeSet<String>, bool)>,
    objects_cleared: bool,
}

impl BuildCache {
    pub fn new(revision: ProgramRevision) -> Self {
        Self {
            revision,
            settled: HashMap::new(),
            objects_cleared: false,
        }
    }

    pub fn revision(&self) -> &ProgramRevision {
        &self.revision
    }

    /// Make sure `folder` has a binary built from the current inputs.
    ///
    /// Returns `Ok(true)` if a build ran. A failed build is remembered for the
    /// rest of the session and reported again without retrying. Asking for a
    /// different macro set than the folder was settled with checks again.
    pub fn ensure_current(
        &mut self,
        cfg: &SessionConfig,
        folder: &str,
        required_macros: &BTreeSet<String>,
    ) -> Result<bool> {
        if let Some((macros, ok)) = self.settled.get(folder) {
            if macros == required_macros {
                return if *ok {
                    Ok(false)
                } else {
                    Err(build_failed(cfg, folder))
                };
            }
        }

        let reason = stale_reason(cfg, folder, required_macros, &self.revision)?;
        let Some(reason) = reason else {
            debug!(folder, "build is current");
            self.settled
                .insert(folder.to_string(), (required_macros.clone(), true));
            return Ok(false);
        };

        info!(folder, ?reason, "building program");
        let recorded = read_macros(&paths::custom_code_dir(cfg, folder).join(MACROS_FILE))?;
        let start = Instant::now();
        let result = rebuild(
            cfg,
            folder,
            required_macros,
            &self.revision,
            &recorded != required_macros,
        );
        let success = result.is_ok();
        eventlog::record(
            &cfg.events_path(),
            ProvenanceEvent::BuildFinished {
                custom_code: folder.to_string(),
                success,
                duration_seconds: start.elapsed().as_secs_f64(),
            },
        );
        self.settled
            .insert(folder.to_string(), (required_macros.clone(), success));
        result.map(|()| true)
    }

    /// Remove object files left in the program tree by earlier builds.
    /// Runs at most once per session.
    pub fn clear_stale_objects(&mut self, cfg: &SessionConfig) -> Result<usize> {
        if self.objects_cleared {
            return Ok(0);
        }
        self.objects_cleared = true;
        let removed = remove_objects(&cfg.program_dir)?;
        if removed > 0 {
            info!(removed, dir = %cfg.program_dir.display(), "cleared stale object files");
        }
        Ok(removed)
    }
}

/// Macros a set of inputs requires, including the configured extras.
pub fn required_macros(cfg: &SessionConfig, folders: &InputFolders) -> BTreeSet<String> {
    let mut macros: BTreeSet<String> = cfg.build.macros.iter().cloned().collect();
    if folders.ic_ecm.is_some() {
        macros.insert(ECM_MACRO.to_string());
    }
    macros
}

/// Compiled program for a custom code folder.
pub fn binary_path(cfg: &SessionConfig, folder: &str) -> PathBuf {
    paths::custom_code_dir(cfg, folder).join(BINARY_NAME)
}

/// First reason `folder` is out of date, or `None` if it is current.
pub fn stale_reason(
    cfg: &SessionConfig,
    folder: &str,
    required_macros: &BTreeSet<String>,
    revision: &ProgramRevision,
) -> Result<Option<StaleReason>> {
    let dir = paths::custom_code_dir(cfg, folder);
    if cfg.build.force {
        return Ok(Some(StaleReason::Forced));
    }
    if !dir.join(BINARY_NAME).is_file() {
        return Ok(Some(StaleReason::MissingBinary));
    }
    if &read_macros(&dir.join(MACROS_FILE))? != required_macros {
        return Ok(Some(StaleReason::MacrosChanged));
    }
    if !revision.is_clean() {
        return Ok(Some(StaleReason::UntrustedRevision));
    }
    let recorded: ProgramRevision = read_text(&dir.join(REVISION_FILE))?
        .parse()
        .unwrap_or(ProgramRevision::Downloaded);
    if &recorded != revision {
        return Ok(Some(StaleReason::RevisionChanged));
    }
    let fingerprint = hasher::hash_directory(&dir, BUILD_PRODUCTS)?;
    if read_text(&dir.join(SOURCES_FILE))?.trim() != fingerprint {
        return Ok(Some(StaleReason::SourcesChanged));
    }
    Ok(None)
}

fn rebuild(
    cfg: &SessionConfig,
    folder: &str,
    required_macros: &BTreeSet<String>,
    revision: &ProgramRevision,
    macros_changed: bool,
) -> Result<()> {
    let dir = paths::custom_code_dir(cfg, folder);
    let scratch = cfg.build_scratch_dir();
    std::fs::create_dir_all(&scratch).map_err(|e| Error::io(&scratch, e))?;
    let tree = tempfile::Builder::new()
        .prefix(&format!("{}-", folder))
        .tempdir_in(&scratch)
        .map_err(|e| Error::io(&scratch, e))?;

    copy_tree(&cfg.program_dir, tree.path(), &[".git"])?;
    copy_tree(&dir, tree.path(), BUILD_PRODUCTS)?;
    if macros_changed && cfg.build.clean_on_macro_change {
        remove_objects(tree.path())?;
    }

    let inv = toolchain_invocation(cfg, tree.path(), &dir, required_macros)?;
    let out = transport::exec(&inv)?;
    let built = tree.path().join(BINARY_NAME);
    if !out.success() || !built.is_file() {
        warn!(folder, exit_code = out.exit_code, "build failed");
        return Err(build_failed(cfg, folder));
    }

    install_binary(&built, &dir.join(BINARY_NAME))?;
    let macros: Vec<&str> = required_macros.iter().map(String::as_str).collect();
    write_text(&dir.join(MACROS_FILE), &macros.join("\n"))?;
    write_text(&dir.join(REVISION_FILE), &revision.to_string())?;
    let fingerprint = hasher::hash_directory(&dir, BUILD_PRODUCTS)?;
    write_text(&dir.join(SOURCES_FILE), &fingerprint)?;
    info!(folder, seconds = out.duration.as_secs_f64(), "build finished");
    Ok(())
}

fn toolchain_invocation(
    cfg: &SessionConfig,
    tree: &Path,
    folder_dir: &Path,
    required_macros: &BTreeSet<String>,
) -> Result<Invocation> {
    let (program, args) = cfg
        .build
        .command
        .split_first()
        .ok_or_else(|| Error::Config("build.command is empty".into()))?;
    let flags: Vec<String> = required_macros.iter().map(|m| format!("-D {}", m)).collect();
    let mut inv = Invocation::new(
        program,
        folder_dir.join(BUILD_LOG),
        folder_dir.join(BUILD_ERR),
    )
    .cwd(tree);
    for arg in args {
        inv = inv.arg(arg.as_str());
    }
    Ok(inv
        .arg(format!("CC={}", cfg.build.compiler))
        .arg(format!("PROGRAM_NAME={}", BINARY_NAME))
        .arg(format!("ADDITIONAL_COMPILER_FLAGS={}", flags.join(" "))))
}

fn build_failed(cfg: &SessionConfig, folder: &str) -> Error {
    Error::BuildFailed {
        folder: folder.to_string(),
        log: paths::custom_code_dir(cfg, folder).join(BUILD_ERR),
    }
}

fn install_binary(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to).map_err(|e| Error::io(to, e))?;
    }
    Ok(())
}

/// Recursively copy `from` into `to`, skipping top-level entries in `skip`.
fn copy_tree(from: &Path, to: &Path, skip: &[&str]) -> Result<()> {
    fn walk(from: &Path, to: &Path, skip: &[&str], top: bool) -> Result<()> {
        std::fs::create_dir_all(to).map_err(|e| Error::io(to, e))?;
        let entries = std::fs::read_dir(from).map_err(|e| Error::io(from, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(from, e))?;
            let name = entry.file_name();
            if top && skip.iter().any(|s| name == **s) {
                continue;
            }
            let src = entry.path();
            let dst = to.join(&name);
            let ft = entry.file_type().map_err(|e| Error::io(&src, e))?;
            if ft.is_dir() {
                walk(&src, &dst, skip, false)?;
            } else if ft.is_file() {
                std::fs::copy(&src, &dst).map_err(|e| Error::io(&dst, e))?;
            }
        }
        Ok(())
    }
    walk(from, to, skip, true)
}

/// Delete every `*.o` under `root`. Returns how many were removed.
fn remove_objects(root: &Path) -> Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }
    let pattern = format!("{}/**/*.o", glob::Pattern::escape(&root.display().to_string()));
    let entries = glob::glob(&pattern).map_err(|e| Error::Config(e.to_string()))?;
    let mut removed = 0;
    for path in entries.flatten() {
        std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        removed += 1;
    }
    Ok(removed)
}

fn read_text(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn read_macros(path: &Path) -> Result<BTreeSet<String>> {
    Ok(read_text(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, text).map_err(|e| Error::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}
