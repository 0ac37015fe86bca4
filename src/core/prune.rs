//! Post-run deletion of bulky output categories.
//!
//! Snapshot files named `initial*` and `final*` survive unless their flag is
//! set. The `final.xml` completion marker is never removed.

use super::config::PruneOptions;
use super::error::{Error, Result};
use std::path::Path;
use tracing::debug;

const MARKER: &str = "final.xml";

/// Delete the categories selected in `options` from `output_dir`.
/// Returns the number of files removed.
pub fn prune_output(output_dir: &Path, options: &PruneOptions) -> Result<usize> {
    if !options.any() || !output_dir.is_dir() {
        return Ok(0);
    }
    let dir = glob::Pattern::escape(&output_dir.display().to_string());
    let mut removed = 0;
    for (enabled, ext) in [(options.svg, "svg"), (options.txt, "txt"), (options.mat, "mat")] {
        if !enabled {
            continue;
        }
        let pattern = format!("{}/*.{}", dir, ext);
        let paths = glob::glob(&pattern).map_err(|e| Error::Config(e.to_string()))?;
        for path in paths.flatten() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if name == MARKER
                || (name.starts_with("initial") && !options.initial)
                || (name.starts_with("final") && !options.final_)
            {
                continue;
            }
            std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
            removed += 1;
        }
    }
    debug!(dir = %output_dir.display(), removed, "pruned output");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILES: &[&str] = &[
        "final.xml",
        "output00000001.xml",
        "snapshot00000001.svg",
        "initial.svg",
        "final.svg",
        "output00000001_cells.mat",
        "initial_cells.mat",
        "final_cells.mat",
        "output00000001_microenvironment0.mat",
        "cells.txt",
    ];

    fn populated() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in FILES {
            std::fs::write(dir.path().join(f), "").unwrap();
        }
        dir
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_prune_nothing_selected() {
        let dir = populated();
        assert_eq!(prune_output(dir.path(), &PruneOptions::default()).unwrap(), 0);
        assert_eq!(remaining(dir.path()).len(), FILES.len());
    }

    #[test]
    fn test_prune_keeps_initial_and_final_by_default() {
        let dir = populated();
        let options = PruneOptions {
            svg: true,
            mat: true,
            ..Default::default()
        };
        assert_eq!(prune_output(dir.path(), &options).unwrap(), 3);
        let left = remaining(dir.path());
        assert!(left.contains(&"initial.svg".to_string()));
        assert!(left.contains(&"final_cells.mat".to_string()));
        assert!(!left.contains(&"snapshot00000001.svg".to_string()));
        assert!(left.contains(&"cells.txt".to_string()));
    }

    #[test]
    fn test_prune_everything_but_marker() {
        let dir = populated();
        let options = PruneOptions {
            svg: true,
            txt: true,
            mat: true,
            initial: true,
            final_: true,
        };
        prune_output(dir.path(), &options).unwrap();
        assert_eq!(remaining(dir.path()), vec!["final.xml", "output00000001.xml"]);
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let options = PruneOptions {
            svg: true,
            ..Default::default()
        };
        assert_eq!(prune_output(&dir.path().join("absent"), &options).unwrap(), 0);
    }
}
