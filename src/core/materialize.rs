//! Variation materializer: one immutable artifact per (folder, variation id).
//!
//! Artifacts are memoized on disk. An existing artifact is never re-rendered
//! and is only removed by the deletion engine once no Simulation uses it.

use super::config::SessionConfig;
use super::design::{Assignment, Variation};
use super::error::{Error, Result};
use super::paths;
use super::store::Store;
use super::types::{InputFolders, Location, VariationIds, BASE_ID, NONE_ID};
use super::xpath;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Render `base` with `assignment` applied into `artifact`.
///
/// Returns `Ok(false)` without touching anything if `artifact` already exists.
pub fn materialize(base: &Path, artifact: &Path, assignment: &Assignment) -> Result<bool> {
    if artifact.exists() {
        return Ok(false);
    }
    let mut doc = xpath::read_document(base)?;
    for (path, value) in assignment {
        xpath::set_field(&mut doc, path, value)?;
    }
    xpath::write_document(&doc, artifact)?;
    debug!(artifact = %artifact.display(), fields = assignment.len(), "materialized variation");
    Ok(true)
}

/// Ensure the configuration artifact for `id` exists and return its path.
pub fn prepare_config(
    cfg: &SessionConfig,
    store: &Store,
    folder: &str,
    id: i64,
) -> Result<PathBuf> {
    if id < BASE_ID {
        return Err(Error::ReservedVariation {
            location: Location::Config.to_string(),
            id,
        });
    }
    let artifact = paths::config_variation_path(cfg, folder, id);
    if artifact.exists() {
        return Ok(artifact);
    }
    let assignment = store.variation_assignment(Location::Config, folder, id)?;
    materialize(&paths::config_base_path(cfg, folder), &artifact, &assignment)?;
    Ok(artifact)
}

/// Ensure the rulesets artifact for `id` exists.
///
/// `NONE_ID` means the simulation uses no rules and nothing is written. Id 0
/// still gets its own artifact so every id is addressed the same way.
pub fn prepare_rulesets(
    cfg: &SessionConfig,
    store: &Store,
    folder: Option<&str>,
    id: i64,
) -> Result<Option<PathBuf>> {
    if id == NONE_ID {
        return Ok(None);
    }
    let folder = match folder {
        Some(f) if id >= BASE_ID => f,
        _ => {
            return Err(Error::ReservedVariation {
                location: Location::Rulesets.to_string(),
                id,
            })
        }
    };
    let artifact = paths::rulesets_variation_path(cfg, folder, id);
    if artifact.exists() {
        return Ok(Some(artifact));
    }
    let assignment = store.variation_assignment(Location::Rulesets, folder, id)?;
    materialize(&paths::rulesets_base_path(cfg, folder), &artifact, &assignment)?;
    Ok(Some(artifact))
}

/// Check that every variation path addresses an element of its base document.
///
/// Run before any row or manifest is written, so a bad path leaves no trace.
pub fn check_addresses(
    cfg: &SessionConfig,
    folders: &InputFolders,
    variations: &[Variation],
) -> Result<()> {
    let needs = |location: Location| variations.iter().any(|v| v.location() == location);
    let config_doc = if needs(Location::Config) {
        Some(xpath::read_document(&paths::config_base_path(cfg, &folders.config))?)
    } else {
        None
    };
    let rulesets_doc = if needs(Location::Rulesets) {
        let folder = folders.rulesets_collection.as_deref().ok_or_else(|| {
            Error::Config("rulesets variations requested without a rulesets collection".into())
        })?;
        Some(xpath::read_document(&paths::rulesets_base_path(cfg, folder))?)
    } else {
        None
    };
    for v in variations {
        let doc = match v.location() {
            Location::Config => config_doc.as_ref(),
            Location::Rulesets => rulesets_doc.as_ref(),
        };
        if let Some(doc) = doc {
            xpath::resolve(doc, v.path(), true)?;
        }
    }
    Ok(())
}

/// Materialize everything a variation tuple needs before its first run.
pub fn prepare_inputs(
    cfg: &SessionConfig,
    store: &Store,
    folders: &InputFolders,
    variations: &VariationIds,
) -> Result<()> {
    variations.validate(folders)?;
    prepare_config(cfg, store, &folders.config, variations.config)?;
    prepare_rulesets(
        cfg,
        store,
        folders.rulesets_collection.as_deref(),
        variations.rulesets,
    )?;
    Ok(())
}

/// Path of a materialized artifact, whether or not it exists yet.
pub fn artifact_path(cfg: &SessionConfig, location: Location, folder: &str, id: i64) -> PathBuf {
    match location {
        Location::Config => paths::config_variation_path(cfg, folder, id),
        Location::Rulesets => paths::rulesets_variation_path(cfg, folder, id),
    }
}

/// Remove a materialized artifact. Missing artifacts are not an error.
pub fn remove_artifact(cfg: &SessionConfig, location: Location, folder: &str, id: i64) -> Result<bool> {
    let path = artifact_path(cfg, location, folder, id);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(&path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::xpath::{get_field, read_document, rule_path, user_parameter_path, RuleField};

    const SETTINGS: &str = r#"<PhysiCell_settings>
  <save><folder>output</folder></save>
  <user_parameters>
    <number_of_cells type="int">5</number_of_cells>
    <tumor_radius type="double">250.0</tumor_radius>
  </user_parameters>
</PhysiCell_settings>"#;

    const RULES: &str = r#"<behavior_rulesets>
  <behavior_ruleset name="tumor">
    <behavior name="cycle entry">
      <decreasing_signals>
        <max_response>0</max_response>
        <signal name="pressure"><half_max>0.5</half_max><hill_power>4</hill_power></signal>
      </decreasing_signals>
    </behavior>
  </behavior_ruleset>
</behavior_rulesets>"#;

    fn setup() -> (tempfile::TempDir, SessionConfig, Store) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SessionConfig::new(dir.path().join("data"), dir.path().join("PhysiCell"));
        let base = paths::config_base_path(&cfg, "default");
        std::fs::create_dir_all(base.parent().unwrap()).unwrap();
        std::fs::write(&base, SETTINGS).unwrap();
        let rules = paths::rulesets_base_path(&cfg, "rules");
        std::fs::create_dir_all(rules.parent().unwrap()).unwrap();
        std::fs::write(&rules, RULES).unwrap();
        (dir, cfg, Store::open_in_memory().unwrap())
    }

    #[test]
    fn test_materialize_applies_assignment() {
        let (_dir, cfg, store) = setup();
        let a = Assignment::from([(user_parameter_path("number_of_cells"), "12".to_string())]);
        let id = store.variation_id(Location::Config, "default", &a).unwrap();
        let path = prepare_config(&cfg, &store, "default", id).unwrap();
        let doc = read_document(&path).unwrap();
        assert_eq!(get_field(&doc, &user_parameter_path("number_of_cells")).unwrap(), "12");
        assert_eq!(get_field(&doc, &user_parameter_path("tumor_radius")).unwrap(), "250.0");
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let (_dir, cfg, store) = setup();
        let a = Assignment::from([(user_parameter_path("tumor_radius"), "100".to_string())]);
        let id = store.variation_id(Location::Config, "default", &a).unwrap();
        let path = prepare_config(&cfg, &store, "default", id).unwrap();
        let before = std::fs::read(&path).unwrap();
        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();

        // A second render, even with a different assignment, must not touch it.
        let other = Assignment::from([(user_parameter_path("tumor_radius"), "1".to_string())]);
        let rendered = materialize(&paths::config_base_path(&cfg, "default"), &path, &other).unwrap();
        assert!(!rendered);
        prepare_config(&cfg, &store, "default", id).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), mtime);
    }

    #[test]
    fn test_materialize_missing_path_is_addressing_error() {
        let (_dir, cfg, _store) = setup();
        let a = Assignment::from([(user_parameter_path("absent"), "1".to_string())]);
        let artifact = paths::config_variation_path(&cfg, "default", 9);
        let err = materialize(&paths::config_base_path(&cfg, "default"), &artifact, &a).unwrap_err();
        assert!(matches!(err, Error::ElementNotFound { .. }));
        assert!(!artifact.exists());
    }

    #[test]
    fn test_materialize_rulesets_sentinels() {
        let (_dir, cfg, store) = setup();
        assert!(prepare_rulesets(&cfg, &store, Some("rules"), NONE_ID)
            .unwrap()
            .is_none());
        let base = prepare_rulesets(&cfg, &store, Some("rules"), BASE_ID)
            .unwrap()
            .unwrap();
        assert!(base.ends_with("rulesets_variation_0.xml"));
        assert!(prepare_rulesets(&cfg, &store, None, 0).is_err());
        assert!(prepare_rulesets(&cfg, &store, Some("rules"), -3).is_err());
    }

    #[test]
    fn test_materialize_rulesets_variation() {
        let (_dir, cfg, store) = setup();
        let target = rule_path("tumor", "cycle entry", false, "pressure", RuleField::HalfMax);
        let a = Assignment::from([(target.clone(), "0.25".to_string())]);
        let id = store.variation_id(Location::Rulesets, "rules", &a).unwrap();
        let path = prepare_rulesets(&cfg, &store, Some("rules"), id).unwrap().unwrap();
        let doc = read_document(&path).unwrap();
        assert_eq!(get_field(&doc, &target).unwrap(), "0.25");
    }

    #[test]
    fn test_materialize_rejects_reserved_config_before_io() {
        let (_dir, cfg, store) = setup();
        assert!(matches!(
            prepare_config(&cfg, &store, "default", NONE_ID),
            Err(Error::ReservedVariation { .. })
        ));
        assert!(!paths::config_dir(&cfg, "default").join("config_variations").exists());
    }

    #[test]
    fn test_materialize_check_addresses() {
        use crate::core::design::ElementaryVariation;
        let (_dir, cfg, _store) = setup();
        let variation = |location, path| {
            Variation::Elementary(ElementaryVariation {
                location,
                path,
                values: vec![serde_yaml_ng::Value::from(1)],
            })
        };
        let mut folders = InputFolders {
            config: "default".into(),
            custom_code: "default".into(),
            ..Default::default()
        };
        let rule = rule_path("tumor", "cycle entry", false, "pressure", RuleField::HillPower);
        let good = vec![
            variation(Location::Config, user_parameter_path("tumor_radius")),
            variation(Location::Rulesets, rule.clone()),
        ];
        assert!(matches!(
            check_addresses(&cfg, &folders, &good),
            Err(Error::Config(_))
        ));
        folders.rulesets_collection = Some("rules".into());
        check_addresses(&cfg, &folders, &good).unwrap();

        let typo = vec![variation(Location::Config, user_parameter_path("typo"))];
        assert!(matches!(
            check_addresses(&cfg, &folders, &typo),
            Err(Error::ElementNotFound { segment, .. }) if segment == "typo"
        ));
        check_addresses(&cfg, &folders, &[]).unwrap();
    }

    #[test]
    fn test_materialize_remove_artifact() {
        let (_dir, cfg, store) = setup();
        prepare_config(&cfg, &store, "default", 0).unwrap();
        assert!(remove_artifact(&cfg, Location::Config, "default", 0).unwrap());
        assert!(!remove_artifact(&cfg, Location::Config, "default", 0).unwrap());
    }
}
