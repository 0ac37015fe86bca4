//! Cascading deletion across the Trial → Sampling → Monad → Simulation graph.
//!
//! Deletion runs downward to children no surviving parent still lists, then
//! upward to repair parent manifests, deleting parents that end up empty.
//! Children may be shared (two Samplings can list the same Monad), so a child
//! is only removed once every parent listing it is gone.

use super::config::SessionConfig;
use super::error::{Error, Result};
use super::manifest;
use super::materialize;
use super::paths;
use super::store::Store;
use super::types::{Level, Location, ProvenanceEvent, NONE_ID};
use crate::provenance::eventlog;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Graph access the deletion engine needs.
pub trait Hierarchy {
    /// Ids currently existing at `level`.
    fn ids(&self, level: Level) -> Result<Vec<i64>>;

    /// Child ids listed by `id`'s manifest (empty for Simulations).
    fn children(&self, level: Level, id: i64) -> Result<Vec<i64>>;

    /// Rewrite `id`'s manifest.
    fn set_children(&mut self, level: Level, id: i64, children: &[i64]) -> Result<()>;

    /// Remove entities and everything they own on disk.
    fn remove(&mut self, level: Level, ids: &[i64]) -> Result<()>;
}

/// Delete `ids` at `level`.
///
/// With `delete_subs`, children not listed by any surviving parent at this
/// level are deleted first. With `delete_supers`, parents listing any of the
/// ids get their manifests shrunk, and parents left empty are deleted in turn.
pub fn cascade<H: Hierarchy + ?Sized>(
    h: &mut H,
    level: Level,
    ids: &[i64],
    delete_subs: bool,
    delete_supers: bool,
) -> Result<()> {
    let existing = h.ids(level)?;
    let requested: FxHashSet<i64> = ids.iter().copied().collect();
    let targets: BTreeSet<i64> = existing
        .iter()
        .copied()
        .filter(|id| requested.contains(id))
        .collect();
    if targets.is_empty() {
        return Ok(());
    }
    let targets: Vec<i64> = targets.into_iter().collect();
    debug!(%level, ids = ?targets, delete_subs, delete_supers, "cascade");

    if delete_subs {
        if let Some(child) = level.child() {
            let mut orphaned: FxHashSet<i64> = FxHashSet::default();
            for &id in &targets {
                orphaned.extend(h.children(level, id)?);
            }
            let doomed: FxHashSet<i64> = targets.iter().copied().collect();
            for &survivor in existing.iter().filter(|id| !doomed.contains(id)) {
                for c in h.children(level, survivor)? {
                    orphaned.remove(&c);
                }
            }
            if !orphaned.is_empty() {
                let mut orphaned: Vec<i64> = orphaned.into_iter().collect();
                orphaned.sort_unstable();
                cascade(h, child, &orphaned, true, false)?;
            }
        }
    }

    h.remove(level, &targets)?;

    if delete_supers {
        if let Some(parent) = level.parent() {
            let removed: FxHashSet<i64> = targets.iter().copied().collect();
            let mut emptied = Vec::new();
            for pid in h.ids(parent)? {
                let children = h.children(parent, pid)?;
                if !children.iter().any(|c| removed.contains(c)) {
                    continue;
                }
                let kept: Vec<i64> = children
                    .into_iter()
                    .filter(|c| !removed.contains(c))
                    .collect();
                if kept.is_empty() {
                    emptied.push(pid);
                } else {
                    h.set_children(parent, pid, &kept)?;
                }
            }
            if !emptied.is_empty() {
                cascade(h, parent, &emptied, false, true)?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Store-backed hierarchy
// ============================================================================

/// Ids removed per level by one deletion request, in removal order.
pub type DeletionReport = IndexMap<Level, Vec<i64>>;

/// The persistent hierarchy: rows in the store, manifests and outputs on disk.
pub struct StoreHierarchy<'a> {
    cfg: &'a SessionConfig,
    store: &'a Store,
    report: DeletionReport,
}

impl<'a> StoreHierarchy<'a> {
    pub fn new(cfg: &'a SessionConfig, store: &'a Store) -> Self {
        Self {
            cfg,
            store,
            report: DeletionReport::new(),
        }
    }

    pub fn into_report(self) -> DeletionReport {
        self.report
    }

    /// Delete variation artifacts no remaining Simulation uses.
    fn collect_artifacts(&self, used: &BTreeSet<(Location, String, i64)>) -> Result<()> {
        for (location, folder, id) in used {
            if self.store.simulations_using(*location, folder, *id)? == 0
                && materialize::remove_artifact(self.cfg, *location, folder, *id)?
            {
                debug!(%location, folder, id, "removed unused variation artifact");
            }
        }
        Ok(())
    }
}

impl Hierarchy for StoreHierarchy<'_> {
    fn ids(&self, level: Level) -> Result<Vec<i64>> {
        self.store.ids(level)
    }

    fn children(&self, level: Level, id: i64) -> Result<Vec<i64>> {
        match paths::manifest_path(self.cfg, level, id) {
            Some(path) => manifest::load(&path),
            None => Ok(Vec::new()),
        }
    }

    fn set_children(&mut self, level: Level, id: i64, children: &[i64]) -> Result<()> {
        if let Some(path) = paths::manifest_path(self.cfg, level, id) {
            manifest::save(&path, children)?;
        }
        Ok(())
    }

    fn remove(&mut self, level: Level, ids: &[i64]) -> Result<()> {
        let mut used = BTreeSet::new();
        if level == Level::Simulation {
            for &id in ids {
                let sim = self.store.simulation(id)?;
                used.insert((Location::Config, sim.folders.config.clone(), sim.variations.config));
                if let Some(folder) = &sim.folders.rulesets_collection {
                    if sim.variations.rulesets != NONE_ID {
                        used.insert((Location::Rulesets, folder.clone(), sim.variations.rulesets));
                    }
                }
            }
        }

        self.store.delete_rows(level, ids)?;
        for &id in ids {
            let dir = paths::entity_dir(self.cfg, level, id);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(&dir, e)),
            }
        }
        self.collect_artifacts(&used)?;

        eventlog::record(
            &self.cfg.events_path(),
            ProvenanceEvent::EntitiesDeleted {
                level,
                ids: ids.to_vec(),
            },
        );
        self.report.entry(level).or_default().extend_from_slice(ids);
        Ok(())
    }
}

/// Delete entities at any level, repairing or removing their parents.
pub fn delete_entities(
    cfg: &SessionConfig,
    store: &Store,
    level: Level,
    ids: &[i64],
) -> Result<DeletionReport> {
    let mut h = StoreHierarchy::new(cfg, store);
    cascade(&mut h, level, ids, true, true)?;
    let report = h.into_report();
    for (level, removed) in &report {
        info!(%level, count = removed.len(), "deleted");
    }
    Ok(report)
}

pub fn delete_simulations(cfg: &SessionConfig, store: &Store, ids: &[i64]) -> Result<DeletionReport> {
    delete_entities(cfg, store, Level::Simulation, ids)
}

pub fn delete_monads(cfg: &SessionConfig, store: &Store, ids: &[i64]) -> Result<DeletionReport> {
    delete_entities(cfg, store, Level::Monad, ids)
}

pub fn delete_samplings(cfg: &SessionConfig, store: &Store, ids: &[i64]) -> Result<DeletionReport> {
    delete_entities(cfg, store, Level::Sampling, ids)
}

pub fn delete_trials(cfg: &SessionConfig, store: &Store, ids: &[i64]) -> Result<DeletionReport> {
    delete_entities(cfg, store, Level::Trial, ids)
}

/// Delete every entity, the outputs tree, and the database file.
///
/// `confirm` is asked first unless `force` is set. Declining is
/// [`Error::Aborted`] and touches nothing.
pub fn reset_database<F>(cfg: &SessionConfig, store: Store, force: bool, confirm: F) -> Result<()>
where
    F: FnOnce(&str) -> bool,
{
    if !force {
        let prompt = format!(
            "Delete all entities, outputs, and {}?",
            cfg.db_path().display()
        );
        if !confirm(&prompt) {
            return Err(Error::Aborted("reset declined".into()));
        }
    }

    for level in [Level::Trial, Level::Sampling, Level::Monad, Level::Simulation] {
        let ids = store.ids(level)?;
        delete_entities(cfg, &store, level, &ids)?;
    }
    drop(store);

    let outputs = cfg.outputs_dir();
    if outputs.exists() {
        std::fs::remove_dir_all(&outputs).map_err(|e| Error::io(&outputs, e))?;
    }
    let db = cfg.db_path();
    match std::fs::remove_file(&db) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io(&db, e)),
    }
    info!(db = %db.display(), "database reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{InputFolders, VariationIds};
    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashMap};

    // ------------------------------------------------------------------
    // In-memory hierarchy
    // ------------------------------------------------------------------

    #[derive(Default, Debug)]
    struct MemHierarchy {
        levels: HashMap<Level, BTreeMap<i64, Vec<i64>>>,
    }

    impl MemHierarchy {
        fn add(&mut self, level: Level, id: i64, children: &[i64]) {
            self.levels
                .entry(level)
                .or_default()
                .insert(id, children.to_vec());
        }

        fn has(&self, level: Level, id: i64) -> bool {
            self.levels.get(&level).is_some_and(|m| m.contains_key(&id))
        }

        fn assert_closed(&self) {
            for level in [Level::Monad, Level::Sampling, Level::Trial] {
                let child = level.child().unwrap();
                for (id, kids) in self.levels.get(&level).into_iter().flatten() {
                    assert!(!kids.is_empty(), "{} {} is empty", level, id);
                    for k in kids {
                        assert!(self.has(child, *k), "{} {} lists missing {}", level, id, k);
                    }
                }
            }
        }
    }

    impl Hierarchy for MemHierarchy {
        fn ids(&self, level: Level) -> Result<Vec<i64>> {
            Ok(self
                .levels
                .get(&level)
                .map(|m| m.keys().copied().collect())
                .unwrap_or_default())
        }

        fn children(&self, level: Level, id: i64) -> Result<Vec<i64>> {
            Ok(self
                .levels
                .get(&level)
                .and_then(|m| m.get(&id).cloned())
                .unwrap_or_default())
        }

        fn set_children(&mut self, level: Level, id: i64, children: &[i64]) -> Result<()> {
            self.add(level, id, children);
            Ok(())
        }

        fn remove(&mut self, level: Level, ids: &[i64]) -> Result<()> {
            if let Some(m) = self.levels.get_mut(&level) {
                for id in ids {
                    m.remove(id);
                }
            }
            Ok(())
        }
    }

    /// One Trial, one Sampling, three Monads of two Simulations each.
    fn sweep() -> MemHierarchy {
        let mut h = MemHierarchy::default();
        for sim in 1..=6 {
            h.add(Level::Simulation, sim, &[]);
        }
        h.add(Level::Monad, 1, &[1, 2]);
        h.add(Level::Monad, 2, &[3, 4]);
        h.add(Level::Monad, 3, &[5, 6]);
        h.add(Level::Sampling, 1, &[1, 2, 3]);
        h.add(Level::Trial, 1, &[1]);
        h
    }

    #[test]
    fn test_cascade_deleting_all_simulations_empties_everything() {
        let mut h = sweep();
        cascade(&mut h, Level::Simulation, &[1, 2, 3, 4, 5, 6], true, true).unwrap();
        for level in Level::ALL {
            assert!(h.ids(level).unwrap().is_empty(), "{} left", level);
        }
    }

    #[test]
    fn test_cascade_one_monad_worth_of_simulations() {
        let mut h = sweep();
        cascade(&mut h, Level::Simulation, &[3, 4], true, true).unwrap();
        assert!(!h.has(Level::Monad, 2));
        assert_eq!(h.children(Level::Sampling, 1).unwrap(), vec![1, 3]);
        assert!(h.has(Level::Trial, 1));
        h.assert_closed();
    }

    #[test]
    fn test_cascade_non_last_simulation_only_shrinks_manifest() {
        let mut h = sweep();
        cascade(&mut h, Level::Simulation, &[5], true, true).unwrap();
        assert_eq!(h.children(Level::Monad, 3).unwrap(), vec![6]);
        assert_eq!(h.children(Level::Sampling, 1).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_cascade_down_from_trial() {
        let mut h = sweep();
        cascade(&mut h, Level::Trial, &[1], true, true).unwrap();
        for level in Level::ALL {
            assert!(h.ids(level).unwrap().is_empty());
        }
    }

    #[test]
    fn test_cascade_shared_monad_survives() {
        let mut h = sweep();
        h.add(Level::Simulation, 7, &[]);
        h.add(Level::Monad, 4, &[7]);
        h.add(Level::Sampling, 2, &[3, 4]);
        h.add(Level::Trial, 1, &[1, 2]);
        cascade(&mut h, Level::Sampling, &[1], true, true).unwrap();
        assert!(!h.has(Level::Monad, 1));
        assert!(!h.has(Level::Monad, 2));
        assert!(h.has(Level::Monad, 3));
        assert!(h.has(Level::Simulation, 5));
        assert!(!h.has(Level::Simulation, 1));
        assert_eq!(h.children(Level::Trial, 1).unwrap(), vec![2]);
        h.assert_closed();
    }

    #[test]
    fn test_cascade_without_supers_leaves_parents_alone() {
        let mut h = sweep();
        cascade(&mut h, Level::Monad, &[1], true, false).unwrap();
        assert!(!h.has(Level::Simulation, 1));
        assert_eq!(h.children(Level::Sampling, 1).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_cascade_unknown_ids_ignored() {
        let mut h = sweep();
        cascade(&mut h, Level::Monad, &[99], true, true).unwrap();
        assert_eq!(h.ids(Level::Monad).unwrap(), vec![1, 2, 3]);
    }

    /// Random graph: 12 Simulations in 6 Monads, Samplings over random Monad
    /// subsets, Trials over random Sampling subsets.
    fn random_graph(samplings: &[Vec<usize>], trials: &[Vec<usize>]) -> MemHierarchy {
        let mut h = MemHierarchy::default();
        for sim in 1..=12 {
            h.add(Level::Simulation, sim, &[]);
        }
        for m in 1..=6 {
            h.add(Level::Monad, m, &[2 * m - 1, 2 * m]);
        }
        for (i, members) in samplings.iter().enumerate() {
            let mut ids: Vec<i64> = members.iter().map(|m| (*m % 6) as i64 + 1).collect();
            ids.sort_unstable();
            ids.dedup();
            h.add(Level::Sampling, i as i64 + 1, &ids);
        }
        for (i, members) in trials.iter().enumerate() {
            let mut ids: Vec<i64> = members
                .iter()
                .map(|s| (*s % samplings.len()) as i64 + 1)
                .collect();
            ids.sort_unstable();
            ids.dedup();
            h.add(Level::Trial, i as i64 + 1, &ids);
        }
        h
    }

    proptest! {
        #[test]
        fn prop_cascade_preserves_manifest_closure(
            samplings in proptest::collection::vec(proptest::collection::vec(0usize..6, 1..4), 1..4),
            trials in proptest::collection::vec(proptest::collection::vec(0usize..4, 1..3), 1..3),
            level_idx in 0usize..4,
            picks in proptest::collection::vec(1i64..13, 1..4),
        ) {
            let mut h = random_graph(&samplings, &trials);
            let level = Level::ALL[level_idx];
            cascade(&mut h, level, &picks, true, true).unwrap();
            for id in &picks {
                prop_assert!(!h.has(level, *id));
            }
            h.assert_closed();
        }
    }

    // ------------------------------------------------------------------
    // Store-backed hierarchy
    // ------------------------------------------------------------------

    struct Fixture {
        _dir: tempfile::TempDir,
        cfg: SessionConfig,
        store: Store,
        sampling: i64,
        trial: i64,
        monads: Vec<i64>,
        sims: Vec<Vec<i64>>,
    }

    fn folders() -> InputFolders {
        InputFolders {
            config: "default".into(),
            custom_code: "default".into(),
            ..Default::default()
        }
    }

    /// Three design points with two replicates each, plus config artifacts.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SessionConfig::new(dir.path().join("data"), dir.path().join("PhysiCell"));
        let store = Store::open(&cfg.db_path()).unwrap();
        let f = folders();
        let mut monads = Vec::new();
        let mut sims = Vec::new();
        for point in 1..=3 {
            let mut v = VariationIds::base(&f);
            v.config = point;
            let artifact = paths::config_variation_path(&cfg, "default", point);
            std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
            std::fs::write(&artifact, "<PhysiCell_settings/>").unwrap();

            let monad = store.monad_id(&f, &v).unwrap();
            let members: Vec<i64> = (0..2)
                .map(|_| store.insert_simulation(&f, &v, "abc").unwrap().id)
                .collect();
            for id in &members {
                std::fs::create_dir_all(paths::simulation_output_dir(&cfg, *id)).unwrap();
            }
            manifest::save(&paths::manifest_path(&cfg, Level::Monad, monad).unwrap(), &members)
                .unwrap();
            monads.push(monad);
            sims.push(members);
        }
        let sampling = store.insert_sampling(&f, 2).unwrap().id;
        manifest::save(
            &paths::manifest_path(&cfg, Level::Sampling, sampling).unwrap(),
            &monads,
        )
        .unwrap();
        let trial = store.insert_trial("study", "2026-01-01T00:00:00Z").unwrap().id;
        manifest::save(&paths::manifest_path(&cfg, Level::Trial, trial).unwrap(), &[sampling])
            .unwrap();
        Fixture {
            _dir: dir,
            cfg,
            store,
            sampling,
            trial,
            monads,
            sims,
        }
    }

    #[test]
    fn test_cascade_store_all_simulations() {
        let fx = fixture();
        let all: Vec<i64> = fx.sims.iter().flatten().copied().collect();
        let report = delete_simulations(&fx.cfg, &fx.store, &all).unwrap();
        for level in Level::ALL {
            assert_eq!(fx.store.count(level).unwrap(), 0, "{} rows left", level);
            assert!(report.contains_key(&level));
        }
        assert!(!paths::entity_dir(&fx.cfg, Level::Trial, fx.trial).exists());
        assert!(!paths::config_variation_path(&fx.cfg, "default", 1).exists());
        let events = std::fs::read_to_string(fx.cfg.events_path()).unwrap();
        assert!(events.contains("\"event\":\"entities_deleted\""));
    }

    #[test]
    fn test_cascade_store_one_monad_gc_and_repair() {
        let fx = fixture();
        delete_simulations(&fx.cfg, &fx.store, &fx.sims[1]).unwrap();
        assert!(!fx.store.exists(Level::Monad, fx.monads[1]).unwrap());
        let manifest = paths::manifest_path(&fx.cfg, Level::Sampling, fx.sampling).unwrap();
        assert_eq!(
            manifest::load(&manifest).unwrap(),
            vec![fx.monads[0], fx.monads[2]]
        );
        assert!(fx.store.exists(Level::Trial, fx.trial).unwrap());
        assert!(!paths::config_variation_path(&fx.cfg, "default", 2).exists());
        assert!(paths::config_variation_path(&fx.cfg, "default", 1).exists());
        for id in &fx.sims[1] {
            assert!(!paths::entity_dir(&fx.cfg, Level::Simulation, *id).exists());
        }
    }

    #[test]
    fn test_cascade_store_non_last_simulation() {
        let fx = fixture();
        delete_simulations(&fx.cfg, &fx.store, &fx.sims[0][..1]).unwrap();
        let manifest = paths::manifest_path(&fx.cfg, Level::Monad, fx.monads[0]).unwrap();
        assert_eq!(manifest::load(&manifest).unwrap(), vec![fx.sims[0][1]]);
        assert!(fx.store.exists(Level::Monad, fx.monads[0]).unwrap());
        // Still used by the remaining replicate.
        assert!(paths::config_variation_path(&fx.cfg, "default", 1).exists());
    }

    #[test]
    fn test_cascade_store_shared_monad_survives() {
        let fx = fixture();
        let f = folders();
        let other = fx.store.insert_sampling(&f, 2).unwrap().id;
        manifest::save(
            &paths::manifest_path(&fx.cfg, Level::Sampling, other).unwrap(),
            &[fx.monads[2]],
        )
        .unwrap();
        delete_samplings(&fx.cfg, &fx.store, &[fx.sampling]).unwrap();
        assert!(fx.store.exists(Level::Monad, fx.monads[2]).unwrap());
        assert!(!fx.store.exists(Level::Monad, fx.monads[0]).unwrap());
        assert!(fx.store.exists(Level::Sampling, other).unwrap());
        assert!(!fx.store.exists(Level::Trial, fx.trial).unwrap());
        assert_eq!(fx.store.count(Level::Simulation).unwrap(), 2);
    }

    #[test]
    fn test_cascade_store_monad_takes_members_and_repairs_sampling() {
        let fx = fixture();
        let report = delete_monads(&fx.cfg, &fx.store, &[fx.monads[0]]).unwrap();
        assert_eq!(report[&Level::Simulation], fx.sims[0]);
        assert_eq!(report[&Level::Monad], vec![fx.monads[0]]);
        assert!(!report.contains_key(&Level::Sampling));
        let manifest = paths::manifest_path(&fx.cfg, Level::Sampling, fx.sampling).unwrap();
        assert_eq!(
            manifest::load(&manifest).unwrap(),
            vec![fx.monads[1], fx.monads[2]]
        );
        assert_eq!(fx.store.count(Level::Simulation).unwrap(), 4);
    }

    #[test]
    fn test_cascade_store_trial_removes_everything_below() {
        let fx = fixture();
        delete_trials(&fx.cfg, &fx.store, &[fx.trial]).unwrap();
        for level in Level::ALL {
            assert_eq!(fx.store.count(level).unwrap(), 0, "{} rows left", level);
        }
        // Unknown ids are ignored.
        assert!(delete_trials(&fx.cfg, &fx.store, &[fx.trial]).unwrap().is_empty());
    }

    #[test]
    fn test_cascade_store_reset_requires_confirmation() {
        let fx = fixture();
        let Fixture { _dir, cfg, store, .. } = fx;
        assert!(matches!(
            reset_database(&cfg, store, false, |_| false),
            Err(Error::Aborted(_))
        ));
        assert!(cfg.db_path().exists());

        let store = Store::open(&cfg.db_path()).unwrap();
        reset_database(&cfg, store, false, |prompt| prompt.contains("Delete")).unwrap();
        assert!(!cfg.db_path().exists());
        assert!(!cfg.outputs_dir().exists());
        assert!(!paths::config_variation_path(&cfg, "default", 3).exists());
    }
}
