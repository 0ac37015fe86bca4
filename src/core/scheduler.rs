//! Execution scheduler: expand units into Simulation tasks and run them.
//!
//! Expansion is top-down and single-threaded: it materializes variation
//! artifacts, settles builds, inserts new Simulation rows, and appends to
//! manifests. Only then are tasks handed to a bounded worker pool, whose
//! workers touch nothing but the external process and their own output
//! directory.
//!
//! ```text
//! Trial ─▶ Sampling(s) ─▶ Monad(s) ─▶ Simulation tasks ─▶ rayon pool
//!                                      (build + materialize once)
//! ```

use super::config::SessionConfig;
use super::design::{self, DesignMethod, Variation};
use super::error::{Error, Result};
use super::manifest;
use super::materialize;
use super::paths::{self, IcKind};
use super::prune;
use super::store::Store;
use super::types::*;
use crate::build::{cache, BuildCache, ProgramRevision};
use crate::provenance::eventlog;
use crate::transport::{self, Invocation};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Completion marker the program writes into its output directory.
pub const COMPLETION_MARKER: &str = "final.xml";

/// One Simulation ready to hand to a worker.
#[derive(Debug, Clone)]
pub struct Task {
    pub simulation: Simulation,
    /// The program for this Simulation's custom code is available
    pub build_ok: bool,
}

/// Tasks from expanding a unit, plus the size of the unit at full strength.
#[derive(Debug, Default)]
pub struct Expansion {
    pub tasks: Vec<Task>,
    pub expected: usize,
}

impl Expansion {
    fn extend(&mut self, other: Expansion) {
        self.tasks.extend(other.tasks);
        self.expected += other.expected;
    }
}

/// Orchestrates expansion and execution for one session.
pub struct Scheduler<'a> {
    cfg: &'a SessionConfig,
    store: &'a Store,
    builds: BuildCache,
    /// Simulations already handed out by the current run
    scheduled: FxHashSet<i64>,
}

impl<'a> Scheduler<'a> {
    pub fn new(cfg: &'a SessionConfig, store: &'a Store, revision: ProgramRevision) -> Self {
        Self {
            cfg,
            store,
            builds: BuildCache::new(revision),
            scheduled: FxHashSet::default(),
        }
    }

    /// Settle the build for `folders`; a failure is folded into the result.
    fn ensure_build(&mut self, folders: &InputFolders) -> bool {
        let macros = cache::required_macros(self.cfg, folders);
        match self.builds.ensure_current(self.cfg, &folders.custom_code, &macros) {
            Ok(_) => true,
            Err(e) => {
                warn!(custom_code = %folders.custom_code, error = %e, "program unavailable");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Expansion
    // ------------------------------------------------------------------

    pub fn expand(&mut self, unit: Unit, reuse: bool) -> Result<Expansion> {
        match unit {
            Unit::Simulation(id) => self.expand_simulation(id),
            Unit::Monad { id, replicates } => {
                let monad = self.store.monad(id, replicates)?;
                self.expand_monad(&monad, reuse)
            }
            Unit::Sampling(id) => self.expand_sampling(id, reuse),
            Unit::Trial(id) => self.expand_trial(id, reuse),
        }
    }

    pub fn expand_simulation(&mut self, id: i64) -> Result<Expansion> {
        let simulation = self.store.simulation(id)?;
        materialize::prepare_inputs(self.cfg, self.store, &simulation.folders, &simulation.variations)?;
        let build_ok = self.ensure_build(&simulation.folders);
        self.scheduled.insert(id);
        Ok(Expansion {
            tasks: vec![Task {
                simulation,
                build_ok,
            }],
            expected: 1,
        })
    }

    /// Create the replicates a Monad still needs.
    ///
    /// With `reuse`, existing members count toward the target and only the
    /// ones without a completion marker are scheduled again. A Monad reached
    /// twice in one run (shared between Samplings) schedules each member once.
    pub fn expand_monad(&mut self, monad: &Monad, reuse: bool) -> Result<Expansion> {
        let manifest_path = paths::manifest_path(self.cfg, Level::Monad, monad.id)
            .ok_or_else(|| Error::Config("monad without manifest".into()))?;
        let existing = manifest::load(&manifest_path)?;
        let build_ok = self.ensure_build(&monad.folders);
        materialize::prepare_inputs(self.cfg, self.store, &monad.folders, &monad.variations)?;

        let mut tasks = Vec::new();
        let n_new = if reuse {
            for &id in &existing {
                if !is_complete(self.cfg, id) && self.scheduled.insert(id) {
                    tasks.push(Task {
                        simulation: self.store.simulation(id)?,
                        build_ok,
                    });
                }
            }
            monad.n_replicates.saturating_sub(existing.len())
        } else {
            monad.n_replicates
        };

        let revision = self.builds.revision().to_string();
        let mut created = Vec::with_capacity(n_new);
        for _ in 0..n_new {
            let simulation = self
                .store
                .insert_simulation(&monad.folders, &monad.variations, &revision)?;
            created.push(simulation.id);
            self.scheduled.insert(simulation.id);
            tasks.push(Task {
                simulation,
                build_ok,
            });
        }
        if !created.is_empty() {
            manifest::append(&manifest_path, &created)?;
        }
        debug!(monad = monad.id, new = n_new, scheduled = tasks.len(), "expanded monad");
        Ok(Expansion {
            tasks,
            expected: monad.n_replicates,
        })
    }

    pub fn expand_sampling(&mut self, id: i64, reuse: bool) -> Result<Expansion> {
        let sampling = self.store.sampling(id)?;
        let manifest_path = paths::manifest_path(self.cfg, Level::Sampling, id)
            .ok_or_else(|| Error::Config("sampling without manifest".into()))?;
        let monads = manifest::load(&manifest_path)?;
        self.ensure_build(&sampling.folders);

        let mut expansion = Expansion::default();
        for &monad_id in &monads {
            let monad = self.store.monad(monad_id, sampling.n_replicates)?;
            expansion.extend(self.expand_monad(&monad, reuse)?);
        }
        manifest::save(&manifest_path, &monads)?;
        Ok(expansion)
    }

    pub fn expand_trial(&mut self, id: i64, reuse: bool) -> Result<Expansion> {
        self.store.trial(id)?;
        let manifest_path = paths::manifest_path(self.cfg, Level::Trial, id)
            .ok_or_else(|| Error::Config("trial without manifest".into()))?;
        let samplings = manifest::load(&manifest_path)?;
        let mut expansion = Expansion::default();
        for &sampling_id in &samplings {
            expansion.extend(self.expand_sampling(sampling_id, reuse)?);
        }
        manifest::save(&manifest_path, &samplings)?;
        Ok(expansion)
    }

    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    /// Expand `unit`, run its tasks in parallel, and record provenance.
    pub fn run(&mut self, unit: Unit, reuse: bool) -> Result<RunSummary> {
        let start = Instant::now();
        self.scheduled.clear();
        if let Err(e) = self.builds.clear_stale_objects(self.cfg) {
            warn!(error = %e, "could not clear stale object files");
        }

        let expansion = self.expand(unit, reuse)?;
        let run_id = eventlog::generate_run_id();
        let events = self.cfg.events_path();
        eventlog::record(
            &events,
            ProvenanceEvent::RunStarted {
                run_id: run_id.clone(),
                unit: unit.to_string(),
                scheduled: expansion.tasks.len(),
            },
        );
        info!(%unit, scheduled = expansion.tasks.len(), parallel = self.cfg.max_parallel, "running");

        let (outcomes, ran, succeeded) = execute(self.cfg, &expansion.tasks)?;
        for (task, outcome) in expansion.tasks.iter().zip(&outcomes) {
            eventlog::record(
                &events,
                ProvenanceEvent::SimulationFinished {
                    run_id: run_id.clone(),
                    simulation_id: task.simulation.id,
                    ran: outcome.ran,
                    success: outcome.success,
                },
            );
        }

        let summary = RunSummary {
            expected: expansion.expected,
            scheduled: expansion.tasks.len(),
            ran,
            succeeded,
            total_duration: start.elapsed(),
        };
        eventlog::record(
            &events,
            ProvenanceEvent::RunCompleted {
                run_id,
                scheduled: summary.scheduled,
                ran: summary.ran,
                succeeded: summary.succeeded,
                total_seconds: summary.total_duration.as_secs_f64(),
            },
        );
        print_summary(unit, &summary);
        Ok(summary)
    }
}

/// Run tasks on a pool of `max_parallel` threads.
///
/// Returns one outcome per task (in task order) with the ran and succeeded
/// counts.
pub fn execute(cfg: &SessionConfig, tasks: &[Task]) -> Result<(Vec<RunOutcome>, usize, usize)> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.max_parallel.max(1))
        .build()
        .map_err(|e| Error::Config(format!("cannot start worker pool: {}", e)))?;
    let ran = AtomicUsize::new(0);
    let succeeded = AtomicUsize::new(0);
    let outcomes: Vec<RunOutcome> = pool.install(|| {
        tasks
            .par_iter()
            .map(|task| {
                let outcome = run_simulation(cfg, task);
                if outcome.ran {
                    ran.fetch_add(1, Ordering::Relaxed);
                    if outcome.success {
                        succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                }
                outcome
            })
            .collect()
    });
    Ok((outcomes, ran.into_inner(), succeeded.into_inner()))
}

fn is_complete(cfg: &SessionConfig, simulation_id: i64) -> bool {
    paths::simulation_output_dir(cfg, simulation_id)
        .join(COMPLETION_MARKER)
        .exists()
}

/// Command line for one Simulation.
pub fn invocation(cfg: &SessionConfig, sim: &Simulation) -> Invocation {
    let entity = paths::entity_dir(cfg, Level::Simulation, sim.id);
    let out_dir = paths::simulation_output_dir(cfg, sim.id);
    let mut inv = Invocation::new(
        cache::binary_path(cfg, &sim.folders.custom_code),
        entity.join("output.log"),
        entity.join("output.err"),
    )
    .arg_path(&paths::config_variation_path(
        cfg,
        &sim.folders.config,
        sim.variations.config,
    ))
    .arg("-o")
    .arg_path(&out_dir);

    let ics = [
        ("-i", IcKind::Cells, &sim.folders.ic_cell, sim.variations.ic_cell),
        ("-s", IcKind::Substrates, &sim.folders.ic_substrate, sim.variations.ic_substrate),
        ("-e", IcKind::Ecms, &sim.folders.ic_ecm, sim.variations.ic_ecm),
        ("-d", IcKind::Dcs, &sim.folders.ic_dc, sim.variations.ic_dc),
    ];
    for (flag, kind, folder, id) in ics {
        if id == NONE_ID {
            continue;
        }
        if let Some(folder) = folder {
            inv = inv.arg(flag).arg_path(&paths::ic_path(cfg, kind, folder, id));
        }
    }
    let rulesets = sim.variations.rulesets;
    if let Some(folder) = sim.folders.rulesets_collection.as_deref() {
        if rulesets != NONE_ID {
            inv = inv
                .arg("-r")
                .arg_path(&paths::rulesets_variation_path(cfg, folder, rulesets));
        }
    }
    inv
}

/// Run one Simulation. Never fails: every problem becomes an outcome.
pub fn run_simulation(cfg: &SessionConfig, task: &Task) -> RunOutcome {
    let sim = &task.simulation;
    if is_complete(cfg, sim.id) {
        debug!(simulation = sim.id, "already complete");
        return RunOutcome::SKIPPED;
    }
    let failed = RunOutcome {
        ran: true,
        success: false,
    };
    if !task.build_ok {
        return failed;
    }

    let out_dir = paths::simulation_output_dir(cfg, sim.id);
    if let Err(e) = std::fs::create_dir_all(&out_dir) {
        warn!(simulation = sim.id, error = %e, "cannot create output directory");
        return failed;
    }

    let inv = invocation(cfg, sim);
    match transport::exec(&inv) {
        Ok(out) if out.success() => {
            remove_if_empty(&inv.stderr);
            if let Err(e) = prune::prune_output(&out_dir, &cfg.prune) {
                warn!(simulation = sim.id, error = %e, "pruning failed");
            }
            debug!(simulation = sim.id, seconds = out.duration.as_secs_f64(), "simulation finished");
            RunOutcome {
                ran: true,
                success: true,
            }
        }
        Ok(out) => {
            warn!(simulation = sim.id, exit_code = out.exit_code, log = %inv.stderr.display(), "simulation failed");
            failed
        }
        Err(e) => {
            warn!(simulation = sim.id, error = %e, "simulation could not start");
            failed
        }
    }
}

fn remove_if_empty(path: &std::path::Path) {
    if std::fs::metadata(path).is_ok_and(|m| m.len() == 0) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "cannot remove empty stderr log");
        }
    }
}

/// Print the run summary, naming each kind of shortfall.
pub fn print_summary(unit: Unit, summary: &RunSummary) {
    println!(
        "{}: {} expected, {} scheduled, {} ran, {} succeeded ({:.1}s)",
        unit,
        summary.expected,
        summary.scheduled,
        summary.ran,
        summary.succeeded,
        summary.total_duration.as_secs_f64()
    );
    if summary.expected > summary.scheduled {
        println!(
            "  {} simulation(s) reused from earlier runs",
            summary.expected - summary.scheduled
        );
    }
    if summary.scheduled > summary.ran {
        println!(
            "  WARNING: {} scheduled simulation(s) did not run; their output already held {} (check for concurrent sessions)",
            summary.scheduled - summary.ran,
            COMPLETION_MARKER
        );
    }
    if summary.ran > summary.succeeded {
        println!(
            "  {} simulation(s) failed; see output.err in their directories",
            summary.ran - summary.succeeded
        );
    }
}

// ============================================================================
// Creation
// ============================================================================

/// Create a Sampling with one Monad per design point.
///
/// Monads are shared: a design point another Sampling already requested maps
/// to the same Monad.
pub fn create_sampling(
    cfg: &SessionConfig,
    store: &Store,
    folders: &InputFolders,
    n_replicates: usize,
    method: &DesignMethod,
    variations: &[Variation],
) -> Result<Sampling> {
    let points = design::generate(method, variations)?;
    materialize::check_addresses(cfg, folders, variations)?;
    let mut monads = Vec::with_capacity(points.len());
    for point in &points {
        let ids = design::resolve_point(store, folders, point)?;
        monads.push(store.monad_id(folders, &ids)?);
    }
    let sampling = store.insert_sampling(folders, n_replicates)?;
    let path = paths::manifest_path(cfg, Level::Sampling, sampling.id)
        .ok_or_else(|| Error::Config("sampling without manifest".into()))?;
    manifest::save(&path, &monads)?;
    info!(sampling = sampling.id, monads = monads.len(), n_replicates, "created sampling");
    Ok(sampling)
}

/// Create a Trial over existing Samplings.
pub fn create_trial(
    cfg: &SessionConfig,
    store: &Store,
    description: &str,
    samplings: &[i64],
) -> Result<Trial> {
    if samplings.is_empty() {
        return Err(Error::Config("a trial needs at least one sampling".into()));
    }
    for &id in samplings {
        store.sampling(id)?;
    }
    let trial = store.insert_trial(description, &eventlog::now_iso8601())?;
    let path = paths::manifest_path(cfg, Level::Trial, trial.id)
        .ok_or_else(|| Error::Config("trial without manifest".into()))?;
    manifest::save(&path, samplings)?;
    info!(trial = trial.id, samplings = samplings.len(), "created trial");
    Ok(trial)
}
