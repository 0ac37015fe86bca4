//! CLI subcommands: init, validate, sample, run, trial, delete, status, reset.

use crate::build::ProgramRevision;
use crate::core::config::{self, SessionConfig};
use crate::core::types::{Level, Unit};
use crate::core::{cascade, design, manifest, scheduler, store::Store};
use clap::{Subcommand, ValueEnum};
use indexmap::IndexMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new simsweep project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate simsweep.yaml
    Validate {
        /// Path to simsweep.yaml
        #[arg(short, long, default_value = "simsweep.yaml")]
        file: PathBuf,
    },

    /// Create a Sampling from a design file and run it
    Sample {
        #[arg(short, long, default_value = "simsweep.yaml")]
        file: PathBuf,

        /// Design file (folders, replicates, method, variations)
        #[arg(short, long)]
        design: PathBuf,

        /// Only create the Sampling
        #[arg(long)]
        no_run: bool,
    },

    /// Run (or resume) an existing unit
    Run {
        #[arg(short, long, default_value = "simsweep.yaml")]
        file: PathBuf,

        /// Level of the unit
        #[arg(value_enum)]
        level: LevelArg,

        id: i64,

        /// Replicate target (monads only)
        #[arg(long, default_value_t = 1)]
        replicates: usize,

        /// Count existing replicates toward the target
        #[arg(long)]
        reuse: bool,
    },

    /// Group existing Samplings into a Trial
    Trial {
        #[arg(short, long, default_value = "simsweep.yaml")]
        file: PathBuf,

        /// Sampling ids, e.g. `1,3:5`
        #[arg(long)]
        samplings: String,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// Delete entities, repairing or removing their parents
    Delete {
        #[arg(short, long, default_value = "simsweep.yaml")]
        file: PathBuf,

        #[arg(value_enum)]
        level: LevelArg,

        /// Ids, e.g. `4` or `1,3:5`
        ids: String,
    },

    /// Show entity counts
    Status {
        #[arg(short, long, default_value = "simsweep.yaml")]
        file: PathBuf,
    },

    /// Delete every entity and the database
    Reset {
        #[arg(short, long, default_value = "simsweep.yaml")]
        file: PathBuf,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

/// Hierarchy level as written on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelArg {
    Simulation,
    Monad,
    Sampling,
    Trial,
}

impl From<LevelArg> for Level {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::Simulation => Level::Simulation,
            LevelArg::Monad => Level::Monad,
            LevelArg::Sampling => Level::Sampling,
            LevelArg::Trial => Level::Trial,
        }
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Sample {
            file,
            design,
            no_run,
        } => cmd_sample(&file, &design, no_run),
        Commands::Run {
            file,
            level,
            id,
            replicates,
            reuse,
        } => cmd_run(&file, level.into(), id, replicates, reuse),
        Commands::Trial {
            file,
            samplings,
            description,
        } => cmd_trial(&file, &samplings, &description),
        Commands::Delete { file, level, ids } => cmd_delete(&file, level.into(), &ids),
        Commands::Status { file } => cmd_status(&file),
        Commands::Reset { file, force } => cmd_reset(&file, force),
    }
}

fn open_session(file: &Path) -> Result<(SessionConfig, Store), String> {
    let cfg = config::load_session_config(file)?;
    let store = Store::open(&cfg.db_path())?;
    Ok((cfg, store))
}

/// Parse an id list in manifest notation (`1,3:5`).
fn parse_ids(text: &str) -> Result<Vec<i64>, String> {
    let ids = manifest::decode(text, Path::new("<command line>"))?;
    if ids.is_empty() {
        return Err("no ids given".to_string());
    }
    Ok(ids)
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("simsweep.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let cfg = SessionConfig::new(path.join("data"), path.join("PhysiCell"));
    for dir in [
        cfg.inputs_dir().join("configs"),
        cfg.inputs_dir().join("custom_codes"),
        cfg.inputs_dir().join("rulesets_collections"),
        cfg.inputs_dir().join("ics"),
        cfg.outputs_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
    }

    let template = r#"version: "1.0"
data_dir: data
program_dir: PhysiCell
max_parallel: 1

build:
  command: ["make", "-j", "8"]
  compiler: g++
  macros: []
  clean_on_macro_change: true
  force: false

prune:
  svg: false
  txt: false
  mat: false
  initial: false
  final: false
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized simsweep project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", cfg.data_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let cfg = config::parse_config_file(file)?;
    let errors = config::validate_config(&cfg);

    if errors.is_empty() {
        println!(
            "OK: data in {} (program {}, {} parallel)",
            cfg.data_dir.display(),
            cfg.program_dir.display(),
            cfg.max_parallel
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

fn cmd_sample(file: &Path, design_path: &Path, no_run: bool) -> Result<(), String> {
    let (cfg, store) = open_session(file)?;
    let request = design::parse_design_file(design_path)?;
    let sampling = scheduler::create_sampling(
        &cfg,
        &store,
        &request.folders,
        request.replicates,
        &request.design,
        &request.variations,
    )?;
    println!("Created sampling {}", sampling.id);
    if no_run {
        return Ok(());
    }
    run_unit(&cfg, &store, Unit::Sampling(sampling.id), false)
}

fn cmd_run(file: &Path, level: Level, id: i64, replicates: usize, reuse: bool) -> Result<(), String> {
    let (cfg, store) = open_session(file)?;
    let unit = match level {
        Level::Simulation => Unit::Simulation(id),
        Level::Monad => Unit::Monad { id, replicates },
        Level::Sampling => Unit::Sampling(id),
        Level::Trial => Unit::Trial(id),
    };
    run_unit(&cfg, &store, unit, reuse)
}

fn run_unit(cfg: &SessionConfig, store: &Store, unit: Unit, reuse: bool) -> Result<(), String> {
    let revision = ProgramRevision::detect(&cfg.program_dir);
    let mut sched = scheduler::Scheduler::new(cfg, store, revision);
    let summary = sched.run(unit, reuse)?;
    if summary.ran > summary.succeeded {
        return Err(format!(
            "{} of {} simulation(s) failed",
            summary.ran - summary.succeeded,
            summary.ran
        ));
    }
    Ok(())
}

fn cmd_trial(file: &Path, samplings: &str, description: &str) -> Result<(), String> {
    let (cfg, store) = open_session(file)?;
    let ids = parse_ids(samplings)?;
    let trial = scheduler::create_trial(&cfg, &store, description, &ids)?;
    println!(
        "Created trial {} over {} sampling(s)",
        trial.id,
        ids.len()
    );
    Ok(())
}

fn cmd_delete(file: &Path, level: Level, ids: &str) -> Result<(), String> {
    let (cfg, store) = open_session(file)?;
    let ids = parse_ids(ids)?;
    let report = cascade::delete_entities(&cfg, &store, level, &ids)?;
    if report.is_empty() {
        println!("Nothing to delete.");
    }
    for (level, removed) in &report {
        println!("Deleted {} {}(s): {}", removed.len(), level, manifest::encode(removed));
    }
    Ok(())
}

fn cmd_status(file: &Path) -> Result<(), String> {
    let (cfg, store) = open_session(file)?;
    let mut counts: IndexMap<Level, i64> = IndexMap::new();
    for level in [Level::Trial, Level::Sampling, Level::Monad, Level::Simulation] {
        counts.insert(level, store.count(level)?);
    }
    println!("Database: {}", cfg.db_path().display());
    for (level, n) in &counts {
        println!("  {}s: {}", level, n);
    }
    if counts.values().all(|n| *n == 0) {
        println!("No entities yet. Run `simsweep sample` first.");
    }
    Ok(())
}

fn cmd_reset(file: &Path, force: bool) -> Result<(), String> {
    let (cfg, store) = open_session(file)?;
    cascade::reset_database(&cfg, store, force, |prompt| {
        print!("{} [y/N] ", prompt);
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    })?;
    println!("Reset {}", cfg.data_dir.display());
    Ok(())
}
