//! Entity hierarchy, variation tuples, run outcomes, and provenance events.

use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel variation id meaning "this input is not used".
pub const NONE_ID: i64 = -1;

/// Variation id of the unmodified base document.
pub const BASE_ID: i64 = 0;

// ============================================================================
// Hierarchy levels
// ============================================================================

/// One level of the Trial → Sampling → Monad → Simulation hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Simulation,
    Monad,
    Sampling,
    Trial,
}

impl Level {
    pub const ALL: [Level; 4] = [Self::Simulation, Self::Monad, Self::Sampling, Self::Trial];

    /// Level whose ids this level's manifest lists.
    pub fn child(self) -> Option<Level> {
        match self {
            Self::Simulation => None,
            Self::Monad => Some(Self::Simulation),
            Self::Sampling => Some(Self::Monad),
            Self::Trial => Some(Self::Sampling),
        }
    }

    /// Level whose manifests list this level's ids.
    pub fn parent(self) -> Option<Level> {
        match self {
            Self::Simulation => Some(Self::Monad),
            Self::Monad => Some(Self::Sampling),
            Self::Sampling => Some(Self::Trial),
            Self::Trial => None,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Simulation => "simulations",
            Self::Monad => "monads",
            Self::Sampling => "samplings",
            Self::Trial => "trials",
        }
    }

    pub fn id_column(self) -> &'static str {
        match self {
            Self::Simulation => "simulation_id",
            Self::Monad => "monad_id",
            Self::Sampling => "sampling_id",
            Self::Trial => "trial_id",
        }
    }

    /// File name of this level's child manifest, if it has children.
    pub fn manifest_name(self) -> Option<&'static str> {
        self.child().map(|c| match c {
            Self::Simulation => "simulations.csv",
            Self::Monad => "monads.csv",
            _ => "samplings.csv",
        })
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::Monad => write!(f, "monad"),
            Self::Sampling => write!(f, "sampling"),
            Self::Trial => write!(f, "trial"),
        }
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Input collections a unit draws from, by folder name under `inputs/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputFolders {
    /// `inputs/configs/<config>`
    pub config: String,

    /// `inputs/custom_codes/<custom_code>`
    pub custom_code: String,

    #[serde(default)]
    pub rulesets_collection: Option<String>,

    #[serde(default)]
    pub ic_cell: Option<String>,

    #[serde(default)]
    pub ic_substrate: Option<String>,

    #[serde(default)]
    pub ic_ecm: Option<String>,

    #[serde(default)]
    pub ic_dc: Option<String>,
}

/// Where a variation's assignments are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Config,
    Rulesets,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Rulesets => write!(f, "rulesets"),
        }
    }
}

/// The variation-id tuple that fully selects a Simulation's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariationIds {
    pub config: i64,
    pub rulesets: i64,
    pub ic_cell: i64,
    pub ic_substrate: i64,
    pub ic_ecm: i64,
    pub ic_dc: i64,
}

impl VariationIds {
    /// Base variation for every input the folders provide, `NONE_ID` otherwise.
    pub fn base(folders: &InputFolders) -> Self {
        let pick = |f: &Option<String>| if f.is_some() { BASE_ID } else { NONE_ID };
        Self {
            config: BASE_ID,
            rulesets: pick(&folders.rulesets_collection),
            ic_cell: pick(&folders.ic_cell),
            ic_substrate: pick(&folders.ic_substrate),
            ic_ecm: pick(&folders.ic_ecm),
            ic_dc: pick(&folders.ic_dc),
        }
    }

    /// Reject reserved or malformed ids before anything touches disk.
    pub fn validate(&self, folders: &InputFolders) -> Result<()> {
        if self.config < BASE_ID {
            return Err(Error::ReservedVariation {
                location: "config".to_string(),
                id: self.config,
            });
        }
        let optional = [
            ("rulesets", self.rulesets, &folders.rulesets_collection),
            ("ic_cell", self.ic_cell, &folders.ic_cell),
            ("ic_substrate", self.ic_substrate, &folders.ic_substrate),
            ("ic_ecm", self.ic_ecm, &folders.ic_ecm),
            ("ic_dc", self.ic_dc, &folders.ic_dc),
        ];
        for (location, id, folder) in optional {
            let bad = id < NONE_ID || (id != NONE_ID && folder.is_none());
            if bad {
                return Err(Error::ReservedVariation {
                    location: location.to_string(),
                    id,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// One concrete execution of the external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    pub id: i64,
    pub folders: InputFolders,
    pub variations: VariationIds,
    /// Revision fingerprint of the program this simulation was created against
    pub program_revision: String,
}

/// Replicate group: Simulations sharing one variation tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monad {
    pub id: i64,
    pub folders: InputFolders,
    pub variations: VariationIds,
    /// Target replicate count for this request
    pub n_replicates: usize,
}

/// A designed set of Monads spanning a variation space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sampling {
    pub id: i64,
    pub folders: InputFolders,
    pub n_replicates: usize,
}

/// A named collection of Samplings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    pub id: i64,
    pub description: String,
    pub created_at: String,
}

/// A top-level unit handed to the run driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Simulation(i64),
    Monad { id: i64, replicates: usize },
    Sampling(i64),
    Trial(i64),
}

impl Unit {
    pub fn level(&self) -> Level {
        match self {
            Self::Simulation(_) => Level::Simulation,
            Self::Monad { .. } => Level::Monad,
            Self::Sampling(_) => Level::Sampling,
            Self::Trial(_) => Level::Trial,
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            Self::Simulation(id) | Self::Sampling(id) | Self::Trial(id) => id,
            Self::Monad { id, .. } => id,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.level(), self.id())
    }
}

// ============================================================================
// Run results
// ============================================================================

/// Result of running one Simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// The external process was invoked (or a build it depends on failed)
    pub ran: bool,
    pub success: bool,
}

impl RunOutcome {
    pub const SKIPPED: RunOutcome = RunOutcome {
        ran: false,
        success: true,
    };
}

/// Aggregate counts for one driver invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Simulations the unit represents at full size
    pub expected: usize,
    pub scheduled: usize,
    pub ran: usize,
    pub succeeded: usize,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    RunStarted {
        run_id: String,
        unit: String,
        scheduled: usize,
    },
    SimulationFinished {
        run_id: String,
        simulation_id: i64,
        ran: bool,
        success: bool,
    },
    BuildFinished {
        custom_code: String,
        success: bool,
        duration_seconds: f64,
    },
    EntitiesDeleted {
        level: Level,
        ids: Vec<i64>,
    },
    RunCompleted {
        run_id: String,
        scheduled: usize,
        ran: usize,
        succeeded: usize,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}
