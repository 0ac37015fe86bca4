//! On-disk layout under the data directory.
//!
//! ```text
//! data/
//!   simsweep.db
//!   inputs/configs/<folder>/PhysiCell_settings.xml
//!   inputs/configs/<folder>/config_variations/config_variation_<id>.xml
//!   inputs/rulesets_collections/<folder>/base_rulesets.xml
//!   inputs/custom_codes/<folder>/{main.cpp, custom_modules/, project, macros.txt, ...}
//!   inputs/ics/<kind>/<folder>/<kind>.csv
//!   outputs/simulations/<id>/output/
//!   outputs/monads/<id>/simulations.csv
//! ```

use super::config::SessionConfig;
use super::types::{Level, BASE_ID};
use std::path::PathBuf;

/// Directory owned by one entity.
pub fn entity_dir(cfg: &SessionConfig, level: Level, id: i64) -> PathBuf {
    cfg.outputs_dir().join(level.table()).join(id.to_string())
}

/// Child manifest of a parent entity; `None` for Simulations.
pub fn manifest_path(cfg: &SessionConfig, level: Level, id: i64) -> Option<PathBuf> {
    level
        .manifest_name()
        .map(|name| entity_dir(cfg, level, id).join(name))
}

/// Directory the external program writes into.
pub fn simulation_output_dir(cfg: &SessionConfig, id: i64) -> PathBuf {
    entity_dir(cfg, Level::Simulation, id).join("output")
}

pub fn config_dir(cfg: &SessionConfig, folder: &str) -> PathBuf {
    cfg.inputs_dir().join("configs").join(folder)
}

pub fn config_base_path(cfg: &SessionConfig, folder: &str) -> PathBuf {
    config_dir(cfg, folder).join("PhysiCell_settings.xml")
}

pub fn config_variation_path(cfg: &SessionConfig, folder: &str, id: i64) -> PathBuf {
    config_dir(cfg, folder)
        .join("config_variations")
        .join(format!("config_variation_{}.xml", id))
}

pub fn rulesets_dir(cfg: &SessionConfig, folder: &str) -> PathBuf {
    cfg.inputs_dir().join("rulesets_collections").join(folder)
}

pub fn rulesets_base_path(cfg: &SessionConfig, folder: &str) -> PathBuf {
    rulesets_dir(cfg, folder).join("base_rulesets.xml")
}

pub fn rulesets_variation_path(cfg: &SessionConfig, folder: &str, id: i64) -> PathBuf {
    rulesets_dir(cfg, folder)
        .join("rulesets_collections_variations")
        .join(format!("rulesets_variation_{}.xml", id))
}

pub fn custom_code_dir(cfg: &SessionConfig, folder: &str) -> PathBuf {
    cfg.inputs_dir().join("custom_codes").join(folder)
}

/// Initial-condition input families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcKind {
    Cells,
    Substrates,
    Ecms,
    Dcs,
}

impl IcKind {
    fn name(self) -> &'static str {
        match self {
            Self::Cells => "cells",
            Self::Substrates => "substrates",
            Self::Ecms => "ecms",
            Self::Dcs => "dcs",
        }
    }
}

/// Initial-condition CSV for variation `id` (0 = the folder's base file).
pub fn ic_path(cfg: &SessionConfig, kind: IcKind, folder: &str, id: i64) -> PathBuf {
    let dir = cfg.inputs_dir().join("ics").join(kind.name()).join(folder);
    if id == BASE_ID {
        dir.join(format!("{}.csv", kind.name()))
    } else {
        dir.join(format!("ic_{}_variations", kind.name()))
            .join(format!("ic_{}_variation_{}.csv", kind.name(), id))
    }
}
