//! Relational entity store (SQLite).
//!
//! One table per hierarchy level plus a `variations` side table mapping
//! (location, folder, id) to a concrete assignment. Child membership lives in
//! manifest files, not in the database. All mutations run on the orchestrating
//! thread.

use super::design::Assignment;
use super::error::{Error, Result};
use super::types::*;
use super::xpath::XmlPath;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS simulations (
    simulation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    program_revision TEXT NOT NULL,
    config_folder TEXT NOT NULL,
    custom_code_folder TEXT NOT NULL,
    rulesets_collection_folder TEXT NOT NULL DEFAULT '',
    ic_cell_folder TEXT NOT NULL DEFAULT '',
    ic_substrate_folder TEXT NOT NULL DEFAULT '',
    ic_ecm_folder TEXT NOT NULL DEFAULT '',
    ic_dc_folder TEXT NOT NULL DEFAULT '',
    config_variation_id INTEGER NOT NULL,
    rulesets_variation_id INTEGER NOT NULL,
    ic_cell_variation_id INTEGER NOT NULL,
    ic_substrate_variation_id INTEGER NOT NULL,
    ic_ecm_variation_id INTEGER NOT NULL,
    ic_dc_variation_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS monads (
    monad_id INTEGER PRIMARY KEY AUTOINCREMENT,
    config_folder TEXT NOT NULL,
    custom_code_folder TEXT NOT NULL,
    rulesets_collection_folder TEXT NOT NULL DEFAULT '',
    ic_cell_folder TEXT NOT NULL DEFAULT '',
    ic_substrate_folder TEXT NOT NULL DEFAULT '',
    ic_ecm_folder TEXT NOT NULL DEFAULT '',
    ic_dc_folder TEXT NOT NULL DEFAULT '',
    config_variation_id INTEGER NOT NULL,
    rulesets_variation_id INTEGER NOT NULL,
    ic_cell_variation_id INTEGER NOT NULL,
    ic_substrate_variation_id INTEGER NOT NULL,
    ic_ecm_variation_id INTEGER NOT NULL,
    ic_dc_variation_id INTEGER NOT NULL,
    UNIQUE (config_folder, custom_code_folder, rulesets_collection_folder,
            ic_cell_folder, ic_substrate_folder, ic_ecm_folder, ic_dc_folder,
            config_variation_id, rulesets_variation_id, ic_cell_variation_id,
            ic_substrate_variation_id, ic_ecm_variation_id, ic_dc_variation_id)
);
CREATE TABLE IF NOT EXISTS samplings (
    sampling_id INTEGER PRIMARY KEY AUTOINCREMENT,
    config_folder TEXT NOT NULL,
    custom_code_folder TEXT NOT NULL,
    rulesets_collection_folder TEXT NOT NULL DEFAULT '',
    ic_cell_folder TEXT NOT NULL DEFAULT '',
    ic_substrate_folder TEXT NOT NULL DEFAULT '',
    ic_ecm_folder TEXT NOT NULL DEFAULT '',
    ic_dc_folder TEXT NOT NULL DEFAULT '',
    n_replicates INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS trials (
    trial_id INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS variations (
    location TEXT NOT NULL,
    folder TEXT NOT NULL,
    variation_id INTEGER NOT NULL,
    assignment TEXT NOT NULL,
    PRIMARY KEY (location, folder, variation_id),
    UNIQUE (location, folder, assignment)
);
"#;

const FOLDER_COLUMNS: &str = "config_folder, custom_code_folder, rulesets_collection_folder, \
     ic_cell_folder, ic_substrate_folder, ic_ecm_folder, ic_dc_folder";

const VARIATION_COLUMNS: &str = "config_variation_id, rulesets_variation_id, \
     ic_cell_variation_id, ic_substrate_variation_id, ic_ecm_variation_id, ic_dc_variation_id";

const MONAD_MATCH: &str = "config_folder = ?1 AND custom_code_folder = ?2 \
     AND rulesets_collection_folder = ?3 AND ic_cell_folder = ?4 AND ic_substrate_folder = ?5 \
     AND ic_ecm_folder = ?6 AND ic_dc_folder = ?7 AND config_variation_id = ?8 \
     AND rulesets_variation_id = ?9 AND ic_cell_variation_id = ?10 \
     AND ic_substrate_variation_id = ?11 AND ic_ecm_variation_id = ?12 AND ic_dc_variation_id = ?13";

fn opt(folder: &Option<String>) -> &str {
    folder.as_deref().unwrap_or("")
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn read_folders(row: &Row, offset: usize) -> rusqlite::Result<InputFolders> {
    Ok(InputFolders {
        config: row.get(offset)?,
        custom_code: row.get(offset + 1)?,
        rulesets_collection: non_empty(row.get(offset + 2)?),
        ic_cell: non_empty(row.get(offset + 3)?),
        ic_substrate: non_empty(row.get(offset + 4)?),
        ic_ecm: non_empty(row.get(offset + 5)?),
        ic_dc: non_empty(row.get(offset + 6)?),
    })
}

fn read_variations(row: &Row, offset: usize) -> rusqlite::Result<VariationIds> {
    Ok(VariationIds {
        config: row.get(offset)?,
        rulesets: row.get(offset + 1)?,
        ic_cell: row.get(offset + 2)?,
        ic_substrate: row.get(offset + 3)?,
        ic_ecm: row.get(offset + 4)?,
        ic_dc: row.get(offset + 5)?,
    })
}

/// Canonical text form of an assignment (sorted by path).
fn encode_assignment(assignment: &Assignment) -> String {
    let pairs: Vec<(String, &String)> = assignment
        .iter()
        .map(|(path, value)| (path.to_string(), value))
        .collect();
    serde_json::to_string(&pairs).unwrap_or_else(|_| "[]".to_string())
}

fn decode_assignment(text: &str) -> Result<Assignment> {
    let pairs: Vec<(String, String)> = serde_json::from_str(text)
        .map_err(|e| Error::Config(format!("corrupt variation assignment: {}", e)))?;
    pairs
        .into_iter()
        .map(|(path, value)| Ok((path.parse::<XmlPath>()?, value)))
        .collect()
}

/// Handle on the SQLite database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // ------------------------------------------------------------------
    // Variations
    // ------------------------------------------------------------------

    /// Id of `assignment` in the (location, folder) side table, allocating a
    /// new one if this exact assignment has not been seen. The empty
    /// assignment is always id 0.
    pub fn variation_id(
        &self,
        location: Location,
        folder: &str,
        assignment: &Assignment,
    ) -> Result<i64> {
        let loc = location.to_string();
        self.conn.execute(
            "INSERT OR IGNORE INTO variations (location, folder, variation_id, assignment)
             VALUES (?1, ?2, 0, '[]')",
            params![loc, folder],
        )?;
        let text = encode_assignment(assignment);
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT variation_id FROM variations
                 WHERE location = ?1 AND folder = ?2 AND assignment = ?3",
                params![loc, folder, text],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(variation_id), 0) + 1 FROM variations
             WHERE location = ?1 AND folder = ?2",
            params![loc, folder],
            |r| r.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO variations (location, folder, variation_id, assignment)
             VALUES (?1, ?2, ?3, ?4)",
            params![loc, folder, next, text],
        )?;
        Ok(next)
    }

    /// Assignment recorded for a variation id.
    pub fn variation_assignment(
        &self,
        location: Location,
        folder: &str,
        id: i64,
    ) -> Result<Assignment> {
        if id == BASE_ID {
            return Ok(Assignment::new());
        }
        let text: Option<String> = self
            .conn
            .query_row(
                "SELECT assignment FROM variations
                 WHERE location = ?1 AND folder = ?2 AND variation_id = ?3",
                params![location.to_string(), folder, id],
                |r| r.get(0),
            )
            .optional()?;
        match text {
            Some(t) => decode_assignment(&t),
            None => Err(Error::ReservedVariation {
                location: format!("{} folder '{}'", location, folder),
                id,
            }),
        }
    }

    /// Number of Simulation rows still using a (folder, variation id) pair.
    pub fn simulations_using(&self, location: Location, folder: &str, id: i64) -> Result<i64> {
        let sql = match location {
            Location::Config => {
                "SELECT COUNT(*) FROM simulations WHERE config_folder = ?1 AND config_variation_id = ?2"
            }
            Location::Rulesets => {
                "SELECT COUNT(*) FROM simulations
                 WHERE rulesets_collection_folder = ?1 AND rulesets_variation_id = ?2"
            }
        };
        Ok(self
            .conn
            .query_row(sql, params![folder, id], |r| r.get(0))?)
    }

    // ------------------------------------------------------------------
    // Simulations
    // ------------------------------------------------------------------

    /// Persist a new Simulation row; the id is assigned here.
    pub fn insert_simulation(
        &self,
        folders: &InputFolders,
        variations: &VariationIds,
        program_revision: &str,
    ) -> Result<Simulation> {
        variations.validate(folders)?;
        let sql = format!(
            "INSERT INTO simulations (program_revision, {}, {})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            FOLDER_COLUMNS, VARIATION_COLUMNS
        );
        self.conn.execute(
            &sql,
            params![
                program_revision,
                folders.config,
                folders.custom_code,
                opt(&folders.rulesets_collection),
                opt(&folders.ic_cell),
                opt(&folders.ic_substrate),
                opt(&folders.ic_ecm),
                opt(&folders.ic_dc),
                variations.config,
                variations.rulesets,
                variations.ic_cell,
                variations.ic_substrate,
                variations.ic_ecm,
                variations.ic_dc,
            ],
        )?;
        Ok(Simulation {
            id: self.conn.last_insert_rowid(),
            folders: folders.clone(),
            variations: *variations,
            program_revision: program_revision.to_string(),
        })
    }

    pub fn simulation(&self, id: i64) -> Result<Simulation> {
        let sql = format!(
            "SELECT program_revision, {}, {} FROM simulations WHERE simulation_id = ?1",
            FOLDER_COLUMNS, VARIATION_COLUMNS
        );
        self.conn
            .query_row(&sql, params![id], |row| {
                Ok(Simulation {
                    id,
                    program_revision: row.get(0)?,
                    folders: read_folders(row, 1)?,
                    variations: read_variations(row, 8)?,
                })
            })
            .optional()?
            .ok_or_else(|| unknown(Level::Simulation, id))
    }

    // ------------------------------------------------------------------
    // Monads
    // ------------------------------------------------------------------

    /// Id of the Monad for these inputs, creating it if needed.
    pub fn monad_id(&self, folders: &InputFolders, variations: &VariationIds) -> Result<i64> {
        variations.validate(folders)?;
        let (rulesets, ic_cell, ic_substrate, ic_ecm, ic_dc) = (
            opt(&folders.rulesets_collection),
            opt(&folders.ic_cell),
            opt(&folders.ic_substrate),
            opt(&folders.ic_ecm),
            opt(&folders.ic_dc),
        );
        let values = params![
            folders.config,
            folders.custom_code,
            rulesets,
            ic_cell,
            ic_substrate,
            ic_ecm,
            ic_dc,
            variations.config,
            variations.rulesets,
            variations.ic_cell,
            variations.ic_substrate,
            variations.ic_ecm,
            variations.ic_dc,
        ];
        let insert = format!(
            "INSERT OR IGNORE INTO monads ({}, {})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            FOLDER_COLUMNS, VARIATION_COLUMNS
        );
        self.conn.execute(&insert, values)?;
        let select = format!("SELECT monad_id FROM monads WHERE {}", MONAD_MATCH);
        Ok(self.conn.query_row(&select, values, |r| r.get(0))?)
    }

    /// Load a Monad with the replicate target of the current request.
    pub fn monad(&self, id: i64, n_replicates: usize) -> Result<Monad> {
        let sql = format!(
            "SELECT {}, {} FROM monads WHERE monad_id = ?1",
            FOLDER_COLUMNS, VARIATION_COLUMNS
        );
        self.conn
            .query_row(&sql, params![id], |row| {
                Ok(Monad {
                    id,
                    folders: read_folders(row, 0)?,
                    variations: read_variations(row, 7)?,
                    n_replicates,
                })
            })
            .optional()?
            .ok_or_else(|| unknown(Level::Monad, id))
    }

    // ------------------------------------------------------------------
    // Samplings and Trials
    // ------------------------------------------------------------------

    pub fn insert_sampling(&self, folders: &InputFolders, n_replicates: usize) -> Result<Sampling> {
        let sql = format!(
            "INSERT INTO samplings ({}, n_replicates) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            FOLDER_COLUMNS
        );
        self.conn.execute(
            &sql,
            params![
                folders.config,
                folders.custom_code,
                opt(&folders.rulesets_collection),
                opt(&folders.ic_cell),
                opt(&folders.ic_substrate),
                opt(&folders.ic_ecm),
                opt(&folders.ic_dc),
                n_replicates as i64,
            ],
        )?;
        Ok(Sampling {
            id: self.conn.last_insert_rowid(),
            folders: folders.clone(),
            n_replicates,
        })
    }

    pub fn sampling(&self, id: i64) -> Result<Sampling> {
        let sql = format!(
            "SELECT {}, n_replicates FROM samplings WHERE sampling_id = ?1",
            FOLDER_COLUMNS
        );
        self.conn
            .query_row(&sql, params![id], |row| {
                let n: i64 = row.get(7)?;
                Ok(Sampling {
                    id,
                    folders: read_folders(row, 0)?,
                    n_replicates: usize::try_from(n).unwrap_or(0),
                })
            })
            .optional()?
            .ok_or_else(|| unknown(Level::Sampling, id))
    }

    pub fn insert_trial(&self, description: &str, created_at: &str) -> Result<Trial> {
        self.conn.execute(
            "INSERT INTO trials (description, created_at) VALUES (?1, ?2)",
            params![description, created_at],
        )?;
        Ok(Trial {
            id: self.conn.last_insert_rowid(),
            description: description.to_string(),
            created_at: created_at.to_string(),
        })
    }

    pub fn trial(&self, id: i64) -> Result<Trial> {
        self.conn
            .query_row(
                "SELECT description, created_at FROM trials WHERE trial_id = ?1",
                params![id],
                |row| {
                    Ok(Trial {
                        id,
                        description: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| unknown(Level::Trial, id))
    }

    // ------------------------------------------------------------------
    // Level-generic access
    // ------------------------------------------------------------------

    /// All ids currently stored at `level`, ascending.
    pub fn ids(&self, level: Level) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT {col} FROM {table} ORDER BY {col}",
            col = level.id_column(),
            table = level.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
    }

    pub fn exists(&self, level: Level, id: i64) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1",
            level.table(),
            level.id_column()
        );
        let n: i64 = self.conn.query_row(&sql, params![id], |r| r.get(0))?;
        Ok(n > 0)
    }

    pub fn count(&self, level: Level) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", level.table());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    /// Delete rows in one transaction. Returns the number removed.
    pub fn delete_rows(&self, level: Level, ids: &[i64]) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            level.table(),
            level.id_column()
        );
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for id in ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

fn unknown(level: Level, id: i64) -> Error {
    Error::UnknownEntity {
        level: level.to_string(),
        id,
    }
}
