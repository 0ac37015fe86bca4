//! Variation requests and design methods.
//!
//! A design method turns a list of variation requests into concrete design
//! points. Each point is an assignment (path → value text) per location, which
//! the store then maps to a variation id.

use super::error::{Error, Result};
use super::store::Store;
use super::types::{InputFolders, Location, VariationIds};
use super::xpath::XmlPath;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Concrete values for every varied field of one document.
pub type Assignment = BTreeMap<XmlPath, String>;

fn default_location() -> Location {
    Location::Config
}

/// A dimension with an explicit finite list of candidate values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementaryVariation {
    #[serde(default = "default_location")]
    pub location: Location,
    pub path: XmlPath,
    pub values: Vec<serde_yaml_ng::Value>,
}

/// A dimension drawn from a distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedVariation {
    #[serde(default = "default_location")]
    pub location: Location,
    pub path: XmlPath,
    pub distribution: Distribution,
    /// Round draws to integers
    #[serde(default)]
    pub integer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Variation {
    Elementary(ElementaryVariation),
    Distributed(DistributedVariation),
}

impl Variation {
    pub fn location(&self) -> Location {
        match self {
            Self::Elementary(v) => v.location,
            Self::Distributed(v) => v.location,
        }
    }

    pub fn path(&self) -> &XmlPath {
        match self {
            Self::Elementary(v) => &v.path,
            Self::Distributed(v) => &v.path,
        }
    }

    /// Value at cumulative probability `u` in `[0, 1)`.
    fn at_quantile(&self, u: f64) -> String {
        match self {
            Self::Elementary(v) => pick(&v.values, u),
            Self::Distributed(v) => {
                let x = v.distribution.quantile(u);
                if v.integer {
                    format!("{}", x.round() as i64)
                } else {
                    format!("{}", x)
                }
            }
        }
    }
}

fn pick(values: &[serde_yaml_ng::Value], u: f64) -> String {
    let idx = ((u * values.len() as f64) as usize).min(values.len().saturating_sub(1));
    values.get(idx).map(yaml_value_to_string).unwrap_or_default()
}

/// Univariate distributions a dimension can be drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    Uniform { lo: f64, hi: f64 },
    LogUniform { lo: f64, hi: f64 },
}

impl Distribution {
    pub fn quantile(&self, u: f64) -> f64 {
        match *self {
            Self::Uniform { lo, hi } => lo + u * (hi - lo),
            Self::LogUniform { lo, hi } => (lo.ln() + u * (hi.ln() - lo.ln())).exp(),
        }
    }

    fn validate(&self, path: &XmlPath) -> Result<()> {
        let (lo, hi, log) = match *self {
            Self::Uniform { lo, hi } => (lo, hi, false),
            Self::LogUniform { lo, hi } => (lo, hi, true),
        };
        if lo.is_nan() || hi.is_nan() || lo > hi || (log && lo <= 0.0) {
            return Err(Error::Config(format!(
                "invalid distribution bounds [{}, {}] for {}",
                lo, hi, path
            )));
        }
        Ok(())
    }
}

/// How design points are chosen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DesignMethod {
    /// Full factorial over elementary values
    #[default]
    Grid,
    /// One stratified draw per point in every dimension
    LatinHypercube { points: usize, seed: u64 },
}

/// One point of a design.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DesignPoint {
    pub config: Assignment,
    pub rulesets: Assignment,
}

impl DesignPoint {
    fn set(&mut self, location: Location, path: &XmlPath, value: String) {
        let target = match location {
            Location::Config => &mut self.config,
            Location::Rulesets => &mut self.rulesets,
        };
        target.insert(path.clone(), value);
    }
}

/// Convert a YAML scalar to the text written into a document.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

/// Expand variation requests into design points.
///
/// Every point is distinct, so a Sampling gets one Monad per point. A design
/// that repeats a point (e.g. a hypercube with more points than an elementary
/// dimension has values) is rejected.
pub fn generate(method: &DesignMethod, variations: &[Variation]) -> Result<Vec<DesignPoint>> {
    for v in variations {
        match v {
            Variation::Elementary(e) if e.values.is_empty() => {
                return Err(Error::Config(format!("no values given for {}", e.path)));
            }
            Variation::Distributed(d) => d.distribution.validate(&d.path)?,
            Variation::Elementary(_) => {}
        }
    }
    let points = match method {
        DesignMethod::Grid => grid(variations)?,
        DesignMethod::LatinHypercube { points, seed } => latin_hypercube(variations, *points, *seed)?,
    };
    let mut seen = FxHashSet::default();
    if let Some(dup) = points.iter().find(|p| !seen.insert(*p)) {
        return Err(Error::Config(format!(
            "design repeats the point {:?}; use fewer points or more values",
            dup.config
        )));
    }
    Ok(points)
}

fn grid(variations: &[Variation]) -> Result<Vec<DesignPoint>> {
    let mut points = vec![DesignPoint::default()];
    for v in variations {
        let e = match v {
            Variation::Elementary(e) => e,
            Variation::Distributed(d) => {
                return Err(Error::Config(format!(
                    "grid design needs explicit values, but {} is distributed",
                    d.path
                )));
            }
        };
        let mut next = Vec::with_capacity(points.len() * e.values.len());
        for point in &points {
            for value in &e.values {
                let mut p = point.clone();
                p.set(e.location, &e.path, yaml_value_to_string(value));
                next.push(p);
            }
        }
        points = next;
    }
    Ok(points)
}

fn latin_hypercube(variations: &[Variation], n: usize, seed: u64) -> Result<Vec<DesignPoint>> {
    if n == 0 {
        return Err(Error::Config("latin hypercube needs at least one point".into()));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut points = vec![DesignPoint::default(); n];
    for v in variations {
        let mut strata: Vec<usize> = (0..n).collect();
        strata.shuffle(&mut rng);
        for (point, stratum) in points.iter_mut().zip(strata) {
            let u = (stratum as f64 + rng.gen::<f64>()) / n as f64;
            point.set(v.location(), v.path(), v.at_quantile(u));
        }
    }
    Ok(points)
}

/// A sampling request as written in a design file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignFile {
    pub folders: InputFolders,

    #[serde(default = "default_replicates")]
    pub replicates: usize,

    #[serde(default)]
    pub design: DesignMethod,

    #[serde(default)]
    pub variations: Vec<Variation>,
}

fn default_replicates() -> usize {
    1
}

/// Parse a design file.
pub fn parse_design_file(path: &std::path::Path) -> Result<DesignFile> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let file: DesignFile = serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    if file.replicates == 0 {
        return Err(Error::Config(format!(
            "{}: replicates must be at least 1",
            path.display()
        )));
    }
    Ok(file)
}

/// Map a design point to variation ids, allocating new ids as needed.
pub fn resolve_point(
    store: &Store,
    folders: &InputFolders,
    point: &DesignPoint,
) -> Result<VariationIds> {
    let mut ids = VariationIds::base(folders);
    ids.config = store.variation_id(Location::Config, &folders.config, &point.config)?;
    match &folders.rulesets_collection {
        Some(folder) => {
            ids.rulesets = store.variation_id(Location::Rulesets, folder, &point.rulesets)?;
        }
        None if !point.rulesets.is_empty() => {
            return Err(Error::Config(
                "rulesets variations requested without a rulesets collection".into(),
            ));
        }
        None => {}
    }
    Ok(ids)
}
