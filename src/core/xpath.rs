//! Attribute-addressable path language for XML configuration documents.
//!
//! A path is a `/`-separated list of segments. A segment is either a plain tag
//! (`phenotype`) selecting the first child with that name, or a predicate
//! (`cell_definition:name:tumor`) selecting the first child named `tag` whose
//! `attribute` equals `value`. Segments are parsed once into [`Segment`] so
//! resolution never re-splits strings.

use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use xmltree::{Element, XMLNode};

/// One step of an [`XmlPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Plain {
        tag: String,
    },
    Predicate {
        tag: String,
        attribute: String,
        value: String,
    },
}

impl Segment {
    pub fn plain(tag: impl Into<String>) -> Self {
        Self::Plain { tag: tag.into() }
    }

    pub fn predicate(
        tag: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Predicate {
            tag: tag.into(),
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    fn matches(&self, el: &Element) -> bool {
        match self {
            Self::Plain { tag } => el.name == *tag,
            Self::Predicate {
                tag,
                attribute,
                value,
            } => el.name == *tag && el.attributes.get(attribute) == Some(value),
        }
    }
}

impl FromStr for Segment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [tag] if !tag.is_empty() => Ok(Self::plain(*tag)),
            [tag, attribute, value] if !tag.is_empty() && !attribute.is_empty() => {
                Ok(Self::predicate(*tag, *attribute, *value))
            }
            _ => Err(Error::InvalidSegment(s.to_string())),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain { tag } => write!(f, "{}", tag),
            Self::Predicate {
                tag,
                attribute,
                value,
            } => write!(f, "{}:{}:{}", tag, attribute, value),
        }
    }
}

/// A parsed path into a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct XmlPath(Vec<Segment>);

impl XmlPath {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// Parse each string as a segment.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        segments
            .into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Append a segment, returning the extended path.
    pub fn join(mut self, segment: Segment) -> Self {
        self.0.push(segment);
        self
    }

    fn not_found(&self, failed: &Segment) -> Error {
        Error::ElementNotFound {
            path: self.to_string(),
            segment: failed.to_string(),
        }
    }
}

impl fmt::Display for XmlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", joined.join("/"))
    }
}

impl FromStr for XmlPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidSegment(s.to_string()));
        }
        Self::from_segments(trimmed.split('/'))
    }
}

impl TryFrom<String> for XmlPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<XmlPath> for String {
    fn from(p: XmlPath) -> Self {
        p.to_string()
    }
}

fn find_child<'a>(el: &'a Element, segment: &Segment) -> Option<&'a Element> {
    el.children
        .iter()
        .filter_map(XMLNode::as_element)
        .find(|c| segment.matches(c))
}

fn find_child_mut<'a>(el: &'a mut Element, segment: &Segment) -> Option<&'a mut Element> {
    el.children
        .iter_mut()
        .filter_map(XMLNode::as_mut_element)
        .find(|c| segment.matches(c))
}

/// Resolve `path` below `root`.
///
/// Missing elements are an error when `required`, otherwise `Ok(None)`.
pub fn resolve<'a>(root: &'a Element, path: &XmlPath, required: bool) -> Result<Option<&'a Element>> {
    let mut current = root;
    for segment in path.segments() {
        match find_child(current, segment) {
            Some(next) => current = next,
            None if required => return Err(path.not_found(segment)),
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Mutable variant of [`resolve`]; missing elements are always an error.
pub fn resolve_mut<'a>(root: &'a mut Element, path: &XmlPath) -> Result<&'a mut Element> {
    let mut current = root;
    for segment in path.segments() {
        current = match find_child_mut(current, segment) {
            Some(next) => next,
            None => return Err(path.not_found(segment)),
        };
    }
    Ok(current)
}

/// Text content of the element at `path` (empty if it has none).
pub fn get_field(root: &Element, path: &XmlPath) -> Result<String> {
    let el = resolve(root, path, true)?.ok_or_else(|| missing_leaf(path))?;
    Ok(el
        .get_text()
        .map(|t| t.trim().to_string())
        .unwrap_or_default())
}

/// Replace the text content of the element at `path`.
pub fn set_field(root: &mut Element, path: &XmlPath, value: impl fmt::Display) -> Result<()> {
    let el = resolve_mut(root, path)?;
    el.children
        .retain(|n| !matches!(n, XMLNode::Text(_) | XMLNode::CData(_)));
    el.children.insert(0, XMLNode::Text(value.to_string()));
    Ok(())
}

/// Multiply the numeric field at `path` in place.
///
/// A `type="int"` attribute on the element keeps the field integral.
pub fn multiply_field(root: &mut Element, path: &XmlPath, factor: f64) -> Result<()> {
    let el = resolve_mut(root, path)?;
    let text = el
        .get_text()
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    let current: f64 = text.parse().map_err(|_| Error::NotNumeric {
        path: path.to_string(),
        value: text.clone(),
    })?;
    let scaled = current * factor;
    let is_int = el.attributes.get("type").map(String::as_str) == Some("int");
    let rendered = if is_int {
        format!("{}", scaled.round() as i64)
    } else {
        format!("{}", scaled)
    };
    el.children
        .retain(|n| !matches!(n, XMLNode::Text(_) | XMLNode::CData(_)));
    el.children.insert(0, XMLNode::Text(rendered));
    Ok(())
}

fn missing_leaf(path: &XmlPath) -> Error {
    let segment = path
        .segments()
        .last()
        .map(|s| s.to_string())
        .unwrap_or_default();
    Error::ElementNotFound {
        path: path.to_string(),
        segment,
    }
}

/// Load an XML document from disk.
pub fn read_document(path: &Path) -> Result<Element> {
    let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
    Element::parse(std::io::BufReader::new(file)).map_err(|e| Error::Xml {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Write an XML document atomically (temp file, then rename).
pub fn write_document(doc: &Element, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let mut buf = Vec::new();
    let config = xmltree::EmitterConfig::new().perform_indent(true);
    doc.write_with_config(&mut buf, config)
        .map_err(|e| Error::Xml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    let tmp_path = path.with_extension("xml.tmp");
    std::fs::write(&tmp_path, &buf).map_err(|e| Error::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

// ============================================================================
// Path builders for common targets
// ============================================================================

/// `cell_definitions/cell_definition:name:<cell_type>`
pub fn cell_definition_path(cell_type: &str) -> XmlPath {
    XmlPath::new(vec![
        Segment::plain("cell_definitions"),
        Segment::predicate("cell_definition", "name", cell_type),
    ])
}

/// A field under a cell type's phenotype, e.g. `["volume", "total"]`.
pub fn phenotype_path(cell_type: &str, tail: &[&str]) -> XmlPath {
    let mut path = cell_definition_path(cell_type).join(Segment::plain("phenotype"));
    for t in tail {
        path = path.join(Segment::plain(*t));
    }
    path
}

pub fn cycle_path(cell_type: &str, tail: &[&str]) -> XmlPath {
    let mut full = vec!["cycle"];
    full.extend_from_slice(tail);
    phenotype_path(cell_type, &full)
}

/// Death sub-model selected by its numeric code (100 = apoptosis, 101 = necrosis).
pub fn death_path(cell_type: &str, model_code: u32, tail: &[&str]) -> XmlPath {
    let mut path = phenotype_path(cell_type, &["death"]).join(Segment::predicate(
        "model",
        "code",
        model_code.to_string(),
    ));
    for t in tail {
        path = path.join(Segment::plain(*t));
    }
    path
}

pub fn motility_path(cell_type: &str, field: &str) -> XmlPath {
    phenotype_path(cell_type, &["motility", field])
}

/// Rate at which `cell_type` attacks `target`.
pub fn attack_rate_path(cell_type: &str, target: &str) -> XmlPath {
    phenotype_path(cell_type, &["cell_interactions", "attack_rates"])
        .join(Segment::predicate("attack_rate", "name", target))
}

pub fn custom_data_path(cell_type: &str, field: &str) -> XmlPath {
    cell_definition_path(cell_type)
        .join(Segment::plain("custom_data"))
        .join(Segment::plain(field))
}

pub fn user_parameter_path(name: &str) -> XmlPath {
    XmlPath::new(vec![Segment::plain("user_parameters"), Segment::plain(name)])
}

/// Which parameter of a behavior rule's signal response to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    HalfMax,
    HillPower,
    MaxResponse,
}

/// Path into a rulesets document for one signal of one behavior.
///
/// `MaxResponse` belongs to the signal direction, the others to the signal.
pub fn rule_path(
    cell_type: &str,
    behavior: &str,
    increasing: bool,
    signal: &str,
    field: RuleField,
) -> XmlPath {
    let direction = if increasing {
        "increasing_signals"
    } else {
        "decreasing_signals"
    };
    let base = XmlPath::new(vec![
        Segment::predicate("behavior_ruleset", "name", cell_type),
        Segment::predicate("behavior", "name", behavior),
        Segment::plain(direction),
    ]);
    match field {
        RuleField::MaxResponse => base.join(Segment::plain("max_response")),
        RuleField::HalfMax => base
            .join(Segment::predicate("signal", "name", signal))
            .join(Segment::plain("half_max")),
        RuleField::HillPower => base
            .join(Segment::predicate("signal", "name", signal))
            .join(Segment::plain("hill_power")),
    }
}
