//! Zoom levels and zoom-conditioned configuration values.
//!
//! Process parameters may be conditioned on the zoom level with the textual
//! keys `zoom=`, `zoom<=`, `zoom<`, `zoom>=` and `zoom>`. Predicates are
//! parsed once at configuration-load time into a typed comparison; resolving
//! a value for a zoom is then plain integer comparison.
//!
//! Resolution is **first match in declaration order**, not most-specific
//! match. Declared order is significant and part of the contract: given
//! `[zoom<=8 -> A, zoom>8 -> B]`, zoom 8 resolves to `A`; declaring the
//! pairs in reverse order changes the result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Key carrying the unconditioned fallback of a conditional mapping.
const DEFAULT_KEY: &str = "default";

/// Errors from zoom range handling and zoom-conditioned value resolution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZoomError {
    /// Minimum zoom is above maximum zoom.
    #[error("invalid zoom range: min {min} > max {max}")]
    InvalidRange { min: u8, max: u8 },

    /// A key looked like a zoom predicate but could not be parsed.
    #[error("cannot parse zoom predicate from {0:?}")]
    InvalidPredicate(String),

    /// No predicate matched and no default was declared.
    #[error("no value defined for zoom {zoom}")]
    Unresolved { zoom: u8 },

    /// A mapping mixes zoom-predicate keys with plain parameter keys.
    #[error("conditional mapping mixes zoom predicates with plain key {0:?}")]
    MixedConditionalKeys(String),
}

// =============================================================================
// Zoom Levels
// =============================================================================

/// An inclusive zoom range `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoomLevels {
    min: u8,
    max: u8,
}

impl ZoomLevels {
    /// Creates a zoom range, failing if `min > max`.
    pub fn new(min: u8, max: u8) -> Result<Self, ZoomError> {
        if min > max {
            return Err(ZoomError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Creates a range covering a single zoom level.
    pub fn from_single(zoom: u8) -> Self {
        Self {
            min: zoom,
            max: zoom,
        }
    }

    /// Minimum zoom.
    pub fn min(&self) -> u8 {
        self.min
    }

    /// Maximum zoom.
    pub fn max(&self) -> u8 {
        self.max
    }

    /// Number of zoom levels in the range.
    pub fn len(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    /// Always false; a range holds at least one zoom.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if the zoom lies within the range.
    pub fn contains(&self, zoom: u8) -> bool {
        self.min <= zoom && zoom <= self.max
    }

    /// Returns true if `other` lies entirely within this range.
    pub fn contains_range(&self, other: &ZoomLevels) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// Iterates the range in ascending order.
    pub fn ascending(&self) -> impl Iterator<Item = u8> {
        self.min..=self.max
    }

    /// Iterates the range in descending order.
    pub fn descending(&self) -> impl Iterator<Item = u8> {
        (self.min..=self.max).rev()
    }
}

impl fmt::Display for ZoomLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

// =============================================================================
// Zoom Predicates
// =============================================================================

/// Comparison operator of a zoom predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ZoomOp {
    Eq,
    Le,
    Lt,
    Ge,
    Gt,
}

impl fmt::Display for ZoomOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ZoomOp::Eq => "=",
            ZoomOp::Le => "<=",
            ZoomOp::Lt => "<",
            ZoomOp::Ge => ">=",
            ZoomOp::Gt => ">",
        };
        write!(f, "{}", op)
    }
}

/// A parsed zoom predicate: an operator and an integer zoom.
///
/// Parsed once from its textual form; evaluation never re-parses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ZoomPredicate {
    op: ZoomOp,
    zoom: u8,
}

impl ZoomPredicate {
    /// Creates a predicate from its typed parts.
    pub fn new(op: ZoomOp, zoom: u8) -> Self {
        Self { op, zoom }
    }

    /// Parses a textual predicate key such as `"zoom<=8"`.
    ///
    /// Whitespace around the operator and number is tolerated.
    pub fn parse(key: &str) -> Result<Self, ZoomError> {
        let rest = key
            .trim()
            .strip_prefix("zoom")
            .ok_or_else(|| ZoomError::InvalidPredicate(key.to_string()))?
            .trim_start();
        // Two-character operators must be tried first.
        let (op, number) = if let Some(n) = rest.strip_prefix("<=") {
            (ZoomOp::Le, n)
        } else if let Some(n) = rest.strip_prefix(">=") {
            (ZoomOp::Ge, n)
        } else if let Some(n) = rest.strip_prefix('<') {
            (ZoomOp::Lt, n)
        } else if let Some(n) = rest.strip_prefix('>') {
            (ZoomOp::Gt, n)
        } else if let Some(n) = rest.strip_prefix('=') {
            (ZoomOp::Eq, n)
        } else {
            return Err(ZoomError::InvalidPredicate(key.to_string()));
        };
        let zoom = number
            .trim()
            .parse::<u8>()
            .map_err(|_| ZoomError::InvalidPredicate(key.to_string()))?;
        Ok(Self { op, zoom })
    }

    /// Returns true if the key has the shape of a zoom predicate.
    pub fn is_predicate_key(key: &str) -> bool {
        Self::parse(key).is_ok()
    }

    /// Evaluates the predicate against a zoom level.
    pub fn matches(&self, zoom: u8) -> bool {
        match self.op {
            ZoomOp::Eq => zoom == self.zoom,
            ZoomOp::Le => zoom <= self.zoom,
            ZoomOp::Lt => zoom < self.zoom,
            ZoomOp::Ge => zoom >= self.zoom,
            ZoomOp::Gt => zoom > self.zoom,
        }
    }
}

impl fmt::Display for ZoomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zoom{}{}", self.op, self.zoom)
    }
}

// =============================================================================
// Zoom-Conditioned Values
// =============================================================================

/// An ordered set of `(predicate, value)` pairs plus an optional default.
///
/// `resolve` returns the value of the **first** predicate matching the
/// requested zoom, in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoomConditional<T> {
    entries: Vec<(ZoomPredicate, T)>,
    default: Option<T>,
}

impl<T> ZoomConditional<T> {
    /// Creates an empty conditional value with no default.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            default: None,
        }
    }

    /// Creates a conditional value with an unconditioned default.
    pub fn with_default(default: T) -> Self {
        Self {
            entries: Vec::new(),
            default: Some(default),
        }
    }

    /// Appends a `(predicate, value)` pair; declaration order is preserved.
    pub fn push(&mut self, predicate: ZoomPredicate, value: T) -> &mut Self {
        self.entries.push((predicate, value));
        self
    }

    /// Sets the unconditioned default.
    pub fn set_default(&mut self, default: T) -> &mut Self {
        self.default = Some(default);
        self
    }

    /// Resolves the value for a zoom level.
    ///
    /// First matching predicate wins; falls back to the default; fails with
    /// [`ZoomError::Unresolved`] if neither applies.
    pub fn resolve(&self, zoom: u8) -> Result<&T, ZoomError> {
        self.entries
            .iter()
            .find(|(predicate, _)| predicate.matches(zoom))
            .map(|(_, value)| value)
            .or(self.default.as_ref())
            .ok_or(ZoomError::Unresolved { zoom })
    }
}

impl<T> Default for ZoomConditional<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Parameter Tree Resolution
// =============================================================================

/// Resolves a zoom-conditioned parameter tree into a snapshot for one zoom.
///
/// Any JSON mapping whose keys are zoom predicates is replaced by the value
/// of the first matching predicate (declaration order); a `"default"` key
/// acts as the unconditioned fallback. Mixed operators within one mapping
/// are allowed; mixing predicate keys with plain parameter keys is a
/// configuration error. Plain mappings and arrays are walked recursively.
///
/// # Arguments
///
/// * `value` - The raw parameter tree
/// * `zoom` - The zoom level to resolve for
pub fn resolve_tree(value: &Value, zoom: u8) -> Result<Value, ZoomError> {
    match value {
        Value::Object(map) => {
            let has_predicates = map.keys().any(|k| ZoomPredicate::is_predicate_key(k));
            if has_predicates {
                // Conditional node: only predicate keys and a default allowed.
                if let Some(plain) = map
                    .keys()
                    .find(|k| *k != DEFAULT_KEY && !ZoomPredicate::is_predicate_key(k))
                {
                    return Err(ZoomError::MixedConditionalKeys(plain.clone()));
                }
                for (key, entry) in map {
                    if key == DEFAULT_KEY {
                        continue;
                    }
                    if ZoomPredicate::parse(key)?.matches(zoom) {
                        return resolve_tree(entry, zoom);
                    }
                }
                match map.get(DEFAULT_KEY) {
                    Some(default) => resolve_tree(default, zoom),
                    None => Err(ZoomError::Unresolved { zoom }),
                }
            } else {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, entry) in map {
                    resolved.insert(key.clone(), resolve_tree(entry, zoom)?);
                }
                Ok(Value::Object(resolved))
            }
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| resolve_tree(item, zoom))
                .collect::<Result<_, _>>()?,
        )),
        scalar => Ok(scalar.clone()),
    }
}
