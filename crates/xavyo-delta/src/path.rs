//! Item paths.
//!
//! An [`ItemPath`] addresses an item inside an object tree. It is an ordered
//! sequence of segments: item names, container value ids and wildcards.
//!
//! The textual form separates segments with `/`; ids are written in brackets
//! and `[*]` is the wildcard:
//!
//! ```
//! use xavyo_delta::path::{ItemPath, PathSegment};
//!
//! let path: ItemPath = "assignment/[3]/description".parse().unwrap();
//! assert_eq!(path.len(), 3);
//! assert_eq!(path.segments()[1], PathSegment::Id(3));
//! assert_eq!(path.to_string(), "assignment/[3]/description");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DeltaError, Result};

/// A single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    /// Item name.
    Name(String),
    /// Container value id.
    Id(u64),
    /// Any container value.
    Wildcard,
}

impl PathSegment {
    /// Get the item name, if this is a name segment.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            _ => None,
        }
    }

    fn is_id_like(&self) -> bool {
        matches!(self, Self::Id(_) | Self::Wildcard)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "[{id}]"),
            Self::Wildcard => f.write_str("[*]"),
        }
    }
}

/// Relation between two paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathRelation {
    /// Both paths address the same item.
    Equivalent,
    /// This path is a strict prefix of the other one (it points above it).
    Superpath,
    /// The other path is a strict prefix of this one (it points below it).
    Subpath,
    /// The paths diverge.
    Different,
}

/// Ordered sequence of segments addressing an item in an object tree.
///
/// Serialized in its textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemPath(Vec<PathSegment>);

impl ItemPath {
    /// The empty path (object root).
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a path from item names only.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            names
                .into_iter()
                .map(|n| PathSegment::Name(n.into()))
                .collect(),
        )
    }

    /// Build a path from raw segments.
    #[must_use]
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    /// Single-segment path.
    pub fn name(name: impl Into<String>) -> Self {
        Self(vec![PathSegment::Name(name.into())])
    }

    /// Path segments.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return a new path with a name segment appended.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Name(name.into()));
        Self(segments)
    }

    /// Return a new path with an id segment appended.
    #[must_use]
    pub fn with_id(&self, id: u64) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Id(id));
        Self(segments)
    }

    /// Concatenate two paths.
    #[must_use]
    pub fn concat(&self, other: &ItemPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// First item name in the path.
    #[must_use]
    pub fn first_name(&self) -> Option<&str> {
        self.0.iter().find_map(PathSegment::as_name)
    }

    /// Last item name in the path.
    #[must_use]
    pub fn last_name(&self) -> Option<&str> {
        self.0.iter().rev().find_map(PathSegment::as_name)
    }

    /// Split into the segments addressing the parent container value and the
    /// name of the addressed item.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the path does not end with an item name.
    pub fn split_item_name(&self) -> Result<(&[PathSegment], &str)> {
        match self.0.split_last() {
            Some((PathSegment::Name(name), parent)) => Ok((parent, name)),
            _ => Err(DeltaError::schema(format!(
                "Path '{self}' does not end with an item name"
            ))),
        }
    }

    /// Path of the parent item, if any.
    #[must_use]
    pub fn parent(&self) -> Option<ItemPath> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    /// Copy of this path with id and wildcard segments dropped.
    #[must_use]
    pub fn without_ids(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|s| !s.is_id_like())
                .cloned()
                .collect(),
        )
    }

    /// Compare two paths.
    ///
    /// Names must match exactly. Ids must be equal unless one side is a
    /// wildcard. An id present on one side only is treated as unspecified
    /// and skipped, so `assignment/description` is equivalent to
    /// `assignment/[3]/description`.
    #[must_use]
    pub fn compare(&self, other: &ItemPath) -> PathRelation {
        let (a, b) = (&self.0, &other.0);
        let (mut i, mut j) = (0, 0);
        loop {
            match (a.get(i), b.get(j)) {
                (None, None) => return PathRelation::Equivalent,
                (None, Some(_)) => {
                    return if b[j..].iter().all(PathSegment::is_id_like) {
                        PathRelation::Equivalent
                    } else {
                        PathRelation::Superpath
                    };
                }
                (Some(_), None) => {
                    return if a[i..].iter().all(PathSegment::is_id_like) {
                        PathRelation::Equivalent
                    } else {
                        PathRelation::Subpath
                    };
                }
                (Some(x), Some(y)) => match (x, y) {
                    (PathSegment::Name(p), PathSegment::Name(q)) => {
                        if p != q {
                            return PathRelation::Different;
                        }
                        i += 1;
                        j += 1;
                    }
                    (PathSegment::Id(p), PathSegment::Id(q)) => {
                        if p != q {
                            return PathRelation::Different;
                        }
                        i += 1;
                        j += 1;
                    }
                    (PathSegment::Wildcard, PathSegment::Id(_) | PathSegment::Wildcard)
                    | (PathSegment::Id(_), PathSegment::Wildcard) => {
                        i += 1;
                        j += 1;
                    }
                    (PathSegment::Id(_) | PathSegment::Wildcard, PathSegment::Name(_)) => {
                        i += 1;
                    }
                    (PathSegment::Name(_), PathSegment::Id(_) | PathSegment::Wildcard) => {
                        j += 1;
                    }
                },
            }
        }
    }

    /// Whether both paths address the same item.
    #[must_use]
    pub fn is_equivalent(&self, other: &ItemPath) -> bool {
        self.compare(other) == PathRelation::Equivalent
    }

    /// Whether the paths are on the same branch (equal, above or below).
    #[must_use]
    pub fn is_related(&self, other: &ItemPath) -> bool {
        self.compare(other) != PathRelation::Different
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for ItemPath {
    type Err = DeltaError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        trimmed
            .split('/')
            .map(parse_segment)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

fn parse_segment(raw: &str) -> Result<PathSegment> {
    if raw.is_empty() {
        return Err(DeltaError::schema("Empty path segment"));
    }
    if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        if inner == "*" {
            return Ok(PathSegment::Wildcard);
        }
        return inner
            .parse::<u64>()
            .map(PathSegment::Id)
            .map_err(|_| DeltaError::schema(format!("Invalid container id segment: {raw}")));
    }
    if raw.contains(['[', ']']) {
        return Err(DeltaError::schema(format!("Invalid path segment: {raw}")));
    }
    Ok(PathSegment::Name(raw.to_string()))
}

impl TryFrom<String> for ItemPath {
    type Error = DeltaError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ItemPath> for String {
    fn from(path: ItemPath) -> Self {
        path.to_string()
    }
}

impl From<Vec<PathSegment>> for ItemPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}
