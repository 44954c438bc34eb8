//! Column identifiers and the slug/display-name table.
//!
//! Internally a column is addressed by a lowercase slug (`in_progress`); the
//! backend speaks human-readable names (`"In Progress"`). [`COLUMN_TABLE`] is
//! the single, board-independent mapping between the two. It must stay total
//! in both directions: every slug has exactly one display name and vice versa.
//! [`ColumnMap::standard`] checks that once at startup.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Slug ↔ display-name pairs, in board order.
pub const COLUMN_TABLE: &[(&str, &str)] = &[
    ("not_started", "Not Started"),
    ("in_progress", "In Progress"),
    ("blocked", "Blocked"),
    ("in_review", "In Review"),
    ("done", "Done"),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnMapError {
    #[error("Column '{0}' has no mapping")]
    Unmapped(String),

    #[error("Duplicate column slug '{0}' in mapping table")]
    DuplicateSlug(String),

    #[error("Duplicate display name '{0}' in mapping table")]
    DuplicateDisplayName(String),

    #[error("Column slug '{0}' is not a lowercase slug")]
    InvalidSlug(String),

    #[error("Backend uses columns outside the mapping: {0:?}")]
    ShapeMismatch(Vec<String>),
}

/// Stable internal identifier of a column.
///
/// Deliberately a plain string newtype: a ticket record that already carries
/// a bad value must stay representable so it can be detected and refused,
/// not silently coerced into some default column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(String);

impl ColumnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColumnId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Validated bidirectional slug/display-name mapping.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    entries: Vec<(ColumnId, String)>,
}

impl ColumnMap {
    /// The mapping built from [`COLUMN_TABLE`].
    pub fn standard() -> Result<Self, ColumnMapError> {
        Self::from_pairs(COLUMN_TABLE)
    }

    /// Build and validate a mapping from `(slug, display name)` pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self, ColumnMapError> {
        let mut slugs = HashSet::new();
        let mut names = HashSet::new();
        let mut entries = Vec::with_capacity(pairs.len());

        for (slug, name) in pairs {
            if !is_slug(slug) {
                return Err(ColumnMapError::InvalidSlug(slug.to_string()));
            }
            if !slugs.insert(*slug) {
                return Err(ColumnMapError::DuplicateSlug(slug.to_string()));
            }
            if !names.insert(*name) {
                return Err(ColumnMapError::DuplicateDisplayName(name.to_string()));
            }
            entries.push((ColumnId::new(*slug), name.to_string()));
        }

        Ok(Self { entries })
    }

    pub fn ids(&self) -> impl Iterator<Item = &ColumnId> {
        self.entries.iter().map(|(id, _)| id)
    }

    pub fn contains(&self, id: &ColumnId) -> bool {
        self.entries.iter().any(|(known, _)| known == id)
    }

    /// Display name for a slug. An unknown slug is an error, never a guess.
    pub fn display_name(&self, id: &ColumnId) -> Result<&str, ColumnMapError> {
        self.entries
            .iter()
            .find(|(known, _)| known == id)
            .map(|(_, name)| name.as_str())
            .ok_or_else(|| ColumnMapError::Unmapped(id.to_string()))
    }

    /// Slug for a backend display name.
    pub fn slug_for(&self, display_name: &str) -> Result<&ColumnId, ColumnMapError> {
        self.entries
            .iter()
            .find(|(_, name)| name == display_name)
            .map(|(id, _)| id)
            .ok_or_else(|| ColumnMapError::Unmapped(display_name.to_string()))
    }

    /// Resolve a column value from the wire, which may be either form.
    pub fn resolve_wire(&self, value: &str) -> Result<ColumnId, ColumnMapError> {
        if let Ok(id) = self.slug_for(value) {
            return Ok(id.clone());
        }
        let id = ColumnId::new(value);
        if self.contains(&id) {
            Ok(id)
        } else {
            Err(ColumnMapError::Unmapped(value.to_string()))
        }
    }

    /// Check the columns a backend listing actually uses.
    ///
    /// A listing only shows occupied columns, so absent ones are fine; any
    /// column outside the mapping means the backend changed shape. The
    /// offending values come back sorted and deduplicated.
    pub fn check_listed_columns<'a, I>(&self, columns: I) -> Result<(), ColumnMapError>
    where
        I: IntoIterator<Item = &'a ColumnId>,
    {
        let unexpected: BTreeSet<&str> = columns
            .into_iter()
            .filter(|id| !self.contains(id))
            .map(ColumnId::as_str)
            .collect();
        if unexpected.is_empty() {
            return Ok(());
        }
        Err(ColumnMapError::ShapeMismatch(
            unexpected.into_iter().map(str::to_string).collect(),
        ))
    }
}

fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
