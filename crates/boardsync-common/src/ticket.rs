use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::column::{ColumnId, ColumnMap, ColumnMapError};
use crate::rank::Rank;

pub type TicketId = i64;
pub type BoardId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    pub columns: Vec<Column>,
}

impl Board {
    /// A board whose columns are exactly the entries of `map`, in table order.
    pub fn from_column_map(id: BoardId, name: impl Into<String>, map: &ColumnMap) -> Self {
        let columns = map
            .ids()
            .enumerate()
            .filter_map(|(position, id)| {
                map.display_name(id).ok().map(|name| Column {
                    id: id.clone(),
                    name: name.to_string(),
                    position: position as u32,
                })
            })
            .collect();
        Self {
            id,
            name: name.into(),
            columns,
        }
    }

    pub fn has_column(&self, id: &ColumnId) -> bool {
        self.columns.iter().any(|c| &c.id == id)
    }

    pub fn column_ids(&self) -> impl Iterator<Item = &ColumnId> {
        self.columns.iter().map(|c| &c.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub board_id: BoardId,
    pub title: String,
    pub description: String,
    pub assignee: Option<String>,
    pub rank: Rank,
    pub column: ColumnId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the ticket entered its current column; `None` when unknown.
    pub column_entered_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Time spent in the current column, measured from `column_entered_at`
    /// (or `created_at` when the server never reported a column change).
    pub fn time_in_column(&self, now: DateTime<Utc>) -> chrono::Duration {
        let since = self.column_entered_at.unwrap_or(self.created_at);
        (now - since).max(chrono::Duration::zero())
    }

    /// Convert a wire record, mapping its column through `map`.
    pub fn from_record(record: TicketRecord, map: &ColumnMap) -> Result<Self, ColumnMapError> {
        let column = map.resolve_wire(&record.column)?;
        Ok(Self::with_column(record, column))
    }

    /// Convert a wire record, keeping an unmapped column verbatim.
    ///
    /// The mapping error is handed back instead of being swallowed, so the
    /// caller can report it. The resulting ticket carries the raw value and
    /// fails every later column-set check.
    pub fn from_record_preserving(
        record: TicketRecord,
        map: &ColumnMap,
    ) -> (Self, Option<ColumnMapError>) {
        match map.resolve_wire(&record.column) {
            Ok(column) => (Self::with_column(record, column), None),
            Err(e) => {
                let column = ColumnId::new(record.column.clone());
                (Self::with_column(record, column), Some(e))
            }
        }
    }

    fn with_column(record: TicketRecord, column: ColumnId) -> Self {
        Self {
            id: record.id,
            board_id: record.board_id,
            title: record.title,
            description: record.description,
            assignee: record.assignee,
            rank: record.rank,
            column,
            created_at: record.created_at,
            updated_at: record.updated_at,
            column_entered_at: record.column_entered_at,
        }
    }

    /// Apply the editable fields of `patch`.
    pub fn apply_patch(&mut self, patch: &TicketPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(assignee) = &patch.assignee {
            self.assignee = assignee.clone();
        }
    }
}

/// Ticket as the backend sends it. `column` may be a display name or a slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: TicketId,
    #[serde(default)]
    pub board_id: BoardId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(alias = "priority")]
    pub rank: Rank,
    pub column: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub column_entered_at: Option<DateTime<Utc>>,
}

/// Editable ticket fields for `PUT /tickets/{id}`.
///
/// `assignee: Some(None)` clears the assignee.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<String>>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.assignee.is_none()
    }
}
