//! Drop-target resolution for pointer drags.
//!
//! A drag ends with an active ticket, an optional element under the pointer
//! and a list of collision candidates. [`resolve_drop`] turns that into
//! exactly one outcome: move the ticket to a known column, do nothing, or
//! cancel. It reads the board through [`DropContext`] and has no side
//! effects; the controller applies the result.

use boardsync_common::{ColumnId, TicketId};
use serde::{Deserialize, Serialize};

use super::store::BoardStore;
use crate::errors::ResolveError;

/// Extra data a droppable element carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropData {
    #[serde(default)]
    pub column_id: Option<String>,
}

/// The element under the pointer when the drag ended.
///
/// Column elements use their column id; ticket elements use the ticket id
/// in decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTarget {
    pub id: String,
    #[serde(default)]
    pub data: Option<DropData>,
}

impl DropTarget {
    pub fn column(id: &ColumnId) -> Self {
        Self {
            id: id.to_string(),
            data: Some(DropData {
                column_id: Some(id.to_string()),
            }),
        }
    }

    pub fn ticket(id: TicketId) -> Self {
        Self {
            id: id.to_string(),
            data: None,
        }
    }

    fn data_column(&self) -> Option<ColumnId> {
        self.data
            .as_ref()
            .and_then(|d| d.column_id.as_deref())
            .map(ColumnId::from)
    }

    fn as_ticket_id(&self) -> Option<TicketId> {
        self.id.parse().ok()
    }
}

/// A droppable the pointer overlapped, with its distance to the final
/// pointer position when known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionCandidate {
    pub id: String,
    #[serde(default)]
    pub distance: Option<f64>,
}

impl CollisionCandidate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            distance: None,
        }
    }

    pub fn at_distance(id: impl Into<String>, distance: f64) -> Self {
        Self {
            id: id.into(),
            distance: Some(distance),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragEnd {
    pub active: TicketId,
    pub over: Option<DropTarget>,
    #[serde(default)]
    pub collisions: Vec<CollisionCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    NoTarget,
    NoValidCollision,
    UnknownTarget(String),
    ActiveTicketMissing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropResolution {
    Move {
        ticket_id: TicketId,
        from: ColumnId,
        to: ColumnId,
    },
    NoOp {
        ticket_id: TicketId,
        column: ColumnId,
    },
    Cancelled(CancelReason),
}

/// Read access the resolver needs.
pub trait DropContext {
    fn is_known_column(&self, column: &ColumnId) -> bool;
    fn ticket_column(&self, ticket_id: TicketId) -> Option<&ColumnId>;
}

impl DropContext for BoardStore {
    fn is_known_column(&self, column: &ColumnId) -> bool {
        BoardStore::is_known_column(self, column)
    }

    fn ticket_column(&self, ticket_id: TicketId) -> Option<&ColumnId> {
        self.ticket(ticket_id).map(|t| &t.column)
    }
}

pub fn resolve_drop(
    drag: &DragEnd,
    ctx: &impl DropContext,
) -> Result<DropResolution, ResolveError> {
    let Some(over) = &drag.over else {
        return Ok(DropResolution::Cancelled(CancelReason::NoTarget));
    };

    let target = match target_column(drag, over, ctx)? {
        Ok(column) => column,
        Err(reason) => {
            tracing::debug!(ticket_id = drag.active, ?reason, "Drop cancelled");
            return Ok(DropResolution::Cancelled(reason));
        }
    };

    // Whatever path produced it, the column must be on the board.
    if !ctx.is_known_column(&target) {
        tracing::error!(ticket_id = drag.active, column = %target, "Resolved drop column is not on the board");
        return Err(ResolveError::InvalidTarget {
            column: target.to_string(),
        });
    }

    let Some(current) = ctx.ticket_column(drag.active) else {
        return Ok(DropResolution::Cancelled(CancelReason::ActiveTicketMissing));
    };
    if *current == target {
        return Ok(DropResolution::NoOp {
            ticket_id: drag.active,
            column: target,
        });
    }
    Ok(DropResolution::Move {
        ticket_id: drag.active,
        from: current.clone(),
        to: target,
    })
}

/// Work out which column the pointer meant. The outer `Result` is a hard
/// failure; the inner one is a cancellation.
fn target_column(
    drag: &DragEnd,
    over: &DropTarget,
    ctx: &impl DropContext,
) -> Result<Result<ColumnId, CancelReason>, ResolveError> {
    if let Some(column) = over.data_column().filter(|c| ctx.is_known_column(c)) {
        return Ok(Ok(column));
    }

    let over_id = ColumnId::from(over.id.as_str());
    if ctx.is_known_column(&over_id) {
        return Ok(Ok(over_id));
    }

    match over.as_ticket_id() {
        // Dropped onto itself: the pointer is over the ticket's own card, so
        // fall back to the columns it overlapped.
        Some(id) if id == drag.active => Ok(nearest_collision(&drag.collisions, ctx)
            .ok_or(CancelReason::NoValidCollision)),
        Some(id) => match ctx.ticket_column(id) {
            Some(column) if ctx.is_known_column(column) => Ok(Ok(column.clone())),
            Some(column) => {
                tracing::error!(
                    ticket_id = drag.active,
                    target_ticket = id,
                    column = %column,
                    "Drop target ticket holds an unknown column; aborting move"
                );
                Err(ResolveError::CorruptionGuard {
                    ticket_id: id,
                    column: column.to_string(),
                })
            }
            None => Ok(Err(CancelReason::UnknownTarget(over.id.clone()))),
        },
        None => Ok(Err(CancelReason::UnknownTarget(over.id.clone()))),
    }
}

/// The known column closest to the pointer. Without distances the last
/// candidate in list order wins.
fn nearest_collision(
    candidates: &[CollisionCandidate],
    ctx: &impl DropContext,
) -> Option<ColumnId> {
    candidates
        .iter()
        .enumerate()
        .map(|(index, c)| (index, c, ColumnId::from(c.id.as_str())))
        .filter(|(_, _, column)| ctx.is_known_column(column))
        .min_by(|(ia, a, _), (ib, b, _)| {
            let da = a.distance.unwrap_or(f64::INFINITY);
            let db = b.distance.unwrap_or(f64::INFINITY);
            da.total_cmp(&db).then(ib.cmp(ia))
        })
        .map(|(_, _, column)| column)
}
