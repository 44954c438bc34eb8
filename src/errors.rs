//! Typed error hierarchy for the board client.
//!
//! One enum per subsystem, plus the umbrella [`BoardError`] that carries the
//! four failure classes the UI layer distinguishes:
//! - `Validation` — a target column outside the known set, refused up front
//! - `TransientNetwork` — a REST mutation failed or timed out and was rolled back
//! - `ConnectionLost` — the live channel is down and retries are exhausted
//! - `CorruptionGuardTripped` — a stored record already holds a bad column id

use boardsync_common::{ColumnMapError, RankError, TicketId};
use thiserror::Error;

/// Errors from the board state store.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Column '{column}' is not on this board")]
    UnknownColumn { column: String },

    #[error("Ticket {id} not found")]
    TicketNotFound { id: TicketId },

    #[error("Ticket {ticket_id} already has a mutation in flight")]
    MutationInFlight { ticket_id: TicketId },

    #[error("Could not rank ticket {ticket_id}: {source}")]
    Rank {
        ticket_id: TicketId,
        #[source]
        source: RankError,
    },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Errors from drop-target resolution.
#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("Ticket {ticket_id} holds unknown column '{column}'; refusing to copy it")]
    CorruptionGuard { ticket_id: TicketId, column: String },

    #[error("Resolved column '{column}' is not on this board")]
    InvalidTarget { column: String },
}

/// Errors from the REST client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error(transparent)]
    ColumnMap(#[from] ColumnMapError),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout { seconds: 0 }
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err)
        }
    }
}

/// Errors surfaced to the application layer.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Invalid move: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    TransientNetwork(#[source] ApiError),

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Ticket {ticket_id} holds unknown column '{column}'")]
    CorruptionGuardTripped { ticket_id: TicketId, column: String },

    #[error(transparent)]
    Store(StoreError),
}

impl BoardError {
    /// Network and connection failures get an auto-dismissing notice with a
    /// retry affordance; the other classes are resolved locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BoardError::TransientNetwork(_) | BoardError::ConnectionLost { .. }
        )
    }
}

impl From<StoreError> for BoardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownColumn { column } => {
                BoardError::Validation(format!("column '{}' is not on this board", column))
            }
            other => BoardError::Store(other),
        }
    }
}

impl From<ResolveError> for BoardError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::CorruptionGuard { ticket_id, column } => {
                BoardError::CorruptionGuardTripped { ticket_id, column }
            }
            ResolveError::InvalidTarget { column } => {
                BoardError::Validation(format!("column '{}' is not on this board", column))
            }
        }
    }
}

impl From<ApiError> for BoardError {
    fn from(err: ApiError) -> Self {
        BoardError::TransientNetwork(err)
    }
}
