//! Shared domain types for the boardsync board client.
//!
//! - `rank`: multi-segment rank strings that order tickets inside a column
//! - `column`: column identifiers and the slug ↔ display-name table
//! - `ticket`: boards, columns, tickets and their wire records

pub mod column;
pub mod rank;
pub mod ticket;

pub use column::{COLUMN_TABLE, ColumnId, ColumnMap, ColumnMapError};
pub use rank::{Rank, RankError};
pub use ticket::{Board, BoardId, Column, Ticket, TicketId, TicketPatch, TicketRecord};
