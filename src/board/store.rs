//! Board state store.
//!
//! [`BoardStore`] is the single in-memory model of the open board: columns,
//! tickets, in-flight optimistic mutations and the current selection. Every
//! method is synchronous and finishes before returning; callers share the
//! store through a [`StoreHandle`] and never hold its lock across an await.
//!
//! Per-ticket lifecycle:
//!
//! ```text
//!   stable ──apply_optimistic_*──> pending ──confirm──> stable
//!                                     │
//!                                     ├──rollback / expire──> stable (snapshot restored)
//!                                     └──newer remote update──> stable (server wins)
//! ```
//!
//! Views subscribe to [`StoreChange`] notifications, which are sent after the
//! model has been updated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use boardsync_common::{Board, ColumnId, Rank, RankError, Ticket, TicketId, TicketPatch};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::errors::StoreError;

const CHANGE_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    Move { to: ColumnId },
    Edit { patch: TicketPatch },
}

/// Identifies one optimistic mutation. Confirm and rollback only act on
/// the mutation whose token they carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationToken(u64);

/// An optimistic change waiting for the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub ticket_id: TicketId,
    pub token: MutationToken,
    pub kind: MutationKind,
    /// The ticket as it was before the change.
    pub snapshot: Ticket,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    Optimistic,
    Confirmed,
    RolledBack,
    Remote,
}

/// Notification sent to subscribers after each mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum StoreChange {
    Loaded { tickets: usize },
    TicketUpdated { id: TicketId, origin: ChangeOrigin },
    TicketRemoved { id: TicketId },
    SelectionChanged { selected: Option<TicketId> },
}

/// What `merge_remote_update` did with an inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Applied,
    /// Newer than the pending mutation: the server's record replaced it.
    ResolvedPending,
    /// Older than the pending mutation or the stored record.
    IgnoredStale,
}

#[derive(Debug, Clone)]
struct Entry {
    ticket: Ticket,
    /// Insertion order; breaks rank ties.
    seq: u64,
}

pub struct BoardStore {
    board: Board,
    tickets: HashMap<TicketId, Entry>,
    next_seq: u64,
    next_token: u64,
    pending: HashMap<TicketId, PendingMutation>,
    selection: Option<TicketId>,
    changes: broadcast::Sender<StoreChange>,
}

impl BoardStore {
    pub fn new(board: Board) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            board,
            tickets: HashMap::new(),
            next_seq: 0,
            next_token: 0,
            pending: HashMap::new(),
            selection: None,
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    fn insert_entry(&mut self, ticket: Ticket) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tickets.insert(ticket.id, Entry { ticket, seq });
    }

    fn warn_unknown_column(&self, ticket: &Ticket) {
        if !self.board.has_column(&ticket.column) {
            tracing::warn!(
                ticket_id = ticket.id,
                column = %ticket.column,
                "Stored ticket references a column outside the board"
            );
        }
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Replace the whole model. Pending mutations and selection are dropped.
    pub fn load(&mut self, board: Board, tickets: Vec<Ticket>) {
        self.board = board;
        self.tickets.clear();
        self.pending.clear();
        self.selection = None;
        self.next_seq = 0;
        for ticket in tickets {
            self.warn_unknown_column(&ticket);
            self.insert_entry(ticket);
        }
        tracing::debug!(tickets = self.tickets.len(), "Board loaded");
        self.notify(StoreChange::Loaded {
            tickets: self.tickets.len(),
        });
    }

    /// Bring the model in line with a fresh server listing after the live
    /// channel was down. Tickets with a pending mutation keep it unless the
    /// listing is newer; tickets absent from the listing are removed.
    pub fn reconcile(&mut self, tickets: Vec<Ticket>) {
        let listed: std::collections::HashSet<TicketId> = tickets.iter().map(|t| t.id).collect();
        let gone: Vec<TicketId> = self
            .tickets
            .keys()
            .filter(|id| !listed.contains(id) && !self.pending.contains_key(id))
            .copied()
            .collect();
        for id in gone {
            self.merge_remote_delete(id);
        }
        for ticket in tickets {
            self.merge_remote_update(ticket);
        }
        self.notify(StoreChange::Loaded {
            tickets: self.tickets.len(),
        });
    }

    // ── Optimistic mutations ────────────────────────────────────────

    pub fn apply_optimistic_move(
        &mut self,
        ticket_id: TicketId,
        to: &ColumnId,
    ) -> Result<MutationToken, StoreError> {
        self.apply_optimistic_move_at(ticket_id, to, Utc::now())
    }

    /// Move a ticket to the top of `to` ahead of server confirmation.
    pub fn apply_optimistic_move_at(
        &mut self,
        ticket_id: TicketId,
        to: &ColumnId,
        now: DateTime<Utc>,
    ) -> Result<MutationToken, StoreError> {
        if !self.board.has_column(to) {
            return Err(StoreError::UnknownColumn {
                column: to.to_string(),
            });
        }
        let snapshot = self.begin_mutation(ticket_id)?;
        let rank = self.top_rank(ticket_id, to)?;
        let token = self.issue_token();

        if let Some(entry) = self.tickets.get_mut(&ticket_id) {
            if entry.ticket.column != *to {
                entry.ticket.column_entered_at = Some(now);
            }
            entry.ticket.column = to.clone();
            entry.ticket.rank = rank;
        }
        self.pending.insert(
            ticket_id,
            PendingMutation {
                ticket_id,
                token,
                kind: MutationKind::Move { to: to.clone() },
                snapshot,
                issued_at: now,
            },
        );
        tracing::debug!(ticket_id, column = %to, "Optimistic move applied");
        self.notify(StoreChange::TicketUpdated {
            id: ticket_id,
            origin: ChangeOrigin::Optimistic,
        });
        Ok(token)
    }

    pub fn apply_optimistic_edit(
        &mut self,
        ticket_id: TicketId,
        patch: &TicketPatch,
    ) -> Result<MutationToken, StoreError> {
        self.apply_optimistic_edit_at(ticket_id, patch, Utc::now())
    }

    pub fn apply_optimistic_edit_at(
        &mut self,
        ticket_id: TicketId,
        patch: &TicketPatch,
        now: DateTime<Utc>,
    ) -> Result<MutationToken, StoreError> {
        let snapshot = self.begin_mutation(ticket_id)?;
        let token = self.issue_token();
        if let Some(entry) = self.tickets.get_mut(&ticket_id) {
            entry.ticket.apply_patch(patch);
        }
        self.pending.insert(
            ticket_id,
            PendingMutation {
                ticket_id,
                token,
                kind: MutationKind::Edit {
                    patch: patch.clone(),
                },
                snapshot,
                issued_at: now,
            },
        );
        tracing::debug!(ticket_id, "Optimistic edit applied");
        self.notify(StoreChange::TicketUpdated {
            id: ticket_id,
            origin: ChangeOrigin::Optimistic,
        });
        Ok(token)
    }

    fn issue_token(&mut self) -> MutationToken {
        let token = MutationToken(self.next_token);
        self.next_token += 1;
        token
    }

    /// Check the ticket can take a new mutation and snapshot it.
    fn begin_mutation(&self, ticket_id: TicketId) -> Result<Ticket, StoreError> {
        let entry = self
            .tickets
            .get(&ticket_id)
            .ok_or(StoreError::TicketNotFound { id: ticket_id })?;
        if self.pending.contains_key(&ticket_id) {
            return Err(StoreError::MutationInFlight { ticket_id });
        }
        Ok(entry.ticket.clone())
    }

    /// A rank ahead of every other ticket in `column`.
    fn top_rank(&self, ticket_id: TicketId, column: &ColumnId) -> Result<Rank, StoreError> {
        let others: Vec<&Ticket> = self
            .column_tickets(column)
            .into_iter()
            .filter(|t| t.id != ticket_id)
            .collect();
        let (Some(first), Some(last)) = (others.first(), others.last()) else {
            return Ok(Rank::first());
        };
        match Rank::before(&first.rank) {
            Ok(rank) => Ok(rank),
            Err(RankError::NoRoomBefore(_)) => {
                tracing::warn!(
                    ticket_id,
                    column = %column,
                    "No rank room above the first ticket; placing at the bottom"
                );
                Ok(Rank::after(&last.rank))
            }
            Err(source) => {
                tracing::error!(ticket_id, column = %column, error = %source, "Rank computation failed");
                Err(StoreError::Rank { ticket_id, source })
            }
        }
    }

    // ── Resolution ──────────────────────────────────────────────────

    /// The server accepted the mutation; adopt its record verbatim.
    ///
    /// Without a pending mutation (already resolved by a newer remote
    /// update) the record is adopted only if it is not older than the
    /// stored one. A newer mutation pending under another token is left
    /// untouched.
    pub fn confirm_mutation(
        &mut self,
        ticket_id: TicketId,
        token: MutationToken,
        server_ticket: Ticket,
    ) -> Result<(), StoreError> {
        if !self.tickets.contains_key(&ticket_id) {
            return Err(StoreError::TicketNotFound { id: ticket_id });
        }
        let had_pending = match self.pending.get(&ticket_id) {
            Some(pending) if pending.token != token => {
                tracing::debug!(ticket_id, "Confirmation for a superseded mutation; ignored");
                return Ok(());
            }
            Some(_) => self.pending.remove(&ticket_id).is_some(),
            None => false,
        };
        let entry = self
            .tickets
            .get_mut(&ticket_id)
            .ok_or(StoreError::TicketNotFound { id: ticket_id })?;

        if !had_pending && server_ticket.updated_at < entry.ticket.updated_at {
            tracing::debug!(ticket_id, "Late confirmation older than stored record; ignored");
            return Ok(());
        }
        entry.ticket = server_ticket;
        self.notify(StoreChange::TicketUpdated {
            id: ticket_id,
            origin: ChangeOrigin::Confirmed,
        });
        Ok(())
    }

    /// Restore the pre-mutation snapshot. Returns `false` when the mutation
    /// named by `token` is no longer pending, so repeated calls are harmless.
    pub fn rollback_mutation(&mut self, ticket_id: TicketId, token: MutationToken) -> bool {
        if self.pending.get(&ticket_id).map(|p| p.token) != Some(token) {
            return false;
        }
        let Some(pending) = self.pending.remove(&ticket_id) else {
            return false;
        };
        let Some(entry) = self.tickets.get_mut(&ticket_id) else {
            return false;
        };
        let snapshot = pending.snapshot;
        match pending.kind {
            MutationKind::Move { .. } => {
                entry.ticket.column = snapshot.column;
                entry.ticket.rank = snapshot.rank;
                entry.ticket.column_entered_at = snapshot.column_entered_at;
            }
            MutationKind::Edit { .. } => {
                entry.ticket.title = snapshot.title;
                entry.ticket.description = snapshot.description;
                entry.ticket.assignee = snapshot.assignee;
            }
        }
        tracing::info!(ticket_id, "Optimistic mutation rolled back");
        self.notify(StoreChange::TicketUpdated {
            id: ticket_id,
            origin: ChangeOrigin::RolledBack,
        });
        true
    }

    /// Roll back every mutation pending for at least `timeout`.
    pub fn expire_pending(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<TicketId> {
        let mut expired: Vec<(TicketId, MutationToken)> = self
            .pending
            .values()
            .filter(|p| {
                (now - p.issued_at)
                    .to_std()
                    .map(|age| age >= timeout)
                    .unwrap_or(false)
            })
            .map(|p| (p.ticket_id, p.token))
            .collect();
        expired.sort_by_key(|(id, _)| *id);
        for (id, token) in &expired {
            tracing::warn!(ticket_id = id, "Pending mutation timed out");
            self.rollback_mutation(*id, *token);
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }

    // ── Remote events ───────────────────────────────────────────────

    pub fn merge_remote_update(&mut self, ticket: Ticket) -> MergeOutcome {
        let id = ticket.id;
        self.warn_unknown_column(&ticket);

        let outcome = if let Some(pending) = self.pending.get(&id) {
            if ticket.updated_at <= pending.issued_at {
                tracing::debug!(ticket_id = id, "Remote update older than pending mutation; ignored");
                return MergeOutcome::IgnoredStale;
            }
            self.pending.remove(&id);
            MergeOutcome::ResolvedPending
        } else {
            match self.tickets.get(&id) {
                Some(entry) if ticket.updated_at < entry.ticket.updated_at => {
                    tracing::debug!(ticket_id = id, "Out-of-order remote update; ignored");
                    return MergeOutcome::IgnoredStale;
                }
                Some(_) => MergeOutcome::Applied,
                None => MergeOutcome::Inserted,
            }
        };

        match self.tickets.get_mut(&id) {
            Some(entry) => entry.ticket = ticket,
            None => self.insert_entry(ticket),
        }
        self.notify(StoreChange::TicketUpdated {
            id,
            origin: ChangeOrigin::Remote,
        });
        outcome
    }

    pub fn merge_remote_delete(&mut self, ticket_id: TicketId) -> bool {
        self.pending.remove(&ticket_id);
        if self.tickets.remove(&ticket_id).is_none() {
            return false;
        }
        self.notify(StoreChange::TicketRemoved { id: ticket_id });
        if self.selection == Some(ticket_id) {
            self.selection = None;
            self.notify(StoreChange::SelectionChanged { selected: None });
        }
        true
    }

    // ── Selection ───────────────────────────────────────────────────

    pub fn select(&mut self, ticket_id: TicketId) -> Result<(), StoreError> {
        if !self.tickets.contains_key(&ticket_id) {
            return Err(StoreError::TicketNotFound { id: ticket_id });
        }
        self.selection = Some(ticket_id);
        self.notify(StoreChange::SelectionChanged {
            selected: Some(ticket_id),
        });
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        if self.selection.take().is_some() {
            self.notify(StoreChange::SelectionChanged { selected: None });
        }
    }

    pub fn selection(&self) -> Option<TicketId> {
        self.selection
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn ticket(&self, id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&id).map(|e| &e.ticket)
    }

    pub fn tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values().map(|e| &e.ticket)
    }

    /// Tickets in `column`, ordered by rank then insertion.
    pub fn column_tickets(&self, column: &ColumnId) -> Vec<&Ticket> {
        let mut entries: Vec<&Entry> = self
            .tickets
            .values()
            .filter(|e| &e.ticket.column == column)
            .collect();
        entries.sort_by(|a, b| a.ticket.rank.compare(&b.ticket.rank).then(a.seq.cmp(&b.seq)));
        entries.into_iter().map(|e| &e.ticket).collect()
    }

    pub fn pending(&self, id: TicketId) -> Option<&PendingMutation> {
        self.pending.get(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn known_columns(&self) -> impl Iterator<Item = &ColumnId> {
        self.board.column_ids()
    }

    pub fn is_known_column(&self, column: &ColumnId) -> bool {
        self.board.has_column(column)
    }

    pub fn time_in_column(&self, id: TicketId, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.ticket(id).map(|t| t.time_in_column(now))
    }
}

/// Shared handle to the store.
///
/// Wraps [`BoardStore`] in `Arc<Mutex>`. Store methods never block or await,
/// so locking from async code is fine as long as the guard is dropped before
/// the next `.await`.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<BoardStore>>,
}

impl StoreHandle {
    pub fn new(store: BoardStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, BoardStore>, StoreError> {
        self.inner.lock().map_err(|e| {
            tracing::error!(error = %e, "Store lock poisoned");
            StoreError::LockPoisoned
        })
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<StoreChange>, StoreError> {
        Ok(self.lock()?.subscribe())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use boardsync_common::ColumnMap;

    pub(crate) fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    pub(crate) fn ticket(id: TicketId, column: &str, rank: &str) -> Ticket {
        Ticket {
            id,
            board_id: 1,
            title: format!("Ticket {}", id),
            description: String::new(),
            assignee: None,
            rank: rank.parse().unwrap(),
            column: ColumnId::from(column),
            created_at: at("2024-01-01T00:00:00Z"),
            updated_at: at("2024-01-01T00:00:00Z"),
            column_entered_at: None,
        }
    }

    pub(crate) fn store_with(tickets: Vec<Ticket>) -> BoardStore {
        let map = ColumnMap::standard().unwrap();
        let board = Board::from_column_map(1, "Team", &map);
        let mut store = BoardStore::new(board.clone());
        store.load(board, tickets);
        store
    }

    fn col(s: &str) -> ColumnId {
        ColumnId::from(s)
    }

    #[test]
    fn test_column_tickets_sorted_by_rank_then_insertion() {
        let store = store_with(vec![
            ticket(1, "not_started", "2"),
            ticket(2, "not_started", "1"),
            ticket(3, "not_started", "2.0"),
            ticket(4, "done", "1"),
        ]);
        let ids: Vec<TicketId> = store
            .column_tickets(&col("not_started"))
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_move_places_ticket_at_top_of_target() {
        let mut store = store_with(vec![ticket(1, "not_started", "1"), ticket(2, "done", "3")]);
        store.apply_optimistic_move(1, &col("done")).unwrap();

        let t = store.ticket(1).unwrap();
        assert_eq!(t.column, col("done"));
        assert_eq!(t.rank.to_string(), "1");
        assert!(t.column_entered_at.is_some());
        let ids: Vec<TicketId> = store.column_tickets(&col("done")).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(store.pending(1).is_some());
    }

    #[test]
    fn test_move_into_empty_column_gets_first_rank() {
        let mut store = store_with(vec![ticket(1, "not_started", "7")]);
        store.apply_optimistic_move(1, &col("blocked")).unwrap();
        assert_eq!(store.ticket(1).unwrap().rank, Rank::first());
    }

    #[test]
    fn test_move_rejects_unknown_column_without_side_effects() {
        let mut store = store_with(vec![ticket(1, "not_started", "1")]);
        let err = store.apply_optimistic_move(1, &col("someday")).unwrap_err();
        assert_eq!(
            err,
            StoreError::UnknownColumn {
                column: "someday".to_string()
            }
        );
        assert_eq!(store.ticket(1).unwrap().column, col("not_started"));
        assert!(store.pending(1).is_none());
    }

    #[test]
    fn test_second_mutation_while_pending_is_rejected() {
        let mut store = store_with(vec![ticket(1, "not_started", "1")]);
        store.apply_optimistic_move(1, &col("done")).unwrap();
        assert_eq!(
            store.apply_optimistic_move(1, &col("blocked")),
            Err(StoreError::MutationInFlight { ticket_id: 1 })
        );
        assert_eq!(
            store.apply_optimistic_edit(1, &TicketPatch::default()),
            Err(StoreError::MutationInFlight { ticket_id: 1 })
        );
    }

    #[test]
    fn test_move_missing_ticket() {
        let mut store = store_with(vec![]);
        assert_eq!(
            store.apply_optimistic_move(5, &col("done")),
            Err(StoreError::TicketNotFound { id: 5 })
        );
    }

    #[test]
    fn test_rollback_restores_column_and_rank_and_is_idempotent() {
        let mut store = store_with(vec![ticket(1, "in_progress", "4.2"), ticket(2, "done", "1")]);
        let before = store.ticket(1).unwrap().clone();

        let token = store.apply_optimistic_move(1, &col("done")).unwrap();
        assert!(store.rollback_mutation(1, token));
        assert_eq!(store.ticket(1).unwrap(), &before);
        assert!(!store.rollback_mutation(1, token));
        assert_eq!(store.ticket(1).unwrap(), &before);
    }

    #[test]
    fn test_rollback_of_edit_keeps_concurrent_column_change() {
        let mut store = store_with(vec![ticket(1, "in_progress", "1")]);
        let patch = TicketPatch {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        let token = store
            .apply_optimistic_edit_at(1, &patch, at("2024-01-05T00:00:00Z"))
            .unwrap();
        assert_eq!(store.ticket(1).unwrap().title, "Renamed");

        // An unrelated field changes underneath (simulated direct change).
        store.tickets.get_mut(&1).unwrap().ticket.column = col("blocked");

        assert!(store.rollback_mutation(1, token));
        let t = store.ticket(1).unwrap();
        assert_eq!(t.title, "Ticket 1");
        assert_eq!(t.column, col("blocked"));
    }

    #[test]
    fn test_confirm_adopts_server_record_verbatim() {
        let mut store = store_with(vec![ticket(1, "not_started", "1")]);
        let token = store.apply_optimistic_move(1, &col("done")).unwrap();

        let mut server = ticket(1, "done", "9.3");
        server.updated_at = at("2024-02-01T00:00:00Z");
        store.confirm_mutation(1, token, server.clone()).unwrap();

        assert_eq!(store.ticket(1).unwrap(), &server);
        assert!(store.pending(1).is_none());
        assert!(!store.rollback_mutation(1, token));
    }

    #[test]
    fn test_confirm_for_missing_ticket_errors() {
        let mut store = store_with(vec![ticket(1, "not_started", "1")]);
        let token = store.apply_optimistic_move(1, &col("done")).unwrap();
        assert_eq!(
            store.confirm_mutation(3, token, ticket(3, "done", "1")),
            Err(StoreError::TicketNotFound { id: 3 })
        );
    }

    #[test]
    fn test_stale_remote_update_does_not_undo_optimistic_move() {
        let mut store = store_with(vec![ticket(1, "not_started", "1")]);
        let t0 = at("2024-03-01T12:00:00Z");
        store.apply_optimistic_move_at(1, &col("done"), t0).unwrap();

        let mut stale = ticket(1, "blocked", "1");
        stale.updated_at = at("2024-03-01T11:59:00Z");
        assert_eq!(store.merge_remote_update(stale), MergeOutcome::IgnoredStale);

        assert_eq!(store.ticket(1).unwrap().column, col("done"));
        assert!(store.pending(1).is_some());
    }

    #[test]
    fn test_newer_remote_update_resolves_pending() {
        let mut store = store_with(vec![ticket(1, "not_started", "1")]);
        let t0 = at("2024-03-01T12:00:00Z");
        let token = store.apply_optimistic_move_at(1, &col("done"), t0).unwrap();

        let mut newer = ticket(1, "blocked", "2");
        newer.updated_at = at("2024-03-01T12:00:05Z");
        assert_eq!(store.merge_remote_update(newer), MergeOutcome::ResolvedPending);
        assert_eq!(store.ticket(1).unwrap().column, col("blocked"));
        assert!(store.pending(1).is_none());
        assert!(!store.rollback_mutation(1, token));
        assert_eq!(store.ticket(1).unwrap().column, col("blocked"));
    }

    #[test]
    fn test_late_failure_of_resolved_move_keeps_newer_move() {
        let mut store = store_with(vec![ticket(1, "not_started", "1")]);
        let first = store
            .apply_optimistic_move_at(1, &col("done"), at("2024-03-01T12:00:00Z"))
            .unwrap();

        // The live channel confirms the first move before its REST reply lands.
        let mut echoed = ticket(1, "done", "1");
        echoed.updated_at = at("2024-03-01T12:00:01Z");
        assert_eq!(store.merge_remote_update(echoed), MergeOutcome::ResolvedPending);

        let second = store
            .apply_optimistic_move_at(1, &col("blocked"), at("2024-03-01T12:00:02Z"))
            .unwrap();
        assert_ne!(first, second);

        assert!(!store.rollback_mutation(1, first));
        assert_eq!(store.ticket(1).unwrap().column, col("blocked"));
        assert_eq!(store.pending(1).map(|p| p.token), Some(second));

        // A late success for the first move must not overwrite the second either.
        let mut late = ticket(1, "done", "1");
        late.updated_at = at("2024-03-01T12:00:03Z");
        store.confirm_mutation(1, first, late).unwrap();
        assert_eq!(store.ticket(1).unwrap().column, col("blocked"));
        assert_eq!(store.pending(1).map(|p| p.token), Some(second));

        assert!(store.rollback_mutation(1, second));
        assert_eq!(store.ticket(1).unwrap().column, col("done"));
    }

    #[test]
    fn test_out_of_order_remote_updates_without_pending() {
        let mut newer = ticket(1, "done", "1");
        newer.updated_at = at("2024-04-02T00:00:00Z");
        let mut store = store_with(vec![newer]);

        let mut older = ticket(1, "blocked", "1");
        older.updated_at = at("2024-04-01T00:00:00Z");
        assert_eq!(store.merge_remote_update(older), MergeOutcome::IgnoredStale);
        assert_eq!(store.ticket(1).unwrap().column, col("done"));

        assert_eq!(
            store.merge_remote_update(ticket(9, "blocked", "1")),
            MergeOutcome::Inserted
        );
        assert_eq!(store.column_tickets(&col("blocked")).len(), 1);
    }

    #[test]
    fn test_remote_update_does_not_disturb_other_pending_ticket() {
        let mut store = store_with(vec![ticket(1, "not_started", "1"), ticket(2, "not_started", "2")]);
        let token = store.apply_optimistic_move(1, &col("done")).unwrap();

        let mut other = ticket(2, "in_review", "1");
        other.updated_at = at("2030-01-01T00:00:00Z");
        assert_eq!(store.merge_remote_update(other), MergeOutcome::Applied);

        assert!(store.rollback_mutation(1, token));
        assert_eq!(store.ticket(1).unwrap().column, col("not_started"));
        assert_eq!(store.ticket(2).unwrap().column, col("in_review"));
    }

    #[test]
    fn test_remote_delete_clears_selection_and_pending() {
        let mut store = store_with(vec![ticket(1, "not_started", "1")]);
        store.select(1).unwrap();
        store.apply_optimistic_move(1, &col("done")).unwrap();
        let mut rx = store.subscribe();

        assert!(store.merge_remote_delete(1));
        assert!(store.ticket(1).is_none());
        assert!(store.pending(1).is_none());
        assert_eq!(store.selection(), None);
        assert_eq!(rx.try_recv().unwrap(), StoreChange::TicketRemoved { id: 1 });
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreChange::SelectionChanged { selected: None }
        );
        assert!(!store.merge_remote_delete(1));
    }

    #[test]
    fn test_expire_pending_rolls_back_old_mutations() {
        let mut store = store_with(vec![ticket(1, "not_started", "1"), ticket(2, "not_started", "2")]);
        store
            .apply_optimistic_move_at(1, &col("done"), at("2024-05-01T00:00:00Z"))
            .unwrap();
        store
            .apply_optimistic_move_at(2, &col("done"), at("2024-05-01T00:00:08Z"))
            .unwrap();

        let expired = store.expire_pending(at("2024-05-01T00:00:10Z"), Duration::from_secs(10));
        assert_eq!(expired, vec![1]);
        assert_eq!(store.ticket(1).unwrap().column, col("not_started"));
        assert_eq!(store.ticket(2).unwrap().column, col("done"));
    }

    #[test]
    fn test_reconcile_removes_missing_and_keeps_pending() {
        let mut store = store_with(vec![
            ticket(1, "not_started", "1"),
            ticket(2, "not_started", "2"),
            ticket(3, "not_started", "3"),
        ]);
        store
            .apply_optimistic_move_at(3, &col("done"), at("2024-06-01T00:00:00Z"))
            .unwrap();

        let mut moved = ticket(1, "blocked", "1");
        moved.updated_at = at("2024-06-01T00:00:00Z");
        store.reconcile(vec![moved]);

        assert_eq!(store.ticket(1).unwrap().column, col("blocked"));
        assert!(store.ticket(2).is_none());
        assert_eq!(store.ticket(3).unwrap().column, col("done"));
    }

    #[test]
    fn test_changes_are_broadcast_after_update() {
        let mut store = store_with(vec![ticket(1, "not_started", "1")]);
        let mut rx = store.subscribe();
        let token = store.apply_optimistic_move(1, &col("done")).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreChange::TicketUpdated {
                id: 1,
                origin: ChangeOrigin::Optimistic
            }
        );
        store.rollback_mutation(1, token);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreChange::TicketUpdated {
                id: 1,
                origin: ChangeOrigin::RolledBack
            }
        );
    }

    #[test]
    fn test_select_unknown_ticket_errors() {
        let mut store = store_with(vec![]);
        assert_eq!(store.select(4), Err(StoreError::TicketNotFound { id: 4 }));
    }

    #[test]
    fn test_handle_lock_and_subscribe() {
        let handle = StoreHandle::new(store_with(vec![ticket(1, "done", "1")]));
        let _rx = handle.subscribe().unwrap();
        assert_eq!(handle.lock().unwrap().ticket(1).unwrap().id, 1);
        let now = at("2024-01-01T01:00:00Z");
        assert_eq!(
            handle.lock().unwrap().time_in_column(1, now),
            Some(chrono::Duration::hours(1))
        );
    }
}
