//! Drives a resolved drop or edit through the store and the backend.
//!
//! The controller is the only place mutations meet the network: it applies
//! the optimistic change under the store lock, releases the lock, awaits the
//! REST call bounded by the mutation timeout, then confirms or rolls back.
//! A failed request raises a notice with a retry action and is never sent
//! again on its own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use boardsync_common::{ColumnId, Ticket, TicketId, TicketPatch};
use tokio::time::Instant;

use super::api::BoardApi;
use super::drag::{CancelReason, DragEnd, DropResolution, DropTarget, resolve_drop};
use super::notice::{NoticeBoard, RetryAction};
use super::store::{MutationToken, StoreHandle};
use crate::errors::{ApiError, BoardError};

#[derive(Debug, Clone, PartialEq)]
pub enum DragOutcome {
    Moved(Ticket),
    NoOp,
    Cancelled(CancelReason),
}

pub struct DragController<A: BoardApi> {
    store: StoreHandle,
    api: Arc<A>,
    notices: Arc<Mutex<NoticeBoard>>,
    mutation_timeout: Duration,
}

impl<A: BoardApi> DragController<A> {
    pub fn new(
        store: StoreHandle,
        api: Arc<A>,
        notices: Arc<Mutex<NoticeBoard>>,
        mutation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            api,
            notices,
            mutation_timeout,
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn notices(&self) -> &Arc<Mutex<NoticeBoard>> {
        &self.notices
    }

    /// Resolve a finished drag and, if it names a move, carry it out.
    pub async fn handle_drag_end(&self, drag: DragEnd) -> Result<DragOutcome, BoardError> {
        let resolution = {
            let store = self.store.lock()?;
            resolve_drop(&drag, &*store)?
        };

        match resolution {
            DropResolution::Cancelled(reason) => Ok(DragOutcome::Cancelled(reason)),
            DropResolution::NoOp { ticket_id, column } => {
                tracing::debug!(ticket_id, column = %column, "Drop onto current column");
                Ok(DragOutcome::NoOp)
            }
            DropResolution::Move { ticket_id, from, to } => {
                tracing::info!(ticket_id, from = %from, to = %to, "Moving ticket");
                self.run_move(ticket_id, to).await.map(DragOutcome::Moved)
            }
        }
    }

    /// Move a ticket as if it had been dropped on the column itself.
    pub async fn move_to_column(
        &self,
        ticket_id: TicketId,
        column: &ColumnId,
    ) -> Result<DragOutcome, BoardError> {
        if !self.store.lock()?.is_known_column(column) {
            return Err(BoardError::Validation(format!(
                "column '{}' is not on this board",
                column
            )));
        }
        self.handle_drag_end(DragEnd {
            active: ticket_id,
            over: Some(DropTarget::column(column)),
            collisions: Vec::new(),
        })
        .await
    }

    pub async fn submit_edit(
        &self,
        ticket_id: TicketId,
        patch: TicketPatch,
    ) -> Result<Ticket, BoardError> {
        let token = self.store.lock()?.apply_optimistic_edit(ticket_id, &patch)?;

        let result = self
            .bounded(self.api.update_ticket(ticket_id, &patch))
            .await;
        self.settle(ticket_id, token, result, || RetryAction::Edit {
            ticket_id,
            patch: patch.clone(),
        })
    }

    /// Run the action attached to a notice.
    pub async fn retry(&self, action: RetryAction) -> Result<Option<Ticket>, BoardError> {
        match action {
            RetryAction::Move { ticket_id, column } => {
                match self.move_to_column(ticket_id, &column).await? {
                    DragOutcome::Moved(ticket) => Ok(Some(ticket)),
                    DragOutcome::NoOp | DragOutcome::Cancelled(_) => Ok(None),
                }
            }
            RetryAction::Edit { ticket_id, patch } => {
                self.submit_edit(ticket_id, patch).await.map(Some)
            }
            // Reconnects go through the connection handle, not the controller.
            RetryAction::Reconnect => Ok(None),
        }
    }

    async fn run_move(&self, ticket_id: TicketId, to: ColumnId) -> Result<Ticket, BoardError> {
        let token = self.store.lock()?.apply_optimistic_move(ticket_id, &to)?;

        let result = self.bounded(self.api.move_ticket(ticket_id, &to)).await;
        self.settle(ticket_id, token, result, || RetryAction::Move {
            ticket_id,
            column: to.clone(),
        })
    }

    async fn bounded<F>(&self, request: F) -> Result<Ticket, ApiError>
    where
        F: std::future::Future<Output = Result<Ticket, ApiError>>,
    {
        match tokio::time::timeout(self.mutation_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout {
                seconds: self.mutation_timeout.as_secs(),
            }),
        }
    }

    /// Confirm on success; on failure roll back and raise a retry notice.
    /// Both act only on the mutation `token` names.
    fn settle(
        &self,
        ticket_id: TicketId,
        token: MutationToken,
        result: Result<Ticket, ApiError>,
        retry: impl FnOnce() -> RetryAction,
    ) -> Result<Ticket, BoardError> {
        match result {
            Ok(server_ticket) => {
                self.store
                    .lock()?
                    .confirm_mutation(ticket_id, token, server_ticket.clone())?;
                Ok(server_ticket)
            }
            Err(e) => {
                tracing::warn!(ticket_id, error = %e, "Mutation failed; rolling back");
                // Already settled by a live update or the sweeper: nothing to undo or report.
                if self.store.lock()?.rollback_mutation(ticket_id, token) {
                    self.raise_notice(format!("Could not save ticket {}: {}", ticket_id, e), retry());
                }
                Err(BoardError::TransientNetwork(e))
            }
        }
    }

    fn raise_notice(&self, message: String, retry: RetryAction) {
        match self.notices.lock() {
            Ok(mut notices) => {
                notices.push(message, Some(retry), Instant::now());
            }
            Err(e) => tracing::error!(error = %e, "Notice board lock poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::drag::CollisionCandidate;
    use crate::board::store::tests::{store_with, ticket};
    use async_trait::async_trait;
    use boardsync_common::BoardId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Behaviour {
        Succeed,
        Fail,
        Hang,
    }

    struct MockApi {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl MockApi {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn respond(&self, ticket: Ticket) -> Result<Ticket, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => Ok(ticket),
                Behaviour::Fail => Err(ApiError::Status {
                    status: 500,
                    message: "boom".to_string(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ticket)
                }
            }
        }
    }

    #[async_trait]
    impl BoardApi for MockApi {
        async fn move_ticket(&self, ticket_id: TicketId, column: &ColumnId) -> Result<Ticket, ApiError> {
            let mut t = ticket(ticket_id, column.as_str(), "5");
            t.updated_at = "2030-01-01T00:00:00Z".parse().unwrap();
            self.respond(t).await
        }

        async fn update_ticket(&self, ticket_id: TicketId, patch: &TicketPatch) -> Result<Ticket, ApiError> {
            let mut t = ticket(ticket_id, "not_started", "1");
            t.apply_patch(patch);
            self.respond(t).await
        }

        async fn list_tickets(&self, _board_id: BoardId) -> Result<Vec<Ticket>, ApiError> {
            Ok(Vec::new())
        }
    }

    fn controller(api: Arc<MockApi>, tickets: Vec<Ticket>) -> DragController<MockApi> {
        DragController::new(
            StoreHandle::new(store_with(tickets)),
            api,
            Arc::new(Mutex::new(NoticeBoard::new(Duration::from_secs(5)))),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_successful_move_confirms_server_record() {
        let api = MockApi::new(Behaviour::Succeed);
        let ctl = controller(api.clone(), vec![ticket(1, "not_started", "1")]);

        let outcome = ctl
            .move_to_column(1, &ColumnId::from("done"))
            .await
            .unwrap();
        match outcome {
            DragOutcome::Moved(t) => assert_eq!(t.rank.to_string(), "5"),
            other => panic!("Expected Moved, got {:?}", other),
        }
        let store = ctl.store().lock().unwrap();
        assert_eq!(store.ticket(1).unwrap().column.as_str(), "done");
        assert!(store.pending(1).is_none());
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn test_drop_on_self_resolves_through_collisions() {
        let api = MockApi::new(Behaviour::Succeed);
        let ctl = controller(api.clone(), vec![ticket(1, "not_started", "1")]);
        let drag = DragEnd {
            active: 1,
            over: Some(DropTarget::ticket(1)),
            collisions: vec![
                CollisionCandidate::new("not_started"),
                CollisionCandidate::new("in_progress"),
            ],
        };
        ctl.handle_drag_end(drag).await.unwrap();
        assert_eq!(
            ctl.store().lock().unwrap().ticket(1).unwrap().column.as_str(),
            "in_progress"
        );
    }

    #[tokio::test]
    async fn test_corrupted_target_aborts_without_request() {
        let api = MockApi::new(Behaviour::Succeed);
        let ctl = controller(
            api.clone(),
            vec![ticket(1, "not_started", "1"), ticket(2, "corrupted_value", "1")],
        );
        let drag = DragEnd {
            active: 1,
            over: Some(DropTarget::ticket(2)),
            collisions: Vec::new(),
        };
        let err = ctl.handle_drag_end(drag).await.unwrap_err();
        assert!(matches!(err, BoardError::CorruptionGuardTripped { ticket_id: 2, .. }));
        assert_eq!(api.calls(), 0);
        let store = ctl.store().lock().unwrap();
        assert_eq!(store.ticket(1).unwrap().column.as_str(), "not_started");
        assert!(store.pending(1).is_none());
    }

    #[tokio::test]
    async fn test_failed_move_rolls_back_and_offers_retry() {
        let api = MockApi::new(Behaviour::Fail);
        let ctl = controller(api.clone(), vec![ticket(1, "blocked", "2")]);

        let err = ctl
            .move_to_column(1, &ColumnId::from("done"))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::TransientNetwork(_)));
        assert_eq!(api.calls(), 1);
        {
            let store = ctl.store().lock().unwrap();
            let t = store.ticket(1).unwrap();
            assert_eq!(t.column.as_str(), "blocked");
            assert_eq!(t.rank.to_string(), "2");
        }

        let notices = ctl.notices().lock().unwrap();
        let active = notices.active(Instant::now());
        assert_eq!(active.len(), 1);
        assert_eq!(
            active[0].retry,
            Some(RetryAction::Move {
                ticket_id: 1,
                column: ColumnId::from("done"),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_request_times_out_and_rolls_back() {
        let api = MockApi::new(Behaviour::Hang);
        let ctl = controller(api.clone(), vec![ticket(1, "not_started", "1")]);

        let err = ctl
            .move_to_column(1, &ColumnId::from("done"))
            .await
            .unwrap_err();
        match err {
            BoardError::TransientNetwork(ApiError::Timeout { seconds }) => assert_eq!(seconds, 10),
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert_eq!(
            ctl.store().lock().unwrap().ticket(1).unwrap().column.as_str(),
            "not_started"
        );
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn test_noop_and_cancel_issue_no_request() {
        let api = MockApi::new(Behaviour::Succeed);
        let ctl = controller(api.clone(), vec![ticket(1, "done", "1")]);

        assert_eq!(
            ctl.move_to_column(1, &ColumnId::from("done")).await.unwrap(),
            DragOutcome::NoOp
        );
        let drag = DragEnd {
            active: 1,
            over: None,
            collisions: Vec::new(),
        };
        assert_eq!(
            ctl.handle_drag_end(drag).await.unwrap(),
            DragOutcome::Cancelled(CancelReason::NoTarget)
        );
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_column_is_validation_error() {
        let api = MockApi::new(Behaviour::Succeed);
        let ctl = controller(api.clone(), vec![ticket(1, "done", "1")]);
        let err = ctl
            .move_to_column(1, &ColumnId::from("someday"))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
        assert!(!err.is_transient());
        assert_eq!(api.calls(), 0);
    }

    /// Delivers a newer live update for the ticket, then fails the request.
    struct OvertakenApi {
        store: StoreHandle,
    }

    #[async_trait]
    impl BoardApi for OvertakenApi {
        async fn move_ticket(&self, ticket_id: TicketId, _: &ColumnId) -> Result<Ticket, ApiError> {
            let mut live = ticket(ticket_id, "blocked", "3");
            live.updated_at = "2030-01-01T00:00:00Z".parse().unwrap();
            self.store.lock().unwrap().merge_remote_update(live);
            Err(ApiError::Status {
                status: 502,
                message: "bad gateway".to_string(),
            })
        }

        async fn update_ticket(&self, _: TicketId, _: &TicketPatch) -> Result<Ticket, ApiError> {
            Err(ApiError::Decode("unused".to_string()))
        }

        async fn list_tickets(&self, _: BoardId) -> Result<Vec<Ticket>, ApiError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failure_after_live_update_keeps_server_state() {
        let store = StoreHandle::new(store_with(vec![ticket(1, "not_started", "1")]));
        let ctl = DragController::new(
            store.clone(),
            Arc::new(OvertakenApi { store: store.clone() }),
            Arc::new(Mutex::new(NoticeBoard::new(Duration::from_secs(5)))),
            Duration::from_secs(10),
        );

        let err = ctl
            .move_to_column(1, &ColumnId::from("done"))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::TransientNetwork(_)));

        let store = store.lock().unwrap();
        assert_eq!(store.ticket(1).unwrap().column.as_str(), "blocked");
        assert!(store.pending(1).is_none());
        assert!(ctl.notices().lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_failure_rolls_back_fields_and_retry_succeeds_later() {
        let failing = MockApi::new(Behaviour::Fail);
        let ctl = controller(failing.clone(), vec![ticket(1, "not_started", "1")]);
        let patch = TicketPatch {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        assert!(ctl.submit_edit(1, patch.clone()).await.is_err());
        assert_eq!(ctl.store().lock().unwrap().ticket(1).unwrap().title, "Ticket 1");

        let action = {
            let notices = ctl.notices().lock().unwrap();
            notices.active(Instant::now())[0].retry.clone().unwrap()
        };
        assert_eq!(
            action,
            RetryAction::Edit {
                ticket_id: 1,
                patch: patch.clone(),
            }
        );

        let working = DragController::new(
            ctl.store().clone(),
            MockApi::new(Behaviour::Succeed),
            ctl.notices().clone(),
            Duration::from_secs(10),
        );
        let ticket = working.retry(action).await.unwrap().unwrap();
        assert_eq!(ticket.title, "Renamed");
        assert_eq!(working.store().lock().unwrap().ticket(1).unwrap().title, "Renamed");
    }
}
