//! Runtime wiring for an open board.
//!
//! A [`Session`] loads the board over REST, starts the live channel and
//! keeps three background tasks running:
//! - the event pump, applying [`BoardEvent`]s to the store and resyncing
//!   after a reconnect
//! - the sweeper, rolling back mutations that outlived the timeout
//! - the connection watcher, raising a notice once retries run out

use std::sync::{Arc, Mutex};
use std::time::Duration;

use boardsync_common::{Board, BoardId, ColumnMap, Ticket};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::api::BoardApi;
use super::controller::DragController;
use super::notice::{NoticeBoard, RetryAction};
use super::store::{BoardStore, StoreHandle};
use super::supervisor::SupervisorConfig;
use super::ws::{BoardEvent, ConnectionHandle, ConnectionManager};
use crate::config::BoardsyncConfig;
use crate::errors::{BoardError, StoreError};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ws_url: String,
    pub board_id: BoardId,
    pub supervisor: SupervisorConfig,
    pub mutation_timeout: Duration,
    pub notice_ttl: Duration,
    pub sweep_interval: Duration,
    pub columns: ColumnMap,
}

impl SessionConfig {
    pub fn from_config(config: &BoardsyncConfig, columns: ColumnMap) -> Self {
        Self {
            ws_url: config.ws_url(),
            board_id: config.board_id(),
            supervisor: config.supervisor_config(),
            mutation_timeout: config.mutation_timeout(),
            notice_ttl: config.notice_ttl(),
            sweep_interval: config.sweep_interval(),
            columns,
        }
    }

    /// Age at which the sweeper rolls a mutation back. The controller times
    /// out its own requests first; the sweeper only catches abandoned ones.
    pub fn sweep_after(&self) -> Duration {
        self.mutation_timeout + self.sweep_interval
    }
}

pub struct Session<A: BoardApi + 'static> {
    store: StoreHandle,
    connection: ConnectionHandle,
    controller: Arc<DragController<A>>,
    notices: Arc<Mutex<NoticeBoard>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<A: BoardApi + 'static> Session<A> {
    pub async fn start(config: SessionConfig, api: Arc<A>) -> Result<Self, BoardError> {
        let board = Board::from_column_map(
            config.board_id,
            format!("Board {}", config.board_id),
            &config.columns,
        );
        let tickets = api.list_tickets(config.board_id).await?;
        tracing::info!(board_id = config.board_id, tickets = tickets.len(), "Board loaded");

        let notices = Arc::new(Mutex::new(NoticeBoard::new(config.notice_ttl)));
        if let Some(message) = column_drift(&config.columns, &tickets) {
            if let Ok(mut notices) = notices.lock() {
                notices.push(message, None, Instant::now());
            }
        }

        let mut store = BoardStore::new(board.clone());
        store.load(board, tickets);
        let store = StoreHandle::new(store);

        let (connection, events, socket_task) = ConnectionManager::spawn(
            config.ws_url.clone(),
            config.supervisor.clone(),
            config.columns.clone(),
        );

        let pump = tokio::spawn(pump_events(
            store.clone(),
            api.clone(),
            config.board_id,
            events,
        ));
        let sweeper = tokio::spawn(sweep_pending(
            store.clone(),
            notices.clone(),
            config.sweep_after(),
            config.sweep_interval,
        ));
        let watcher = tokio::spawn(watch_connection(connection.clone(), notices.clone()));

        let controller = Arc::new(DragController::new(
            store.clone(),
            api,
            notices.clone(),
            config.mutation_timeout,
        ));

        Ok(Self {
            store,
            connection,
            controller,
            notices,
            tasks: vec![socket_task, pump, sweeper, watcher],
        })
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn controller(&self) -> &Arc<DragController<A>> {
        &self.controller
    }

    pub fn notices(&self) -> &Arc<Mutex<NoticeBoard>> {
        &self.notices
    }

    /// Run the retry action a user picked from a notice.
    pub async fn retry(&self, action: RetryAction) -> Result<(), BoardError> {
        match action {
            RetryAction::Reconnect => self.connection.reconnect().await,
            other => self.controller.retry(other).await.map(|_| ()),
        }
    }

    pub async fn shutdown(self) {
        self.connection.shutdown().await;
        for task in self.tasks {
            task.abort();
        }
        tracing::debug!("Session stopped");
    }
}

/// Apply one data event to the store.
pub fn apply_event(store: &StoreHandle, event: BoardEvent) -> Result<(), StoreError> {
    let mut store = store.lock()?;
    match event {
        BoardEvent::TicketUpdated(ticket) => {
            let id = ticket.id;
            let outcome = store.merge_remote_update(ticket);
            tracing::debug!(ticket_id = id, ?outcome, "Remote update merged");
        }
        BoardEvent::TicketDeleted(id) => {
            store.merge_remote_delete(id);
        }
        BoardEvent::Reconnected => {}
    }
    Ok(())
}

/// Refetch the board after the live channel was down.
pub async fn resync<A: BoardApi + ?Sized>(
    store: &StoreHandle,
    api: &A,
    board_id: BoardId,
) -> Result<(), BoardError> {
    let tickets = api.list_tickets(board_id).await?;
    store.lock()?.reconcile(tickets);
    tracing::info!(board_id, "Board resynced after reconnect");
    Ok(())
}

async fn pump_events<A: BoardApi + 'static>(
    store: StoreHandle,
    api: Arc<A>,
    board_id: BoardId,
    mut events: mpsc::Receiver<BoardEvent>,
) {
    while let Some(event) = events.recv().await {
        if event == BoardEvent::Reconnected {
            if let Err(e) = resync(&store, api.as_ref(), board_id).await {
                tracing::warn!(error = %e, "Resync failed; continuing with live events");
            }
            continue;
        }
        if let Err(e) = apply_event(&store, event) {
            tracing::error!(error = %e, "Store unavailable; stopping event pump");
            break;
        }
    }
}

/// Report listed tickets whose column the map does not know.
///
/// Such tickets stay on the board (the drag resolver refuses them), so this
/// is loud but not fatal.
pub fn column_drift(columns: &ColumnMap, tickets: &[Ticket]) -> Option<String> {
    let err = columns
        .check_listed_columns(tickets.iter().map(|t| &t.column))
        .err()?;
    tracing::error!(error = %err, "Backend column set does not match the column map");
    Some(err.to_string())
}

async fn sweep_pending(
    store: StoreHandle,
    notices: Arc<Mutex<NoticeBoard>>,
    timeout: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let expired = match store.lock() {
            Ok(mut store) => store.expire_pending(Utc::now(), timeout),
            Err(_) => break,
        };
        let Ok(mut notices) = notices.lock() else {
            break;
        };
        let now = Instant::now();
        for id in expired {
            notices.push(format!("Saving ticket {} timed out", id), None, now);
        }
        notices.prune(now);
    }
}

async fn watch_connection(connection: ConnectionHandle, notices: Arc<Mutex<NoticeBoard>>) {
    let mut status = connection.watch_status();
    let mut reported = false;
    while status.changed().await.is_ok() {
        let exhausted = status.borrow_and_update().exhausted;
        if exhausted && !reported {
            if let Ok(mut notices) = notices.lock() {
                notices.push(
                    "Lost connection to the board server",
                    Some(RetryAction::Reconnect),
                    Instant::now(),
                );
            }
        }
        reported = exhausted;
    }
}
