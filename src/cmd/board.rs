//! Board commands: `boardsync watch`, `boardsync move`, `boardsync edit`.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use boardsync::board::session::column_drift;
use boardsync::board::{
    BoardApi, BoardStore, DragController, DragOutcome, HttpBoardApi, LinkState, NoticeBoard,
    Session, SessionConfig, StoreChange, StoreHandle,
};
use boardsync::config::BoardsyncConfig;
use boardsync_common::{Board, ColumnMap, Ticket, TicketId, TicketPatch};
use tokio::sync::broadcast;

fn print_ticket(ticket: &Ticket) {
    println!(
        "  #{:<5} {:<12} rank {:<8} {}",
        ticket.id,
        ticket.column.as_str(),
        ticket.rank.to_string(),
        ticket.title
    );
}

/// Load the board once over REST, without the live channel.
async fn open_store(
    config: &BoardsyncConfig,
    api: &HttpBoardApi,
    columns: &ColumnMap,
) -> Result<StoreHandle> {
    let board_id = config.board_id();
    let tickets = api
        .list_tickets(board_id)
        .await
        .with_context(|| format!("Failed to load board {} from {}", board_id, config.base_url()))?;
    if let Some(message) = column_drift(columns, &tickets) {
        eprintln!("Warning: {}", message);
    }
    let board = Board::from_column_map(board_id, format!("Board {}", board_id), columns);
    let mut store = BoardStore::new(board.clone());
    store.load(board, tickets);
    Ok(StoreHandle::new(store))
}

fn one_shot_controller(
    config: &BoardsyncConfig,
    store: StoreHandle,
    api: HttpBoardApi,
) -> DragController<HttpBoardApi> {
    DragController::new(
        store,
        Arc::new(api),
        Arc::new(Mutex::new(NoticeBoard::new(config.notice_ttl()))),
        config.mutation_timeout(),
    )
}

pub async fn cmd_move(config: &BoardsyncConfig, ticket_id: TicketId, column: &str) -> Result<()> {
    let columns = ColumnMap::standard()?;
    let target = columns
        .resolve_wire(column)
        .with_context(|| format!("'{}' is not a board column", column))?;

    let api = HttpBoardApi::new(config.base_url(), columns.clone());
    let store = open_store(config, &api, &columns).await?;
    let controller = one_shot_controller(config, store, api);

    match controller.move_to_column(ticket_id, &target).await? {
        DragOutcome::Moved(ticket) => {
            println!("Moved ticket {} to {}", ticket.id, columns.display_name(&ticket.column)?);
            print_ticket(&ticket);
        }
        DragOutcome::NoOp => println!("Ticket {} is already in {}", ticket_id, target),
        DragOutcome::Cancelled(reason) => println!("Move cancelled: {:?}", reason),
    }
    Ok(())
}

/// Build an edit patch from CLI flags.
pub fn edit_patch(
    title: Option<String>,
    description: Option<String>,
    assignee: Option<String>,
    unassign: bool,
) -> TicketPatch {
    TicketPatch {
        title,
        description,
        assignee: if unassign { Some(None) } else { assignee.map(Some) },
    }
}

pub async fn cmd_edit(config: &BoardsyncConfig, ticket_id: TicketId, patch: TicketPatch) -> Result<()> {
    if patch.is_empty() {
        anyhow::bail!("Nothing to change: pass --title, --description, --assignee or --unassign");
    }
    let columns = ColumnMap::standard()?;
    let api = HttpBoardApi::new(config.base_url(), columns.clone());
    let store = open_store(config, &api, &columns).await?;
    let controller = one_shot_controller(config, store, api);

    let ticket = controller.submit_edit(ticket_id, patch).await?;
    println!("Updated ticket {}", ticket.id);
    print_ticket(&ticket);
    Ok(())
}

fn print_board(store: &StoreHandle) -> Result<()> {
    let store = store.lock()?;
    println!();
    println!("{}", store.board().name);
    println!("{}", "=".repeat(store.board().name.len()));
    for column in &store.board().columns {
        let tickets = store.column_tickets(&column.id);
        println!();
        println!("{} ({})", column.name, tickets.len());
        for ticket in tickets {
            print_ticket(ticket);
        }
    }
    let stray: Vec<&Ticket> = store
        .tickets()
        .filter(|t| !store.is_known_column(&t.column))
        .collect();
    if !stray.is_empty() {
        println!();
        println!("Tickets in unknown columns ({})", stray.len());
        for ticket in stray {
            print_ticket(ticket);
        }
    }
    println!();
    Ok(())
}

fn print_change(store: &StoreHandle, change: &StoreChange) -> Result<()> {
    match change {
        StoreChange::TicketUpdated { id, origin } => {
            let store = store.lock()?;
            if let Some(ticket) = store.ticket(*id) {
                println!("[{:?}] ticket {} → {}", origin, id, ticket.column);
            }
        }
        StoreChange::TicketRemoved { id } => println!("[Remote] ticket {} deleted", id),
        StoreChange::Loaded { tickets } => println!("Board reloaded ({} tickets)", tickets),
        StoreChange::SelectionChanged { .. } => {}
    }
    Ok(())
}

pub async fn cmd_watch(config: &BoardsyncConfig) -> Result<()> {
    let columns = ColumnMap::standard()?;
    let api = Arc::new(HttpBoardApi::new(config.base_url(), columns.clone()));
    let session = Session::start(SessionConfig::from_config(config, columns), api)
        .await
        .with_context(|| format!("Failed to open board {}", config.board_id()))?;

    print_board(session.store())?;
    println!("Watching {} (Ctrl-C to stop)", config.ws_url());

    let mut changes = session.store().subscribe()?;
    let mut status = session.connection().watch_status();
    let mut last_state = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(change) => print_change(session.store(), &change)?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Change stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if last_state != Some(current.state) {
                    match current.state {
                        LinkState::Open => println!("Connected"),
                        LinkState::Connecting => println!("Connecting (attempt {})", current.attempt),
                        LinkState::Closed if current.exhausted => {
                            println!("Connection lost; reconnect attempts exhausted")
                        }
                        LinkState::Closed => println!("Disconnected"),
                    }
                    last_state = Some(current.state);
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
