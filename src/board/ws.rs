//! Live channel to the board backend.
//!
//! [`ConnectionManager`] owns one WebSocket at a time. It answers server
//! heartbeats, pings on an interval, forces a reconnect when the server goes
//! silent and backs off between attempts as the [`Supervisor`] decides.
//! Data frames reach the store as [`BoardEvent`]s.

use boardsync_common::{ColumnMap, Ticket, TicketId, TicketRecord};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::supervisor::{ConnectionStatus, Reconnect, Supervisor, SupervisorConfig};
use crate::errors::BoardError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Buffered board events between the socket task and the store pump.
const EVENT_BUFFER: usize = 256;

// ── Wire message types ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedTicket {
    pub id: TicketId,
}

/// Frames keyed by `event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventFrame {
    TicketUpdated {
        data: TicketRecord,
    },
    TicketDeleted {
        data: DeletedTicket,
    },
    Heartbeat {
        #[serde(default)]
        expect_response: bool,
        #[serde(default)]
        heartbeat_id: serde_json::Value,
    },
}

/// Frames keyed by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlFrame {
    Pong,
    Ack,
    HeartbeatAck,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum InboundFrame {
    Event(EventFrame),
    Control(ControlFrame),
}

/// A parsed server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    TicketUpdated(TicketRecord),
    TicketDeleted { id: TicketId },
    Heartbeat {
        expect_response: bool,
        heartbeat_id: serde_json::Value,
    },
    Pong,
    Ack,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        Ok(match frame {
            InboundFrame::Event(EventFrame::TicketUpdated { data }) => Self::TicketUpdated(data),
            InboundFrame::Event(EventFrame::TicketDeleted { data }) => {
                Self::TicketDeleted { id: data.id }
            }
            InboundFrame::Event(EventFrame::Heartbeat {
                expect_response,
                heartbeat_id,
            }) => Self::Heartbeat {
                expect_response,
                heartbeat_id,
            },
            InboundFrame::Control(ControlFrame::Pong) => Self::Pong,
            InboundFrame::Control(ControlFrame::Ack | ControlFrame::HeartbeatAck) => Self::Ack,
        })
    }

    /// Heartbeat and ack traffic only feeds liveness; it never reaches the store.
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::TicketUpdated(_) | Self::TicketDeleted { .. })
    }
}

/// Frames the client sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    HeartbeatResponse {
        heartbeat_id: serde_json::Value,
        timestamp: i64,
    },
}

impl ClientMessage {
    pub fn heartbeat_response(heartbeat_id: serde_json::Value) -> Self {
        Self::HeartbeatResponse {
            heartbeat_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn to_frame(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::text(json)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize client frame");
                None
            }
        }
    }
}

/// What the store pump receives.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    TicketUpdated(Ticket),
    TicketDeleted(TicketId),
    /// The channel came back after a drop; events may have been missed.
    Reconnected,
}

impl BoardEvent {
    /// Convert a data frame into a board event.
    ///
    /// A column the map does not know is kept verbatim and logged: the store
    /// records what the server said and the drag resolver refuses to copy it.
    pub fn from_message(message: ServerMessage, columns: &ColumnMap) -> Option<Self> {
        match message {
            ServerMessage::TicketUpdated(record) => {
                Some(Self::TicketUpdated(ticket_from_wire(record, columns)))
            }
            ServerMessage::TicketDeleted { id } => Some(Self::TicketDeleted(id)),
            _ => None,
        }
    }
}

/// Map a wire record into a ticket, preserving unmapped columns verbatim.
pub fn ticket_from_wire(record: TicketRecord, columns: &ColumnMap) -> Ticket {
    let (ticket, err) = Ticket::from_record_preserving(record, columns);
    if let Some(e) = err {
        tracing::warn!(
            ticket_id = ticket.id,
            column = %ticket.column,
            error = %e,
            "Server sent a ticket in an unmapped column"
        );
    }
    ticket
}

// ── Connection manager ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reconnect,
    Shutdown,
}

/// Why a single socket session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Dropped,
    Dead,
    ManualReconnect,
    Shutdown,
}

/// Control surface for a running [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    /// Reset all backoff state and connect again right away.
    pub async fn reconnect(&self) -> Result<(), BoardError> {
        self.commands
            .send(Command::Reconnect)
            .await
            .map_err(|_| BoardError::ConnectionLost {
                reason: "connection task has stopped".to_string(),
            })
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that wakes on every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Only a retry-exhausted channel counts as lost; a reconnect in
    /// progress is not an error.
    pub fn ensure_connected(&self) -> Result<(), BoardError> {
        let status = self.status();
        if status.exhausted {
            return Err(BoardError::ConnectionLost {
                reason: format!("gave up after {} reconnect attempts", status.attempt),
            });
        }
        Ok(())
    }
}

/// Owns the live socket and keeps it alive.
pub struct ConnectionManager {
    url: String,
    supervisor: Supervisor,
    columns: ColumnMap,
    events: mpsc::Sender<BoardEvent>,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    opened_before: bool,
}

impl ConnectionManager {
    /// Start the connection task.
    ///
    /// Returns the control handle, the stream of board events and the task
    /// handle. The task ends after [`ConnectionHandle::shutdown`] or once
    /// every handle has been dropped.
    pub fn spawn(
        url: impl Into<String>,
        config: SupervisorConfig,
        columns: ColumnMap,
    ) -> (ConnectionHandle, mpsc::Receiver<BoardEvent>, JoinHandle<()>) {
        let supervisor = Supervisor::new(config);
        let (status_tx, status_rx) = watch::channel(supervisor.status());
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(8);

        let manager = Self {
            url: url.into(),
            supervisor,
            columns,
            events: event_tx,
            commands: command_rx,
            status: status_tx,
            opened_before: false,
        };
        let task = tokio::spawn(manager.run());

        let handle = ConnectionHandle {
            commands: command_tx,
            status: status_rx,
        };
        (handle, event_rx, task)
    }

    fn publish(&self) {
        let _ = self.status.send(self.supervisor.status());
    }

    async fn run(mut self) {
        loop {
            self.supervisor.begin_connect();
            self.publish();
            tracing::debug!(url = %self.url, attempt = self.supervisor.attempt(), "Connecting");

            // A handshake that never completes counts as a failed attempt.
            let connect_timeout = self.supervisor.config().dead_after();
            let attempt = tokio::select! {
                result = tokio::time::timeout(connect_timeout, connect_async(self.url.as_str())) => Ok(result),
                cmd = self.commands.recv() => Err(cmd),
            };

            let end = match attempt {
                Ok(Ok(Ok((socket, _response)))) => {
                    self.supervisor.on_open(Instant::now());
                    self.publish();
                    tracing::info!(url = %self.url, "Live channel open");
                    if self.opened_before {
                        let _ = self.events.send(BoardEvent::Reconnected).await;
                    }
                    self.opened_before = true;
                    self.drive(socket).await
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(url = %self.url, error = %e, "Connect failed");
                    SessionEnd::Dropped
                }
                Ok(Err(_)) => {
                    tracing::warn!(
                        url = %self.url,
                        timeout_ms = connect_timeout.as_millis() as u64,
                        "Connect timed out"
                    );
                    SessionEnd::Dropped
                }
                Err(Some(Command::Reconnect)) => SessionEnd::ManualReconnect,
                Err(Some(Command::Shutdown) | None) => SessionEnd::Shutdown,
            };

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::ManualReconnect => {
                    self.supervisor.manual_reset();
                    continue;
                }
                SessionEnd::Dead => {
                    tracing::warn!("No liveness signal within threshold; connection forced closed");
                }
                SessionEnd::Dropped => {}
            }

            match self.supervisor.on_close() {
                Reconnect::After { attempt, delay } => {
                    self.publish();
                    tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        cmd = self.commands.recv() => match cmd {
                            Some(Command::Reconnect) => self.supervisor.manual_reset(),
                            Some(Command::Shutdown) | None => break,
                        }
                    }
                }
                Reconnect::GiveUp { attempts } => {
                    self.publish();
                    tracing::error!(attempts, "Reconnect attempts exhausted; waiting for manual reconnect");
                    match self.commands.recv().await {
                        Some(Command::Reconnect) => self.supervisor.manual_reset(),
                        Some(Command::Shutdown) | None => break,
                    }
                }
            }
        }

        self.supervisor.manual_reset();
        self.publish();
        tracing::debug!("Connection task stopped");
    }

    /// Run one open socket until it closes, goes silent or is told to stop.
    async fn drive(&mut self, socket: Socket) -> SessionEnd {
        let (mut sender, mut receiver) = socket.split();
        let ping_interval = self.supervisor.config().ping_interval;
        let mut ticker = tokio::time::interval(ping_interval);
        // First tick fires immediately; the first ping goes out one interval in.
        ticker.tick().await;

        let end = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.supervisor.is_dead(Instant::now()) {
                        break SessionEnd::Dead;
                    }
                    let Some(frame) = ClientMessage::Ping.to_frame() else { continue };
                    if sender.send(frame).await.is_err() {
                        break SessionEnd::Dropped;
                    }
                }

                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.on_text(text.as_str()).await {
                                if sender.send(reply).await.is_err() {
                                    break SessionEnd::Dropped;
                                }
                            }
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                            self.supervisor.on_liveness(Instant::now());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server closed the live channel");
                            break SessionEnd::Dropped;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Live channel error");
                            break SessionEnd::Dropped;
                        }
                        None => break SessionEnd::Dropped,
                    }
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Reconnect) => break SessionEnd::ManualReconnect,
                        Some(Command::Shutdown) | None => break SessionEnd::Shutdown,
                    }
                }
            }
        };

        // Best-effort close frame
        let _ = sender.send(Message::Close(None)).await;
        end
    }

    /// Handle one text frame; returns a reply frame when the server wants one.
    async fn on_text(&mut self, text: &str) -> Option<Message> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unparseable frame");
                return None;
            }
        };
        self.supervisor.on_liveness(Instant::now());

        if let ServerMessage::Heartbeat {
            expect_response: true,
            heartbeat_id,
        } = &message
        {
            return ClientMessage::heartbeat_response(heartbeat_id.clone()).to_frame();
        }
        if message.is_control() {
            return None;
        }
        if let Some(event) = BoardEvent::from_message(message, &self.columns) {
            if self.events.send(event).await.is_err() {
                tracing::debug!("Board event receiver dropped");
            }
        }
        None
    }
}
