//! REST client for the board backend.
//!
//! Requests and responses carry column display names; [`HttpBoardApi`]
//! translates them through the [`ColumnMap`] in both directions.

use async_trait::async_trait;
use boardsync_common::{BoardId, ColumnId, ColumnMap, Ticket, TicketId, TicketPatch, TicketRecord};
use serde::{Deserialize, Serialize};

use super::ws::ticket_from_wire;
use crate::errors::ApiError;

/// REST surface of the board backend.
#[async_trait]
pub trait BoardApi: Send + Sync {
    /// `POST /tickets/{id}/move`
    async fn move_ticket(&self, ticket_id: TicketId, column: &ColumnId) -> Result<Ticket, ApiError>;

    /// `PUT /tickets/{id}`
    async fn update_ticket(&self, ticket_id: TicketId, patch: &TicketPatch) -> Result<Ticket, ApiError>;

    /// `GET /boards/{id}/tickets`
    async fn list_tickets(&self, board_id: BoardId) -> Result<Vec<Ticket>, ApiError>;
}

#[derive(Debug, Serialize)]
struct MoveRequest<'a> {
    column: &'a str,
}

#[derive(Debug, Deserialize)]
struct TicketList {
    tickets: Vec<TicketRecord>,
}

/// [`BoardApi`] over HTTP.
///
/// Column ids go out as display names and come back through the column map.
/// A mutation response in an unmapped column is an error; listings keep such
/// tickets so the drag guard can see them.
pub struct HttpBoardApi {
    client: reqwest::Client,
    base_url: String,
    columns: ColumnMap,
}

impl HttpBoardApi {
    pub fn new(base_url: impl Into<String>, columns: ColumnMap) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, columns)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, columns: ColumnMap) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            columns,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn ticket_response(&self, resp: reqwest::Response) -> Result<Ticket, ApiError> {
        let record: TicketRecord = check_status(resp).await?.json().await?;
        Ok(Ticket::from_record(record, &self.columns)?)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn move_ticket(&self, ticket_id: TicketId, column: &ColumnId) -> Result<Ticket, ApiError> {
        let display_name = self.columns.display_name(column)?;
        tracing::debug!(ticket_id, column = %column, display_name, "POST move");
        let resp = self
            .client
            .post(self.url(&format!("/tickets/{}/move", ticket_id)))
            .json(&MoveRequest { column: display_name })
            .send()
            .await?;
        self.ticket_response(resp).await
    }

    async fn update_ticket(&self, ticket_id: TicketId, patch: &TicketPatch) -> Result<Ticket, ApiError> {
        tracing::debug!(ticket_id, "PUT ticket");
        let resp = self
            .client
            .put(self.url(&format!("/tickets/{}", ticket_id)))
            .json(patch)
            .send()
            .await?;
        self.ticket_response(resp).await
    }

    async fn list_tickets(&self, board_id: BoardId) -> Result<Vec<Ticket>, ApiError> {
        let resp = self
            .client
            .get(self.url(&format!("/boards/{}/tickets", board_id)))
            .send()
            .await?;
        let list: TicketList = check_status(resp).await?.json().await?;
        tracing::debug!(board_id, tickets = list.tickets.len(), "Fetched ticket list");
        Ok(list
            .tickets
            .into_iter()
            .map(|record| ticket_from_wire(record, &self.columns))
            .collect())
    }
}
