//! Transient user-facing notices.
//!
//! A failed mutation or a lost connection produces one [`Notice`] that
//! clears itself after a fixed time-to-live. A notice may carry the action
//! needed to retry; nothing is retried unless the user asks.

use std::time::Duration;

use boardsync_common::{ColumnId, TicketId, TicketPatch};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
    Move { ticket_id: TicketId, column: ColumnId },
    Edit { ticket_id: TicketId, patch: TicketPatch },
    Reconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: u64,
    pub message: String,
    pub retry: Option<RetryAction>,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct NoticeBoard {
    notices: Vec<Notice>,
    next_id: u64,
    ttl: Duration,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            notices: Vec::new(),
            next_id: 1,
            ttl,
        }
    }

    pub fn push(&mut self, message: impl Into<String>, retry: Option<RetryAction>, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let notice = Notice {
            id,
            message: message.into(),
            retry,
            expires_at: now + self.ttl,
        };
        tracing::info!(notice_id = id, message = %notice.message, "Notice raised");
        self.notices.push(notice);
        id
    }

    /// Notices still visible at `now`, oldest first.
    pub fn active(&self, now: Instant) -> Vec<&Notice> {
        self.notices.iter().filter(|n| n.expires_at > now).collect()
    }

    pub fn get(&self, id: u64) -> Option<&Notice> {
        self.notices.iter().find(|n| n.id == id)
    }

    /// Remove a notice, handing back its retry action if it had one.
    pub fn dismiss(&mut self, id: u64) -> Option<Notice> {
        let index = self.notices.iter().position(|n| n.id == id)?;
        Some(self.notices.remove(index))
    }

    /// Drop expired notices; returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.notices.len();
        self.notices.retain(|n| n.expires_at > now);
        before - self.notices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }
}
