//! Collaborative board client.
//!
//! ## Overview
//!
//! Tickets live in ordered columns. Users drag them between columns, and
//! edits from collaborators arrive over a WebSocket. Local moves apply
//! immediately and are confirmed or rolled back once the server answers.
//!
//! ## Module Map
//!
//! ```text
//!  pointer drag ──> drag.rs  (resolve_drop, DropContext)
//!                      │ DropResolution::Move
//!                      v
//!                controller.rs  (DragController)
//!                      │ apply_optimistic_move     │ BoardApi::move_ticket
//!                      v                           v
//!                 store.rs  (BoardStore,      api.rs  (HttpBoardApi, reqwest)
//!                   StoreHandle)
//!                      ^
//!                      │ merge_remote_update / merge_remote_delete
//!                 session.rs  (event pump, sweeper, resync)
//!                      ^
//!                      │ BoardEvent over mpsc
//!                  ws.rs  (ConnectionManager, tokio-tungstenite)
//!                      │
//!                supervisor.rs  (state, liveness, backoff)
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `notice`     | Auto-expiring user notices with retry actions         |
//! | `supervisor` | Pure connection bookkeeping, driven with explicit time |

pub mod api;
pub mod controller;
pub mod drag;
pub mod notice;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod ws;

pub use api::{BoardApi, HttpBoardApi};
pub use controller::{DragController, DragOutcome};
pub use drag::{CancelReason, CollisionCandidate, DragEnd, DropResolution, DropTarget, resolve_drop};
pub use notice::{Notice, NoticeBoard, RetryAction};
pub use session::{Session, SessionConfig};
pub use store::{BoardStore, ChangeOrigin, MergeOutcome, MutationToken, StoreChange, StoreHandle};
pub use supervisor::{ConnectionStatus, LinkState, Supervisor, SupervisorConfig};
pub use ws::{BoardEvent, ConnectionHandle, ConnectionManager};
