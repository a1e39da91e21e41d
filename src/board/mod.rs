//! Room and session engine of the idea board.
//!
//! - `ids`: room codes and opaque entity ids
//! - `room`: per-room state and the opinion mutations
//! - `registry`: code to room table, creation, joining and deletion
//! - `lifecycle`: idle and empty-room timers
//! - `broadcast`: fan-out of encoded messages to room members
//! - `session`: per-connection protocol handling
//! - `protocol`: wire message types

pub mod broadcast;
pub mod ids;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod session;

pub use lifecycle::{CloseReason, LifecycleConfig};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::RoomRegistry;
pub use room::{Member, Room};
pub use session::Session;
