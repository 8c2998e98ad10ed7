//! Game simulation modules

pub mod collision;
pub mod combat;
pub mod flight;
pub mod player;
pub mod projectile;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod validation;
pub mod world;

pub use session::{GameSession, SessionHandle, SessionRegistry, SessionServices};

use crate::ws::protocol::ClientMsg;
use uuid::Uuid;

/// Player input received from a WebSocket connection, routed to the
/// owning session's queue
#[derive(Debug, Clone)]
pub struct SessionInput {
    pub player_id: Uuid,
    pub callsign: String,
    pub msg: ClientMsg,
    pub received_at: u64,
}
