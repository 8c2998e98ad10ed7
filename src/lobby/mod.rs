//! Pre-match lobbies and session direction

pub mod lobby;
pub mod service;

pub use lobby::{Lobby, LobbyMember};
pub use service::SessionDirector;
